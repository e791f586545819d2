//! Core trait definitions

mod audit;
mod credentials;
mod gateway;

pub use audit::AuditSink;
pub use credentials::CredentialProvider;
pub use gateway::{
    AccessTokenRequest, AccessTokenVerification, OrgAccessPolicyQuery, OrgAccessPolicyResult,
    RemoteVerificationGateway, ResourceSessionValidation, RoleResourceAccess, User, UserOrgRole,
    UserResourceAccess, UserSession, UserSessionWithUser,
};
