//! Organization session-length policy
//!
//! An organization may cap how long a resource session stays valid after
//! the identity behind it was established. The cap is enforced here, on the
//! data plane, against sessions the control plane has already validated.

use crate::time::{current_time_millis, elapsed_millis_at};
use crate::types::{Org, ResourceSession};

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Outcome of a session-length check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLengthVerdict {
    /// Session satisfies the org policy
    Valid,
    /// Session violates the org policy
    Invalid {
        /// Human-readable reason
        reason: String,
    },
}

impl SessionLengthVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Reason for an invalid verdict
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid { reason } => Some(reason),
        }
    }
}

/// Check a resource session against its organization's maximum session length.
pub fn enforce_resource_session_length(session: &ResourceSession, org: &Org) -> SessionLengthVerdict {
    enforce_resource_session_length_at(session, org, current_time_millis())
}

/// Same as [`enforce_resource_session_length`] with an explicit clock.
///
/// A limit of zero hours counts as unset.
pub fn enforce_resource_session_length_at(
    session: &ResourceSession,
    org: &Org,
    now_millis: i64,
) -> SessionLengthVerdict {
    let max_hours = match org.max_session_length_hours {
        Some(hours) if hours > 0 => hours,
        _ => return SessionLengthVerdict::Valid,
    };

    let Some(issued_at) = session.issued_at else {
        return SessionLengthVerdict::Invalid {
            reason: "session invalid under organization policy (age cannot be determined)"
                .to_string(),
        };
    };

    let max_length_millis = i64::from(max_hours) * MILLIS_PER_HOUR;
    if elapsed_millis_at(issued_at, now_millis) > max_length_millis {
        return SessionLengthVerdict::Invalid {
            reason: format!(
                "session expired under organization policy (max {} hours)",
                max_hours
            ),
        };
    }

    SessionLengthVerdict::Valid
}
