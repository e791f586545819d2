//! Resource session cookies
//!
//! Cookie names embed their creation time: `<name>.<millis>` over plain HTTP
//! and `<name>_s.<millis>` over HTTPS. A browser can therefore hold several
//! resource sessions for the same resource at once, and the verifier checks
//! each of them. Two cookies serialized for the same resource in the same
//! millisecond get the same name, and the browser keeps the later one.

use chrono::{TimeZone, Utc};

use crate::time::current_time_millis;

/// Suffix appended to the cookie name when the cookie is `Secure`
pub const SECURE_SUFFIX: &str = "_s";

/// Serialize a resource session cookie stamped with the current time.
///
/// `expires_at` is epoch milliseconds; without it the cookie lives for the
/// browser session.
pub fn serialize_resource_session_cookie(
    cookie_name: &str,
    domain: &str,
    token: &str,
    is_http: bool,
    expires_at: Option<i64>,
) -> String {
    serialize_resource_session_cookie_at(
        cookie_name,
        domain,
        token,
        is_http,
        expires_at,
        current_time_millis(),
    )
}

/// Same as [`serialize_resource_session_cookie`] with an explicit creation time.
pub fn serialize_resource_session_cookie_at(
    cookie_name: &str,
    domain: &str,
    token: &str,
    is_http: bool,
    expires_at: Option<i64>,
    now_millis: i64,
) -> String {
    let mut attributes = vec![
        format!("{}={}", stamped_name(cookie_name, is_http, now_millis), token),
        "HttpOnly".to_string(),
        "SameSite=Lax".to_string(),
    ];
    if let Some(expires) = expires_at.and_then(http_date) {
        attributes.push(format!("Expires={}", expires));
    }
    push_scope(&mut attributes, domain, is_http);
    attributes.join("; ")
}

/// Serialize an empty cookie that tells the browser to drop a session cookie.
pub fn create_blank_resource_session_token_cookie(
    cookie_name: &str,
    domain: &str,
    is_http: bool,
) -> String {
    create_blank_resource_session_token_cookie_at(cookie_name, domain, is_http, current_time_millis())
}

/// Same as [`create_blank_resource_session_token_cookie`] with an explicit time.
pub fn create_blank_resource_session_token_cookie_at(
    cookie_name: &str,
    domain: &str,
    is_http: bool,
    now_millis: i64,
) -> String {
    let mut attributes = vec![
        format!("{}=", stamped_name(cookie_name, is_http, now_millis)),
        "HttpOnly".to_string(),
        "SameSite=Lax".to_string(),
        "Max-Age=0".to_string(),
    ];
    push_scope(&mut attributes, domain, is_http);
    attributes.join("; ")
}

/// Serialize a deletion for one exact cookie name, e.g. a stamped session
/// cookie the browser sent that is no longer acceptable.
pub fn clear_session_cookie(full_name: &str, domain: &str, is_http: bool) -> String {
    let mut attributes = vec![
        format!("{}=", full_name),
        "HttpOnly".to_string(),
        "SameSite=Lax".to_string(),
        "Max-Age=0".to_string(),
    ];
    push_scope(&mut attributes, domain, is_http);
    attributes.join("; ")
}

/// A cookie name recognised as a resource session cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCookieName {
    /// Carries the `_s` suffix
    pub secure: bool,
    /// Creation time embedded in the name, if any
    pub created_at: Option<i64>,
}

/// Recognise `<name>`, `<name>_s`, `<name>.<millis>` and `<name>_s.<millis>`.
pub fn parse_session_cookie_name(candidate: &str, cookie_name: &str) -> Option<SessionCookieName> {
    let rest = candidate.strip_prefix(cookie_name)?;
    let (secure, rest) = match rest.strip_prefix(SECURE_SUFFIX) {
        Some(after) => (true, after),
        None => (false, rest),
    };

    if rest.is_empty() {
        return Some(SessionCookieName {
            secure,
            created_at: None,
        });
    }

    let millis = rest.strip_prefix('.')?;
    if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(SessionCookieName {
        secure,
        created_at: millis.parse().ok(),
    })
}

fn stamped_name(cookie_name: &str, is_http: bool, now_millis: i64) -> String {
    if is_http {
        format!("{}.{}", cookie_name, now_millis)
    } else {
        format!("{}{}.{}", cookie_name, SECURE_SUFFIX, now_millis)
    }
}

fn push_scope(attributes: &mut Vec<String>, domain: &str, is_http: bool) {
    attributes.push("Path=/".to_string());
    if !is_http {
        attributes.push("Secure".to_string());
    }
    attributes.push(format!("Domain={}", domain));
}

fn http_date(millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_123;

    #[test]
    fn test_secure_cookie() {
        let cookie = serialize_resource_session_cookie_at("p_session", ".example.com", "tok", false, None, NOW);
        assert_eq!(
            cookie,
            "p_session_s.1700000000123=tok; HttpOnly; SameSite=Lax; Path=/; Secure; Domain=.example.com"
        );
    }

    #[test]
    fn test_http_cookie_has_no_secure_marker() {
        let cookie = serialize_resource_session_cookie("p_session", "example.com", "tok", true, None);
        assert!(!cookie.contains("p_session_s."));
        assert!(!cookie.contains("Secure"));
        assert!(cookie.starts_with("p_session."));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Domain=example.com"));
    }

    #[test]
    fn test_secure_cookie_with_current_time() {
        let cookie = serialize_resource_session_cookie("p_session", "example.com", "tok", false, None);
        assert!(cookie.contains("p_session_s."));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn test_expires_is_utc_string() {
        // 2023-11-14T22:13:20Z
        let cookie = serialize_resource_session_cookie_at(
            "p_session",
            "example.com",
            "tok",
            true,
            Some(1_700_000_000_000),
            NOW,
        );
        assert!(cookie.contains("Expires=Tue, 14 Nov 2023 22:13:20 GMT"));
        assert!(!cookie.contains("Max-Age"));
    }

    #[test]
    fn test_session_cookie_has_no_expiry() {
        let cookie = serialize_resource_session_cookie_at("n", "d", "t", true, None, NOW);
        assert!(!cookie.contains("Expires="));
    }

    #[test]
    fn test_blank_cookie() {
        let secure = create_blank_resource_session_token_cookie_at("p_session", "example.com", false, NOW);
        assert_eq!(
            secure,
            "p_session_s.1700000000123=; HttpOnly; SameSite=Lax; Max-Age=0; Path=/; Secure; Domain=example.com"
        );

        let plain = create_blank_resource_session_token_cookie_at("p_session", "example.com", true, NOW);
        assert!(plain.starts_with("p_session.1700000000123=;"));
        assert!(!plain.contains("Secure"));
    }

    #[test]
    fn test_clear_exact_cookie() {
        assert_eq!(
            clear_session_cookie("p_session_s.1699999999000", "example.com", false),
            "p_session_s.1699999999000=; HttpOnly; SameSite=Lax; Max-Age=0; Path=/; Secure; Domain=example.com"
        );
    }

    #[test]
    fn test_parse_session_cookie_names() {
        assert_eq!(
            parse_session_cookie_name("p_session_s.1700000000123", "p_session"),
            Some(SessionCookieName {
                secure: true,
                created_at: Some(NOW),
            })
        );
        assert_eq!(
            parse_session_cookie_name("p_session", "p_session"),
            Some(SessionCookieName {
                secure: false,
                created_at: None,
            })
        );
        assert_eq!(parse_session_cookie_name("p_session.abc", "p_session"), None);
        assert_eq!(parse_session_cookie_name("p_sessionx", "p_session"), None);
        assert_eq!(parse_session_cookie_name("other", "p_session"), None);
    }

    #[test]
    fn test_serialized_name_parses_back() {
        let cookie = serialize_resource_session_cookie_at("p_session", "d", "t", false, None, NOW);
        let name = cookie.split('=').next().unwrap();
        let parsed = parse_session_cookie_name(name, "p_session").unwrap();
        assert!(parsed.secure);
        assert_eq!(parsed.created_at, Some(NOW));
    }
}
