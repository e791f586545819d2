//! Resource rule evaluation
//!
//! Rules are tried in ascending priority order. The first enabled rule that
//! matches decides, except that a `PASS` rule hands the request on to the
//! authentication checks.

use std::net::IpAddr;

use crate::types::{ResourceRule, RuleAction, RuleMatch};

/// Result of running a resource's rules against a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Accept,
    Drop,
    /// No rule decided; continue with authentication
    NoMatch,
}

/// Evaluate `rules` for a client address and request path.
pub fn evaluate_rules(rules: &[ResourceRule], client_ip: Option<&str>, path: &str) -> RuleOutcome {
    let mut ordered: Vec<&ResourceRule> = rules.iter().filter(|r| r.enabled).collect();
    ordered.sort_by_key(|r| r.priority);

    let ip: Option<IpAddr> = client_ip.and_then(|raw| raw.parse().ok());

    for rule in ordered {
        let matched = match rule.match_type {
            RuleMatch::Cidr => ip.map_or(false, |ip| ip_in_cidr(ip, &rule.value)),
            RuleMatch::Ip => ip.map_or(false, |ip| rule.value.parse::<IpAddr>().map_or(false, |v| v == ip)),
            RuleMatch::Path => path_matches(&rule.value, path),
        };

        if !matched {
            continue;
        }

        match rule.action {
            RuleAction::Accept => return RuleOutcome::Accept,
            RuleAction::Drop => return RuleOutcome::Drop,
            RuleAction::Pass => return RuleOutcome::NoMatch,
        }
    }

    RuleOutcome::NoMatch
}

/// Whether `ip` falls inside `cidr` (`a.b.c.d/n` or `v6/n`).
/// A bare address is treated as a single-host network.
pub fn ip_in_cidr(ip: IpAddr, cidr: &str) -> bool {
    let (network, prefix) = match cidr.split_once('/') {
        Some((net, len)) => match len.trim().parse::<u32>() {
            Ok(len) => (net.trim(), Some(len)),
            Err(_) => return false,
        },
        None => (cidr.trim(), None),
    };

    let Ok(network) = network.parse::<IpAddr>() else {
        return false;
    };

    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let len = prefix.unwrap_or(32);
            if len > 32 {
                return false;
            }
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            u32::from(ip) & mask == u32::from(net) & mask
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let len = prefix.unwrap_or(128);
            if len > 128 {
                return false;
            }
            let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
            u128::from(ip) & mask == u128::from(net) & mask
        }
        _ => false,
    }
}

/// Match a request path against a rule pattern.
///
/// Patterns compare segment by segment. A `*` inside a segment matches any
/// run of characters within that segment; a trailing `*` segment matches
/// the rest of the path.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_segments: Vec<&str> = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_matches('/')
        .split('/')
        .collect();

    match_segments(&pattern_segments, &path_segments)
}

/// Wildcard match over whole segments. A bare `*` swallows zero or more
/// segments; on a mismatch only the most recent one is retried.
fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    let (mut p, mut s) = (0, 0);
    // pattern index of the last bare `*` and the path index it resumes from
    let mut backtrack: Option<(usize, usize)> = None;

    while s < path.len() {
        if pattern.get(p) == Some(&"*") {
            backtrack = Some((p, s));
            p += 1;
        } else if pattern.get(p).is_some_and(|seg| segment_matches(seg, path[s])) {
            p += 1;
            s += 1;
        } else if let Some((star, resume)) = backtrack {
            backtrack = Some((star, resume + 1));
            p = star + 1;
            s = resume + 1;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|seg| *seg == "*")
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return segment.is_empty();
    };
    if !segment.starts_with(first) {
        return false;
    }
    if !pattern.contains('*') {
        return segment == pattern;
    }

    let mut rest = &segment[first.len()..];
    let pieces: Vec<&str> = parts.collect();
    for (i, piece) in pieces.iter().enumerate() {
        let last = i == pieces.len() - 1;
        if last {
            return rest.ends_with(piece);
        }
        match rest.find(piece) {
            Some(idx) => rest = &rest[idx + piece.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(priority: i32, action: RuleAction, match_type: RuleMatch, value: &str) -> ResourceRule {
        ResourceRule {
            rule_id: priority as i64,
            resource_id: 1,
            enabled: true,
            priority,
            action,
            match_type,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_priority_order() {
        let rules = vec![
            rule(20, RuleAction::Accept, RuleMatch::Cidr, "10.0.0.0/8"),
            rule(10, RuleAction::Drop, RuleMatch::Ip, "10.1.2.3"),
        ];
        assert_eq!(evaluate_rules(&rules, Some("10.1.2.3"), "/"), RuleOutcome::Drop);
        assert_eq!(evaluate_rules(&rules, Some("10.9.9.9"), "/"), RuleOutcome::Accept);
        assert_eq!(evaluate_rules(&rules, Some("192.168.1.1"), "/"), RuleOutcome::NoMatch);
    }

    #[test]
    fn test_disabled_and_pass() {
        let mut disabled = rule(1, RuleAction::Drop, RuleMatch::Path, "/admin/*");
        disabled.enabled = false;
        let rules = vec![
            disabled,
            rule(2, RuleAction::Pass, RuleMatch::Path, "/admin/*"),
            rule(3, RuleAction::Accept, RuleMatch::Path, "/admin/*"),
        ];
        assert_eq!(evaluate_rules(&rules, None, "/admin/users"), RuleOutcome::NoMatch);
    }

    #[test]
    fn test_cidr() {
        let ip: IpAddr = "192.168.1.77".parse().unwrap();
        assert!(ip_in_cidr(ip, "192.168.1.0/24"));
        assert!(!ip_in_cidr(ip, "192.168.2.0/24"));
        assert!(ip_in_cidr(ip, "0.0.0.0/0"));
        assert!(ip_in_cidr(ip, "192.168.1.77"));
        assert!(!ip_in_cidr(ip, "192.168.1.0/33"));
        assert!(!ip_in_cidr(ip, "not-a-network"));

        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(ip_in_cidr(v6, "2001:db8::/32"));
        assert!(!ip_in_cidr(v6, "10.0.0.0/8"));
    }

    #[test]
    fn test_path_patterns() {
        assert!(path_matches("/api/*", "/api/v1/users"));
        assert!(path_matches("/api/*", "/api"));
        assert!(path_matches("/static/*.css", "/static/site.css"));
        assert!(!path_matches("/static/*.css", "/static/site.js"));
        assert!(path_matches("/health", "/health?full=1"));
        assert!(!path_matches("/health", "/healthz"));
        assert!(path_matches("/*/settings", "/org/team/settings"));
    }

    #[test]
    fn test_many_bare_stars_stay_fast() {
        let pattern = format!("{}/admin", "/*".repeat(24));
        let deep = "/a".repeat(60);
        assert!(!path_matches(&pattern, &deep));
        assert!(path_matches(&pattern, &format!("{}/admin", deep)));
        assert!(path_matches("/*/*/*", "/a"));
        assert!(!path_matches("/*/x/*/y", "/a/x/b/z"));
    }
}
