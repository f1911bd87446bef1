//! Session and request fingerprints, IP prefixes, and client IP extraction.

#![allow(missing_docs)]

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Proxy headers consulted for the client address, highest precedence first.
pub const CLIENT_IP_HEADERS: [&str; 4] = [
    "X-Forwarded-For",
    "X-Real-IP",
    "CF-Connecting-IP",
    "True-Client-IP",
];

/// What a session recorded about its client when it started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFingerprint {
    pub ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

/// What the current request presents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub ip: String,
    pub user_agent: String,
}

impl SessionFingerprint {
    pub fn new(
        ip: impl Into<String>,
        user_agent: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
            created_at,
        }
    }

    /// Bind a new session to the request that opened it.
    #[must_use]
    pub fn from_request(request: &RequestFingerprint, created_at: DateTime<Utc>) -> Self {
        Self::new(request.ip.clone(), request.user_agent.clone(), created_at)
    }

    /// Session age at `now`; a creation time in the future counts as zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        (now - self.created_at).max(TimeDelta::zero())
    }
}

impl RequestFingerprint {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Exact IP and user-agent match.
    #[must_use]
    pub fn matches(&self, session: &SessionFingerprint) -> bool {
        self.ip == session.ip && self.user_agent == session.user_agent
    }
}

/// First `octets` dot-separated components of `ip`.
///
/// Addresses without dots (IPv6) come back whole, so they compare exactly.
#[must_use]
pub fn ip_prefix(ip: &str, octets: usize) -> String {
    ip.split('.').take(octets).collect::<Vec<_>>().join(".")
}

/// Resolve the client address from proxy headers, falling back to the peer.
///
/// `X-Forwarded-For` contributes only its first hop. Empty values and the
/// literal `unknown` are ignored. Header names match case-insensitively.
#[must_use]
pub fn client_ip(headers: &[(&str, &str)], remote_addr: Option<&str>) -> Option<String> {
    let usable = |raw: &str| {
        let v = raw.trim();
        (!v.is_empty() && !v.eq_ignore_ascii_case("unknown")).then(|| v.to_string())
    };

    for name in CLIENT_IP_HEADERS {
        let value = headers
            .iter()
            .find(|(h, _)| h.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v);
        let Some(value) = value else { continue };
        let candidate = if name == "X-Forwarded-For" {
            value.split(',').next().unwrap_or_default()
        } else {
            value
        };
        if let Some(ip) = usable(candidate) {
            return Some(ip);
        }
    }
    remote_addr.and_then(usable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_takes_leading_octets() {
        assert_eq!(ip_prefix("192.168.1.100", 2), "192.168");
        assert_eq!(ip_prefix("192.168.1.100", 3), "192.168.1");
        assert_eq!(ip_prefix("10.0", 3), "10.0");
        assert_eq!(ip_prefix("", 2), "");
        assert_eq!(ip_prefix("2001:db8::1", 2), "2001:db8::1");
    }

    #[test]
    fn forwarded_for_uses_first_hop() {
        let headers = [
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("X-Real-IP", "10.9.9.9"),
        ];
        assert_eq!(
            client_ip(&headers, Some("127.0.0.1")).as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn header_precedence_and_unknown() {
        let headers = [
            ("X-Forwarded-For", "unknown"),
            ("CF-Connecting-IP", "198.51.100.2"),
            ("X-Real-IP", " "),
        ];
        assert_eq!(
            client_ip(&headers, Some("127.0.0.1")).as_deref(),
            Some("198.51.100.2")
        );
        assert_eq!(client_ip(&[], Some("127.0.0.1")).as_deref(), Some("127.0.0.1"));
        assert_eq!(client_ip(&[], Some("unknown")), None);
        assert_eq!(client_ip(&[], None), None);
    }

    #[test]
    fn age_never_negative() {
        let now = Utc::now();
        let fp = SessionFingerprint::new("1.2.3.4", "ua", now + TimeDelta::hours(1));
        assert_eq!(fp.age(now), TimeDelta::zero());
        let fp = SessionFingerprint::new("1.2.3.4", "ua", now - TimeDelta::days(3));
        assert_eq!(fp.age(now).num_days(), 3);
    }
}
