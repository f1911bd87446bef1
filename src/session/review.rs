//! Active-session review: every stored session scored against the current
//! request, annotated for display, riskiest first.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::format::plural;
use crate::session::binding::{DeviceInfo, UaClassifier};
use crate::session::fingerprint::{RequestFingerprint, SessionFingerprint};
use crate::session::scoring::{RiskLevel, RiskScorer, TrustDecision};

/// Coarse location label. No geolocation lookup is performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub region: String,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Location {
    fn new(country: &str, region: &str, city: &str) -> Self {
        Self {
            country: country.to_string(),
            region: region.to_string(),
            city: city.to_string(),
            ip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: String,
    pub ip: String,
    pub user_agent: String,
    pub device: DeviceInfo,
    pub created_at: DateTime<Utc>,
    pub duration: String,
    pub location: Location,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub decision: TrustDecision,
    pub is_current: bool,
}

/// Label private and loopback ranges by string prefix.
#[must_use]
pub fn approximate_location(ip: &str) -> Location {
    if ip.is_empty() {
        return Location::new("Unknown", "Unknown", "Unknown");
    }
    if ["192.168.", "10.", "172."].iter().any(|p| ip.starts_with(p)) {
        return Location::new("Local Network", "Private", "LAN");
    }
    if ip.starts_with("127.") {
        return Location::new("Localhost", "Local", "127.0.0.1");
    }
    Location {
        ip: Some(ip.to_string()),
        ..Location::new("Unknown", "Unknown", "Unknown")
    }
}

/// `2 days, 3 hours` / `1 hour, 5 minutes` / `12 minutes`.
#[must_use]
pub fn format_session_duration(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - created_at).num_seconds().max(0);
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{}, {}", plural(days, "day"), plural(hours, "hour"))
    } else if hours > 0 {
        format!("{}, {}", plural(hours, "hour"), plural(minutes, "minute"))
    } else {
        plural(minutes, "minute")
    }
}

/// Score every session against `current`; highest risk first, ties by id.
#[must_use]
pub fn review_sessions(
    sessions: Vec<(String, SessionFingerprint)>,
    current: &RequestFingerprint,
    scorer: &RiskScorer,
    classifier: &UaClassifier,
    now: DateTime<Utc>,
) -> Vec<SessionEntry> {
    let mut entries: Vec<SessionEntry> = sessions
        .into_iter()
        .map(|(session_id, fp)| {
            let assessment = scorer.assess(&fp, current, now);
            SessionEntry {
                is_current: current.matches(&fp),
                duration: format_session_duration(fp.created_at, now),
                location: approximate_location(&fp.ip),
                device: classifier.device(&fp.user_agent),
                risk_score: assessment.score,
                risk_level: assessment.level,
                decision: assessment.decision,
                session_id,
                ip: fp.ip,
                user_agent: fp.user_agent,
                created_at: fp.created_at,
            }
        })
        .collect();
    entries.sort_by(|a, b| {
        b.risk_score
            .cmp(&a.risk_score)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TrustConfig;
    use crate::session::binding::DeviceKind;
    use chrono::TimeDelta;

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

    #[test]
    fn private_ranges_are_local() {
        assert_eq!(approximate_location("192.168.0.9").country, "Local Network");
        assert_eq!(approximate_location("10.2.3.4").city, "LAN");
        assert_eq!(approximate_location("172.31.0.1").region, "Private");
        let lo = approximate_location("127.0.0.1");
        assert_eq!((lo.country.as_str(), lo.city.as_str()), ("Localhost", "127.0.0.1"));
    }

    #[test]
    fn public_and_empty_are_unknown() {
        let public = approximate_location("203.45.67.89");
        assert_eq!(public.country, "Unknown");
        assert_eq!(public.ip.as_deref(), Some("203.45.67.89"));
        let empty = approximate_location("");
        assert_eq!(empty.country, "Unknown");
        assert!(empty.ip.is_none());
    }

    #[test]
    fn durations_pick_two_largest_units() {
        let now = Utc::now();
        let ago = |d: TimeDelta| format_session_duration(now - d, now);
        assert_eq!(ago(TimeDelta::days(2) + TimeDelta::hours(3)), "2 days, 3 hours");
        assert_eq!(ago(TimeDelta::days(1) + TimeDelta::minutes(5)), "1 day, 0 hours");
        assert_eq!(ago(TimeDelta::hours(1) + TimeDelta::minutes(1)), "1 hour, 1 minute");
        assert_eq!(ago(TimeDelta::minutes(12)), "12 minutes");
        assert_eq!(ago(TimeDelta::seconds(30)), "0 minutes");
        assert_eq!(format_session_duration(now + TimeDelta::hours(1), now), "0 minutes");
    }

    #[test]
    fn sessions_sorted_by_risk_with_current_flagged() {
        let now = Utc::now();
        let scorer = RiskScorer::from_config(&TrustConfig::default());
        let current = RequestFingerprint::new("192.168.1.100", UA);
        let sessions = vec![
            (
                "here".to_string(),
                SessionFingerprint::new("192.168.1.100", UA, now - TimeDelta::hours(2)),
            ),
            (
                "laptop".to_string(),
                SessionFingerprint::new("203.45.67.89", UA, now - TimeDelta::days(2)),
            ),
            (
                "scanner".to_string(),
                SessionFingerprint::new("192.168.1.100", "nikto/2.5", now - TimeDelta::days(45)),
            ),
        ];

        let classifier = UaClassifier::new().unwrap();
        let entries = review_sessions(sessions, &current, &scorer, &classifier, now);
        let order: Vec<&str> = entries.iter().map(|e| e.session_id.as_str()).collect();
        assert_eq!(order, vec!["scanner", "laptop", "here"]);

        assert_eq!(entries[0].risk_score, 28);
        assert_eq!(entries[0].risk_level, RiskLevel::Medium);
        assert_eq!(entries[1].risk_score, 7);
        assert_eq!(entries[1].location.country, "Unknown");
        assert!(entries[2].is_current);
        assert!(!entries[0].is_current);
        assert_eq!(entries[2].duration, "2 hours, 0 minutes");
    }

    #[test]
    fn entries_carry_stored_device() {
        let now = Utc::now();
        let scorer = RiskScorer::from_config(&TrustConfig::default());
        let classifier = UaClassifier::new().unwrap();
        let phone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";
        let sessions = vec![
            ("desk".to_string(), SessionFingerprint::new("10.0.0.2", UA, now)),
            ("phone".to_string(), SessionFingerprint::new("10.0.0.3", phone, now)),
            ("blank".to_string(), SessionFingerprint::new("10.0.0.4", "", now)),
        ];
        // The current request's agent must not leak into any row.
        let current = RequestFingerprint::new("10.0.0.2", "curl/8.4.0");

        let entries = review_sessions(sessions, &current, &scorer, &classifier, now);
        let device = |id: &str| {
            entries
                .iter()
                .find(|e| e.session_id == id)
                .map(|e| e.device.clone())
                .unwrap()
        };

        let desk = device("desk");
        assert_eq!(desk.label(), "Firefox on Linux (pc)");
        let phone_dev = device("phone");
        assert_eq!((phone_dev.browser.as_str(), phone_dev.os.as_str()), ("Safari", "iOS"));
        assert_eq!(phone_dev.kind, DeviceKind::Mobile);
        assert_eq!(phone_dev.raw_ua.chars().count(), 100);
        let blank = device("blank");
        assert_eq!(blank.kind, DeviceKind::Unknown);
        assert!(blank.raw_ua.is_empty());

        let json = serde_json::to_value(&entries[0]).unwrap();
        assert!(json["device"]["kind"].is_string());
    }
}
