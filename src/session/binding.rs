//! Session binding: the request-path check that ties a session to the client
//! that opened it.
//!
//! On first sight a session is bound to the request's user agent and IP
//! prefix. Any later request whose agent or prefix differs invalidates the
//! session. This is deliberately independent of the numeric risk score.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::config::{BindingConfig, UaMatchMode};
use crate::core::errors::{CsnError, Result};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::session::fingerprint::{RequestFingerprint, SessionFingerprint, ip_prefix};
use crate::session::store::SessionStore;

/// Browser families, most specific first (Edge and Opera also claim Chrome).
const BROWSER_FAMILIES: [(&str, &str); 8] = [
    ("Edge", r"Edg(e|A|iOS)?/"),
    ("Opera", r"OPR/|Opera"),
    ("Chrome", r"Chrome/|CriOS/"),
    ("Firefox", r"Firefox/|FxiOS/"),
    ("Safari", r"Safari/"),
    ("curl", r"^curl/"),
    ("Wget", r"^Wget/"),
    ("Python Requests", r"^python-requests/"),
];

/// OS families, most specific first (Android claims Linux, iOS claims Mac OS X).
const OS_FAMILIES: [(&str, &str); 6] = [
    ("iOS", r"iPhone|iPad|iPod"),
    ("Android", r"Android"),
    ("Windows", r"Windows"),
    ("Chrome OS", r"CrOS"),
    ("Mac OS X", r"Mac OS X|Macintosh"),
    ("Linux", r"Linux|X11"),
];

const OTHER: &str = "Other";

/// Agents that announce automation; browser families above cover the rest.
const BOT_MARKERS: &str = r"(?i)bot|crawler|spider|scrapy|headless";

/// Stored agents are clipped to this many characters in device summaries.
const RAW_UA_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UaFamily {
    pub browser: &'static str,
    pub os: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Mobile,
    Tablet,
    Pc,
    Bot,
    Unknown,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Pc => "pc",
            Self::Bot => "bot",
            Self::Unknown => "unknown",
        })
    }
}

/// Display summary of the client behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub browser: String,
    pub os: String,
    pub kind: DeviceKind,
    pub raw_ua: String,
}

impl DeviceInfo {
    /// `Chrome on Windows (pc)`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} on {} ({})", self.browser, self.os, self.kind)
    }
}

/// Compiled browser and OS family tables.
pub struct UaClassifier {
    browsers: Vec<(&'static str, Regex)>,
    systems: Vec<(&'static str, Regex)>,
    bots: Regex,
}

impl UaClassifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            browsers: compile_families(&BROWSER_FAMILIES)?,
            systems: compile_families(&OS_FAMILIES)?,
            bots: compile_pattern("bots", BOT_MARKERS)?,
        })
    }

    pub fn family(&self, user_agent: &str) -> UaFamily {
        let pick = |table: &[(&'static str, Regex)]| {
            table
                .iter()
                .find(|(_, re)| re.is_match(user_agent))
                .map_or(OTHER, |(name, _)| *name)
        };
        UaFamily {
            browser: pick(&self.browsers),
            os: pick(&self.systems),
        }
    }

    pub fn device(&self, user_agent: &str) -> DeviceInfo {
        let family = self.family(user_agent);
        DeviceInfo {
            browser: family.browser.to_string(),
            os: family.os.to_string(),
            kind: self.kind_of(user_agent, family),
            raw_ua: user_agent.chars().take(RAW_UA_CHARS).collect(),
        }
    }

    fn kind_of(&self, user_agent: &str, family: UaFamily) -> DeviceKind {
        if user_agent.is_empty() {
            return DeviceKind::Unknown;
        }
        if self.bots.is_match(user_agent)
            || matches!(family.browser, "curl" | "Wget" | "Python Requests")
        {
            return DeviceKind::Bot;
        }
        let android = family.os == "Android";
        if user_agent.contains("iPad")
            || user_agent.contains("Tablet")
            || (android && !user_agent.contains("Mobile"))
        {
            return DeviceKind::Tablet;
        }
        if android || family.os == "iOS" || user_agent.contains("Mobi") {
            return DeviceKind::Mobile;
        }
        match family.os {
            "Windows" | "Mac OS X" | "Linux" | "Chrome OS" => DeviceKind::Pc,
            _ => DeviceKind::Unknown,
        }
    }
}

/// Why a bound session was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BindingViolation {
    UserAgentChanged,
    NetworkChanged { bound: String, current: String },
}

impl fmt::Display for BindingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserAgentChanged => write!(f, "user agent changed"),
            Self::NetworkChanged { bound, current } => {
                write!(f, "network changed from {bound:?} to {current:?}")
            }
        }
    }
}

/// Result of comparing a stored fingerprint against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingCheck {
    /// The stored fingerprint is incomplete; the session should be (re)bound.
    Unbound,
    Match,
    Violation(BindingViolation),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BindingOutcome {
    /// Fingerprint recorded for this request.
    Bound,
    Continue,
    /// The session was removed from the store.
    Invalidated { violation: BindingViolation },
}

pub struct BindingPolicy {
    ip_prefix_octets: usize,
    ua_match: UaMatchMode,
    classifier: UaClassifier,
}

impl BindingPolicy {
    pub fn from_config(config: &BindingConfig) -> Result<Self> {
        Ok(Self {
            ip_prefix_octets: config.ip_prefix_octets,
            ua_match: config.ua_match,
            classifier: UaClassifier::new()?,
        })
    }

    pub fn prefix(&self, ip: &str) -> String {
        ip_prefix(ip, self.ip_prefix_octets)
    }

    pub fn ua_family(&self, user_agent: &str) -> UaFamily {
        self.classifier.family(user_agent)
    }

    fn same_agent(&self, bound: &str, current: &str) -> bool {
        match self.ua_match {
            UaMatchMode::Exact => bound == current,
            UaMatchMode::Family => self.ua_family(bound) == self.ua_family(current),
        }
    }

    pub fn evaluate(&self, stored: &SessionFingerprint, request: &RequestFingerprint) -> BindingCheck {
        let bound_prefix = self.prefix(&stored.ip);
        if stored.user_agent.is_empty() || bound_prefix.is_empty() {
            return BindingCheck::Unbound;
        }
        if !self.same_agent(&stored.user_agent, &request.user_agent) {
            return BindingCheck::Violation(BindingViolation::UserAgentChanged);
        }
        let current_prefix = self.prefix(&request.ip);
        if bound_prefix != current_prefix {
            return BindingCheck::Violation(BindingViolation::NetworkChanged {
                bound: bound_prefix,
                current: current_prefix,
            });
        }
        BindingCheck::Match
    }
}

fn compile_pattern(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| CsnError::Runtime {
        details: format!("user agent pattern for {name} failed to compile: {e}"),
    })
}

fn compile_families(table: &[(&'static str, &str)]) -> Result<Vec<(&'static str, Regex)>> {
    table
        .iter()
        .map(|(name, pattern)| compile_pattern(name, pattern).map(|re| (*name, re)))
        .collect()
}

/// Applies the binding policy against a session store.
pub struct SessionGuard<S> {
    store: S,
    policy: BindingPolicy,
    logger: Option<ActivityLoggerHandle>,
}

impl<S: SessionStore> SessionGuard<S> {
    pub fn new(store: S, policy: BindingPolicy, logger: Option<ActivityLoggerHandle>) -> Self {
        Self {
            store,
            policy,
            logger,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &BindingPolicy {
        &self.policy
    }

    /// Check one request; binds, passes, or flushes the session.
    pub fn check(
        &self,
        session_id: &str,
        request: &RequestFingerprint,
        now: DateTime<Utc>,
    ) -> Result<BindingOutcome> {
        let stored = self.store.get(session_id)?;
        let check = stored
            .as_ref()
            .map_or(BindingCheck::Unbound, |fp| self.policy.evaluate(fp, request));

        match check {
            BindingCheck::Unbound => {
                // Rebinding keeps the original session start.
                let created_at = stored.map_or(now, |fp| fp.created_at);
                self.store.put(
                    session_id,
                    &SessionFingerprint::from_request(request, created_at),
                )?;
                self.log(ActivityEvent::SessionBound {
                    session: session_id.to_string(),
                });
                Ok(BindingOutcome::Bound)
            }
            BindingCheck::Match => Ok(BindingOutcome::Continue),
            BindingCheck::Violation(violation) => {
                self.store.remove(session_id)?;
                self.log(ActivityEvent::SessionInvalidated {
                    session: session_id.to_string(),
                    reason: violation.to_string(),
                });
                Ok(BindingOutcome::Invalidated { violation })
            }
        }
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemorySessionStore;

    const CHROME_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
    const CHROME_WIN_NEXT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";
    const EDGE_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.2592.87";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";
    const FIREFOX_ANDROID: &str = "Mozilla/5.0 (Android 14; Mobile; rv:128.0) Gecko/128.0 Firefox/128.0";

    fn policy(ua_match: UaMatchMode) -> BindingPolicy {
        BindingPolicy::from_config(&BindingConfig {
            ip_prefix_octets: 2,
            ua_match,
        })
        .unwrap()
    }

    fn guard(ua_match: UaMatchMode) -> SessionGuard<MemorySessionStore> {
        SessionGuard::new(MemorySessionStore::new(), policy(ua_match), None)
    }

    #[test]
    fn families_are_detected() {
        let p = policy(UaMatchMode::Family);
        assert_eq!(
            p.ua_family(CHROME_WIN),
            UaFamily {
                browser: "Chrome",
                os: "Windows"
            }
        );
        assert_eq!(p.ua_family(EDGE_WIN).browser, "Edge");
        assert_eq!(
            p.ua_family(SAFARI_IPHONE),
            UaFamily {
                browser: "Safari",
                os: "iOS"
            }
        );
        assert_eq!(p.ua_family(FIREFOX_ANDROID).os, "Android");
        assert_eq!(p.ua_family("curl/8.4.0").browser, "curl");
        assert_eq!(p.ua_family("").browser, OTHER);
    }

    #[test]
    fn devices_are_classified() {
        let c = UaClassifier::new().unwrap();
        let pc = c.device(CHROME_WIN);
        assert_eq!((pc.browser.as_str(), pc.os.as_str()), ("Chrome", "Windows"));
        assert_eq!(pc.kind, DeviceKind::Pc);
        assert_eq!(pc.label(), "Chrome on Windows (pc)");
        assert_eq!(pc.raw_ua.chars().count(), RAW_UA_CHARS);
        assert_eq!(c.device(SAFARI_IPHONE).kind, DeviceKind::Mobile);
        assert_eq!(c.device(FIREFOX_ANDROID).kind, DeviceKind::Mobile);
        let tablet = "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
        assert_eq!(c.device(tablet).kind, DeviceKind::Tablet);
        assert_eq!(c.device("curl/8.4.0").kind, DeviceKind::Bot);
        assert_eq!(c.device("Googlebot/2.1 (+http://www.google.com/bot.html)").kind, DeviceKind::Bot);
        let empty = c.device("");
        assert_eq!(empty.kind, DeviceKind::Unknown);
        assert_eq!(empty.browser, OTHER);
        assert_eq!(c.device("nikto/2.5").kind, DeviceKind::Unknown);
    }

    #[test]
    fn first_request_binds() {
        let g = guard(UaMatchMode::Exact);
        let now = Utc::now();
        let req = RequestFingerprint::new("192.168.1.100", CHROME_WIN);
        assert_eq!(g.check("s1", &req, now).unwrap(), BindingOutcome::Bound);
        assert_eq!(
            g.store().get("s1").unwrap().unwrap(),
            SessionFingerprint::from_request(&req, now)
        );
        assert_eq!(g.check("s1", &req, now).unwrap(), BindingOutcome::Continue);
    }

    #[test]
    fn same_prefix_new_host_continues() {
        let g = guard(UaMatchMode::Exact);
        let now = Utc::now();
        g.check("s1", &RequestFingerprint::new("192.168.1.100", CHROME_WIN), now)
            .unwrap();
        let moved = RequestFingerprint::new("192.168.44.2", CHROME_WIN);
        assert_eq!(g.check("s1", &moved, now).unwrap(), BindingOutcome::Continue);
    }

    #[test]
    fn network_change_invalidates() {
        let g = guard(UaMatchMode::Exact);
        let now = Utc::now();
        g.check("s1", &RequestFingerprint::new("192.168.1.100", CHROME_WIN), now)
            .unwrap();
        let outcome = g
            .check("s1", &RequestFingerprint::new("203.45.67.89", CHROME_WIN), now)
            .unwrap();
        assert_eq!(
            outcome,
            BindingOutcome::Invalidated {
                violation: BindingViolation::NetworkChanged {
                    bound: "192.168".to_string(),
                    current: "203.45".to_string(),
                }
            }
        );
        assert!(g.store().get("s1").unwrap().is_none());
    }

    #[test]
    fn exact_mode_rejects_browser_update() {
        let g = guard(UaMatchMode::Exact);
        let now = Utc::now();
        g.check("s1", &RequestFingerprint::new("10.1.2.3", CHROME_WIN), now)
            .unwrap();
        let outcome = g
            .check("s1", &RequestFingerprint::new("10.1.2.3", CHROME_WIN_NEXT), now)
            .unwrap();
        assert_eq!(
            outcome,
            BindingOutcome::Invalidated {
                violation: BindingViolation::UserAgentChanged
            }
        );
    }

    #[test]
    fn family_mode_tolerates_browser_update() {
        let g = guard(UaMatchMode::Family);
        let now = Utc::now();
        g.check("s1", &RequestFingerprint::new("10.1.2.3", CHROME_WIN), now)
            .unwrap();
        assert_eq!(
            g.check("s1", &RequestFingerprint::new("10.1.2.3", CHROME_WIN_NEXT), now)
                .unwrap(),
            BindingOutcome::Continue
        );
        assert!(matches!(
            g.check("s1", &RequestFingerprint::new("10.1.2.3", SAFARI_IPHONE), now)
                .unwrap(),
            BindingOutcome::Invalidated { .. }
        ));
    }

    #[test]
    fn incomplete_fingerprint_is_rebound_keeping_start() {
        let g = guard(UaMatchMode::Exact);
        let start = Utc::now() - chrono::TimeDelta::days(3);
        g.store()
            .put("s1", &SessionFingerprint::new("", CHROME_WIN, start))
            .unwrap();
        let req = RequestFingerprint::new("172.16.0.4", CHROME_WIN);
        assert_eq!(g.check("s1", &req, Utc::now()).unwrap(), BindingOutcome::Bound);
        let stored = g.store().get("s1").unwrap().unwrap();
        assert_eq!(stored.ip, "172.16.0.4");
        assert_eq!(stored.created_at, start);
    }

    #[test]
    fn invalidation_is_logged() {
        let (handle, rx) = ActivityLoggerHandle::capture();
        let g = SessionGuard::new(
            MemorySessionStore::new(),
            policy(UaMatchMode::Exact),
            Some(handle),
        );
        let now = Utc::now();
        g.check("s9", &RequestFingerprint::new("10.0.0.1", CHROME_WIN), now)
            .unwrap();
        g.check("s9", &RequestFingerprint::new("10.0.0.1", "sqlmap/1.7"), now)
            .unwrap();
        let events: Vec<ActivityEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ActivityEvent::SessionBound {
                    session: "s9".to_string()
                },
                ActivityEvent::SessionInvalidated {
                    session: "s9".to_string(),
                    reason: "user agent changed".to_string(),
                },
            ]
        );
    }

    #[test]
    fn store_failure_propagates() {
        let g = guard(UaMatchMode::Exact);
        g.store().set_failing(true);
        let err = g
            .check("s1", &RequestFingerprint::new("10.0.0.1", CHROME_WIN), Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "CSN-2006");
    }
}
