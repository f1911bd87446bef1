//! Session risk scoring: age, IP drift and user-agent heuristics summed into a
//! bounded score, then bucketed into a discrete level.
//!
//! The scorer is a pure function of (stored fingerprint, current request, now).
//! It performs no I/O and never fails.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::TrustConfig;
use crate::session::fingerprint::{RequestFingerprint, SessionFingerprint, ip_prefix};

/// Upper bound of every score.
pub const MAX_RISK_SCORE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "MINIMAL")]
    Minimal,
    #[serde(rename = "VERY LOW")]
    VeryLow,
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

impl RiskLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "MINIMAL",
            Self::VeryLow => "VERY LOW",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory action for a risk level. Nothing in the request path acts on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustDecision {
    Continue,
    Warn,
    Invalidate,
}

impl TrustDecision {
    #[must_use]
    pub const fn for_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::High => Self::Invalidate,
            RiskLevel::Medium => Self::Warn,
            RiskLevel::Low | RiskLevel::VeryLow | RiskLevel::Minimal => Self::Continue,
        }
    }
}

/// Which user-agent pattern list matched, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSuspicion {
    None,
    Moderate,
    High,
}

/// Per-component contributions before clamping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub age: u32,
    pub ip: u32,
    pub user_agent: u32,
}

impl RiskFactors {
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.age.saturating_add(self.ip).saturating_add(self.user_agent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub decision: TrustDecision,
    pub factors: RiskFactors,
}

#[derive(Debug, Clone)]
pub struct RiskScorer {
    config: TrustConfig,
}

impl RiskScorer {
    #[must_use]
    pub fn from_config(config: &TrustConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Score in `[0, 100]`.
    #[must_use]
    pub fn risk_score(
        &self,
        stored: &SessionFingerprint,
        current: &RequestFingerprint,
        now: DateTime<Utc>,
    ) -> u32 {
        self.factors(stored, current, now)
            .total()
            .min(MAX_RISK_SCORE)
    }

    #[must_use]
    pub fn assess(
        &self,
        stored: &SessionFingerprint,
        current: &RequestFingerprint,
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let factors = self.factors(stored, current, now);
        let score = factors.total().min(MAX_RISK_SCORE);
        let level = self.level(score);
        RiskAssessment {
            score,
            level,
            decision: TrustDecision::for_level(level),
            factors,
        }
    }

    #[must_use]
    pub fn factors(
        &self,
        stored: &SessionFingerprint,
        current: &RequestFingerprint,
        now: DateTime<Utc>,
    ) -> RiskFactors {
        RiskFactors {
            age: self.age_penalty(stored.age(now)),
            ip: self.ip_penalty(&stored.ip, &current.ip),
            user_agent: self.agent_penalty(&stored.user_agent),
        }
    }

    #[must_use]
    pub const fn level(&self, score: u32) -> RiskLevel {
        let t = &self.config;
        if score >= t.high_level {
            RiskLevel::High
        } else if score >= t.medium_level {
            RiskLevel::Medium
        } else if score >= t.low_level {
            RiskLevel::Low
        } else if score >= t.very_low_level {
            RiskLevel::VeryLow
        } else {
            RiskLevel::Minimal
        }
    }

    /// Thresholds are exclusive: exactly 30 days old is not yet stale.
    #[must_use]
    pub fn age_penalty(&self, age: TimeDelta) -> u32 {
        let t = &self.config;
        let exceeds = |days: u32| age > TimeDelta::days(i64::from(days));
        if exceeds(t.ancient_after_days) {
            t.ancient_penalty
        } else if exceeds(t.old_after_days) {
            t.old_penalty
        } else if exceeds(t.stale_after_days) {
            t.stale_penalty
        } else {
            0
        }
    }

    /// Skipped when either address is unknown.
    #[must_use]
    pub fn ip_penalty(&self, stored_ip: &str, current_ip: &str) -> u32 {
        if stored_ip.is_empty() || current_ip.is_empty() {
            return 0;
        }
        if ip_prefix(stored_ip, 3) == ip_prefix(current_ip, 3) {
            return 0;
        }
        let mut penalty = self.config.subnet_penalty;
        if ip_prefix(stored_ip, 2) != ip_prefix(current_ip, 2) {
            penalty += self.config.network_penalty;
        }
        penalty
    }

    /// Only the agent recorded on the session is judged; at most one penalty applies.
    #[must_use]
    pub fn agent_penalty(&self, stored_ua: &str) -> u32 {
        match self.suspicion(stored_ua) {
            AgentSuspicion::High => self.config.highly_suspicious_penalty,
            AgentSuspicion::Moderate => self.config.moderately_suspicious_penalty,
            AgentSuspicion::None => 0,
        }
    }

    #[must_use]
    pub fn suspicion(&self, user_agent: &str) -> AgentSuspicion {
        let ua = user_agent.to_ascii_lowercase();
        let hit = |patterns: &[String]| patterns.iter().any(|p| ua.contains(p.as_str()));
        if hit(&self.config.highly_suspicious_agents) {
            AgentSuspicion::High
        } else if hit(&self.config.moderately_suspicious_agents) {
            AgentSuspicion::Moderate
        } else {
            AgentSuspicion::None
        }
    }
}
