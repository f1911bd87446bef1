//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{CsnError, Result};

/// SQL identifiers interpolated into record-store queries must match this.
const SQL_IDENT_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Full campaign sentry configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub records: RecordsConfig,
    pub trust: TrustConfig,
    pub binding: BindingConfig,
    pub paths: PathsConfig,
}

/// Blob store layout and reconciliation knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the media store; file identifiers are relative to it.
    pub media_root: PathBuf,
    /// Subdirectory (relative to `media_root`) holding uploaded posters.
    pub poster_dir: String,
    /// Total poster size above which the report recommends compression.
    pub compression_threshold_bytes: u64,
    /// Total poster size above which the stats view warns about usage.
    pub large_usage_warning_bytes: u64,
    /// Orphans younger than this are skipped by a real cleanup. 0 disables.
    pub min_orphan_age_minutes: u64,
}

/// Campaign record store location and the column holding poster references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecordsConfig {
    pub database: PathBuf,
    pub table: String,
    pub column: String,
}

/// Heuristic constants for the session risk scorer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrustConfig {
    pub stale_after_days: u32,
    pub old_after_days: u32,
    pub ancient_after_days: u32,
    pub stale_penalty: u32,
    pub old_penalty: u32,
    pub ancient_penalty: u32,
    /// Added when the /24 prefix (first three octets) differs.
    pub subnet_penalty: u32,
    /// Added on top of `subnet_penalty` when the /16 prefix differs too.
    pub network_penalty: u32,
    pub highly_suspicious_penalty: u32,
    pub moderately_suspicious_penalty: u32,
    pub highly_suspicious_agents: Vec<String>,
    pub moderately_suspicious_agents: Vec<String>,
    pub high_level: u32,
    pub medium_level: u32,
    pub low_level: u32,
    pub very_low_level: u32,
}

/// How the request path decides whether a session is still bound to its client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UaMatchMode {
    /// User-agent strings must be byte-identical.
    #[default]
    Exact,
    /// Only the browser and OS families must agree.
    Family,
}

/// Session binding policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BindingConfig {
    /// Number of leading dotted octets that must match.
    pub ip_prefix_octets: usize,
    pub ua_match: UaMatchMode,
}

/// Filesystem paths used by csen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
    pub session_db: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("media"),
            poster_dir: "uploads/admanager/posters".to_string(),
            compression_threshold_bytes: 100 * 1024 * 1024,
            large_usage_warning_bytes: 50 * 1024 * 1024,
            min_orphan_age_minutes: 0,
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("db.sqlite3"),
            table: "ads_admanager".to_string(),
            column: "poster".to_string(),
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            stale_after_days: 30,
            old_after_days: 60,
            ancient_after_days: 90,
            stale_penalty: 3,
            old_penalty: 8,
            ancient_penalty: 15,
            subnet_penalty: 2,
            network_penalty: 5,
            highly_suspicious_penalty: 25,
            moderately_suspicious_penalty: 5,
            highly_suspicious_agents: [
                "sqlmap", "nikto", "nmap", "masscan", "exploit", "hack", "attack",
            ]
            .map(String::from)
            .to_vec(),
            moderately_suspicious_agents: [
                "bot",
                "crawler",
                "spider",
                "automated",
                "curl",
                "wget",
                "python-requests",
            ]
            .map(String::from)
            .to_vec(),
            high_level: 50,
            medium_level: 25,
            low_level: 10,
            very_low_level: 3,
        }
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            ip_prefix_octets: 2,
            ua_match: UaMatchMode::Exact,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[CSN-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("csen").join("config.toml");
        let data = home_dir.join(".local").join("share").join("csen");
        Self {
            config_file: cfg,
            jsonl_log: data.join("activity.jsonl"),
            session_db: data.join("sessions.sqlite3"),
        }
    }
}

impl StorageConfig {
    /// Absolute-or-relative directory holding posters on disk.
    #[must_use]
    pub fn poster_path(&self) -> PathBuf {
        self.media_root.join(&self.poster_dir)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| CsnError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(CsnError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for log correlation (FNV-1a).
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // storage
        if let Some(raw) = lookup("CSN_STORAGE_MEDIA_ROOT") {
            self.storage.media_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CSN_STORAGE_POSTER_DIR") {
            self.storage.poster_dir = raw;
        }
        set_u64(
            &mut lookup,
            "CSN_STORAGE_COMPRESSION_THRESHOLD_BYTES",
            &mut self.storage.compression_threshold_bytes,
        )?;
        set_u64(
            &mut lookup,
            "CSN_STORAGE_LARGE_USAGE_WARNING_BYTES",
            &mut self.storage.large_usage_warning_bytes,
        )?;
        set_u64(
            &mut lookup,
            "CSN_STORAGE_MIN_ORPHAN_AGE_MINUTES",
            &mut self.storage.min_orphan_age_minutes,
        )?;

        // records
        if let Some(raw) = lookup("CSN_RECORDS_DATABASE") {
            self.records.database = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CSN_RECORDS_TABLE") {
            self.records.table = raw;
        }
        if let Some(raw) = lookup("CSN_RECORDS_COLUMN") {
            self.records.column = raw;
        }

        // trust
        for (name, slot) in [
            ("CSN_TRUST_STALE_AFTER_DAYS", &mut self.trust.stale_after_days),
            ("CSN_TRUST_OLD_AFTER_DAYS", &mut self.trust.old_after_days),
            (
                "CSN_TRUST_ANCIENT_AFTER_DAYS",
                &mut self.trust.ancient_after_days,
            ),
            ("CSN_TRUST_SUBNET_PENALTY", &mut self.trust.subnet_penalty),
            ("CSN_TRUST_NETWORK_PENALTY", &mut self.trust.network_penalty),
            (
                "CSN_TRUST_HIGHLY_SUSPICIOUS_PENALTY",
                &mut self.trust.highly_suspicious_penalty,
            ),
            (
                "CSN_TRUST_MODERATELY_SUSPICIOUS_PENALTY",
                &mut self.trust.moderately_suspicious_penalty,
            ),
        ] {
            if let Some(raw) = lookup(name) {
                *slot = parse_env(name, &raw)?;
            }
        }

        // binding
        if let Some(raw) = lookup("CSN_BINDING_IP_PREFIX_OCTETS") {
            self.binding.ip_prefix_octets = parse_env("CSN_BINDING_IP_PREFIX_OCTETS", &raw)?;
        }
        if let Some(raw) = lookup("CSN_BINDING_UA_MATCH") {
            self.binding.ua_match = match raw.trim().to_ascii_lowercase().as_str() {
                "exact" => UaMatchMode::Exact,
                "family" => UaMatchMode::Family,
                other => {
                    return Err(CsnError::ConfigParse {
                        context: "env",
                        details: format!(
                            "CSN_BINDING_UA_MATCH={other:?}: expected \"exact\" or \"family\""
                        ),
                    });
                }
            };
        }

        // paths
        if let Some(raw) = lookup("CSN_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CSN_PATHS_SESSION_DB") {
            self.paths.session_db = PathBuf::from(raw);
        }

        Ok(())
    }

    fn normalize(&mut self) {
        let trimmed = self.storage.poster_dir.trim().trim_matches('/');
        self.storage.poster_dir = trimmed.to_string();

        for list in [
            &mut self.trust.highly_suspicious_agents,
            &mut self.trust.moderately_suspicious_agents,
        ] {
            for pattern in list.iter_mut() {
                *pattern = pattern.trim().to_ascii_lowercase();
            }
            list.retain(|p| !p.is_empty());
        }
    }

    fn validate(&self) -> Result<()> {
        if self.storage.poster_dir.is_empty() {
            return Err(CsnError::InvalidConfig {
                details: "storage.poster_dir must not be empty".to_string(),
            });
        }
        let poster_dir = Path::new(&self.storage.poster_dir);
        if poster_dir.is_absolute()
            || poster_dir
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CsnError::InvalidConfig {
                details: format!(
                    "storage.poster_dir must be a plain relative path, got {:?}",
                    self.storage.poster_dir
                ),
            });
        }

        for (name, value) in [
            ("records.table", &self.records.table),
            ("records.column", &self.records.column),
        ] {
            validate_sql_identifier(name, value)?;
        }

        let t = &self.trust;
        if !(t.stale_after_days < t.old_after_days && t.old_after_days < t.ancient_after_days) {
            return Err(CsnError::InvalidConfig {
                details: "trust age thresholds must strictly ascend: stale < old < ancient"
                    .to_string(),
            });
        }
        if !(t.stale_penalty <= t.old_penalty && t.old_penalty <= t.ancient_penalty) {
            return Err(CsnError::InvalidConfig {
                details: "trust age penalties must not decrease with age".to_string(),
            });
        }
        if !(t.high_level > t.medium_level
            && t.medium_level > t.low_level
            && t.low_level > t.very_low_level)
        {
            return Err(CsnError::InvalidConfig {
                details: "trust levels must strictly descend: high > medium > low > very_low"
                    .to_string(),
            });
        }
        if t.high_level > 100 {
            return Err(CsnError::InvalidConfig {
                details: format!("trust.high_level must be <= 100, got {}", t.high_level),
            });
        }

        if !(1..=4).contains(&self.binding.ip_prefix_octets) {
            return Err(CsnError::InvalidConfig {
                details: format!(
                    "binding.ip_prefix_octets must be in [1, 4], got {}",
                    self.binding.ip_prefix_octets
                ),
            });
        }

        Ok(())
    }
}

/// Reject anything that is not a bare SQL identifier.
pub fn validate_sql_identifier(name: &str, value: &str) -> Result<()> {
    let pattern = Regex::new(SQL_IDENT_PATTERN).map_err(|err| CsnError::InvalidConfig {
        details: format!("identifier pattern failed to compile: {err}"),
    })?;
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(CsnError::InvalidConfig {
            details: format!("{name} must be a plain SQL identifier, got {value:?}"),
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| CsnError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, CsnError, UaMatchMode};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(
            cfg.storage.poster_path(),
            PathBuf::from("media/uploads/admanager/posters")
        );
    }

    #[test]
    fn toml_sections_are_optional() {
        let cfg: Config = toml::from_str(
            r#"
            [storage]
            media_root = "/srv/media"

            [trust]
            ancient_penalty = 20
            "#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.storage.media_root, PathBuf::from("/srv/media"));
        assert_eq!(cfg.storage.poster_dir, "uploads/admanager/posters");
        assert_eq!(cfg.trust.ancient_penalty, 20);
        assert_eq!(cfg.trust.old_penalty, 8);
        assert_eq!(cfg.records.table, "ads_admanager");
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("CSN_STORAGE_MEDIA_ROOT", "/srv/media"),
            ("CSN_STORAGE_MIN_ORPHAN_AGE_MINUTES", "15"),
            ("CSN_RECORDS_TABLE", "campaigns"),
            ("CSN_TRUST_SUBNET_PENALTY", "4"),
            ("CSN_BINDING_UA_MATCH", "Family"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("overrides should parse");

        assert_eq!(cfg.storage.media_root, PathBuf::from("/srv/media"));
        assert_eq!(cfg.storage.min_orphan_age_minutes, 15);
        assert_eq!(cfg.records.table, "campaigns");
        assert_eq!(cfg.trust.subnet_penalty, 4);
        assert_eq!(cfg.binding.ua_match, UaMatchMode::Family);
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("CSN_TRUST_NETWORK_PENALTY", "five")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid number should fail");
        match err {
            CsnError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("CSN_TRUST_NETWORK_PENALTY"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn env_invalid_ua_match_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("CSN_BINDING_UA_MATCH", "fuzzy")]);
        assert!(
            cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
                .is_err()
        );
    }

    #[test]
    fn sql_identifiers_are_checked() {
        let mut cfg = Config::default();
        cfg.records.table = "ads; DROP TABLE users".to_string();
        let err = cfg.validate().expect_err("injection attempt must be rejected");
        assert!(err.to_string().contains("records.table"));
    }

    #[test]
    fn poster_dir_cannot_escape_media_root() {
        let mut cfg = Config::default();
        cfg.storage.poster_dir = "../outside".to_string();
        assert!(cfg.validate().is_err());

        cfg.storage.poster_dir = "/abs/posters".to_string();
        cfg.normalize();
        // Leading slash is trimmed, so this becomes relative and valid.
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.storage.poster_dir, "abs/posters");
    }

    #[test]
    fn age_thresholds_must_ascend() {
        let mut cfg = Config::default();
        cfg.trust.old_after_days = 20;
        let err = cfg.validate().expect_err("expected threshold error");
        assert!(err.to_string().contains("strictly ascend"));
    }

    #[test]
    fn levels_must_descend() {
        let mut cfg = Config::default();
        cfg.trust.low_level = 30;
        let err = cfg.validate().expect_err("expected level error");
        assert!(err.to_string().contains("strictly descend"));
    }

    #[test]
    fn binding_prefix_range_enforced() {
        let mut cfg = Config::default();
        cfg.binding.ip_prefix_octets = 0;
        assert!(cfg.validate().is_err());
        cfg.binding.ip_prefix_octets = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn normalize_lowercases_agent_patterns() {
        let mut cfg = Config::default();
        cfg.trust.highly_suspicious_agents = vec![" SQLMap ".to_string(), String::new()];
        cfg.normalize();
        assert_eq!(cfg.trust.highly_suspicious_agents, vec!["sqlmap".to_string()]);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/csen/config.toml")));
        assert!(matches!(result, Err(CsnError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\nposter_dir = \"posters/\"\n").unwrap();
        let cfg = Config::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.storage.poster_dir, "posters");
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let cfg = Config::default();
        let h1 = cfg.stable_hash().expect("hash");
        assert_eq!(h1, cfg.stable_hash().expect("hash"));
        let mut modified = Config::default();
        modified.trust.ancient_penalty += 1;
        assert_ne!(h1, modified.stable_hash().expect("hash"));
    }
}
