//! CSN-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, CsnError>;

/// Top-level error type for campaign sentry.
#[derive(Debug, Error)]
pub enum CsnError {
    #[error("[CSN-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[CSN-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[CSN-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[CSN-2001] storage unavailable at {path}: {details}")]
    StorageUnavailable { path: PathBuf, details: String },

    #[error("[CSN-2002] record store unavailable: {details}")]
    RecordStoreUnavailable { details: String },

    #[error("[CSN-2003] failed to delete {file}: {details}")]
    FileDeletionFailed { file: String, details: String },

    #[error("[CSN-2004] referenced file missing from storage: {file}")]
    IntegrityMismatch { file: String },

    #[error("[CSN-2005] safety veto for {file}: {reason}")]
    SafetyVeto { file: String, reason: String },

    #[error("[CSN-2006] session store failure: {details}")]
    SessionStore { details: String },

    #[error("[CSN-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[CSN-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[CSN-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[CSN-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl CsnError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CSN-1001",
            Self::MissingConfig { .. } => "CSN-1002",
            Self::ConfigParse { .. } => "CSN-1003",
            Self::StorageUnavailable { .. } => "CSN-2001",
            Self::RecordStoreUnavailable { .. } => "CSN-2002",
            Self::FileDeletionFailed { .. } => "CSN-2003",
            Self::IntegrityMismatch { .. } => "CSN-2004",
            Self::SafetyVeto { .. } => "CSN-2005",
            Self::SessionStore { .. } => "CSN-2006",
            Self::Serialization { .. } => "CSN-2101",
            Self::Sql { .. } => "CSN-2102",
            Self::Io { .. } => "CSN-3002",
            Self::Runtime { .. } => "CSN-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::StorageUnavailable { .. }
                | Self::RecordStoreUnavailable { .. }
                | Self::FileDeletionFailed { .. }
                | Self::SessionStore { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for CsnError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for CsnError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for CsnError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
