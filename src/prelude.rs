//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use campaign_sentry::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{CsnError, Result};

// Storage
pub use crate::storage::blob::{BlobStore, DeleteStatus, FsBlobStore, MemoryBlobStore};
pub use crate::storage::reconciler::Reconciler;
#[cfg(feature = "sqlite")]
pub use crate::storage::records::SqliteRecordStore;
pub use crate::storage::records::{MemoryRecordStore, RecordStore};
pub use crate::storage::report::{CleanupOutcome, CleanupReport, Recommendation, StorageStats};

// Session
pub use crate::session::binding::{BindingOutcome, BindingPolicy, SessionGuard};
pub use crate::session::fingerprint::{RequestFingerprint, SessionFingerprint};
pub use crate::session::scoring::{RiskAssessment, RiskLevel, RiskScorer, TrustDecision};
#[cfg(feature = "sqlite")]
pub use crate::session::store::SqliteSessionStore;
pub use crate::session::store::{MemorySessionStore, SessionStore};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
