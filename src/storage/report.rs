//! Report types produced by the reconciler.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::CsnError;
use crate::core::format::format_size;

// ──────────────────── statistics ────────────────────

/// Aggregate size figures over the poster directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub total_size_formatted: String,
    pub average_size_bytes: u64,
    pub largest_file_bytes: u64,
    pub smallest_file_bytes: u64,
}

impl StorageStats {
    /// Fold per-file sizes into stats. `scanned` is the number of files found;
    /// files whose size could not be read still count but are absent from `sizes`.
    #[must_use]
    pub fn from_sizes(scanned: usize, sizes: &[u64]) -> Self {
        let total: u64 = sizes.iter().sum();
        let count = scanned;
        Self {
            total_files: count,
            total_size_bytes: total,
            total_size_formatted: format_size(total),
            average_size_bytes: if count == 0 { 0 } else { total / count as u64 },
            largest_file_bytes: sizes.iter().copied().max().unwrap_or(0),
            smallest_file_bytes: sizes.iter().copied().min().unwrap_or(0),
        }
    }
}

// ──────────────────── integrity ────────────────────

/// Partition of the referenced set by presence in storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub existing: Vec<String>,
    pub missing: Vec<String>,
}

impl IntegrityCheck {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
    }

    /// One `IntegrityMismatch` per missing reference, for reporting.
    #[must_use]
    pub fn mismatches(&self) -> Vec<CsnError> {
        self.missing
            .iter()
            .map(|file| CsnError::IntegrityMismatch { file: file.clone() })
            .collect()
    }
}

// ──────────────────── recommendations ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Recommendation {
    CleanupOrphans { count: usize },
    FixMissingReferences { count: usize },
    CompressLargePosters,
    NoActionNeeded,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CleanupOrphans { count } => {
                write!(f, "Clean up {count} orphaned files to free storage space")
            }
            Self::FixMissingReferences { count } => {
                write!(f, "Fix {count} database references to missing files")
            }
            Self::CompressLargePosters => {
                write!(f, "Consider implementing image compression for large poster files")
            }
            Self::NoActionNeeded => write!(f, "Storage is well-maintained, no action needed"),
        }
    }
}

impl From<Recommendation> for String {
    fn from(value: Recommendation) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Recommendation {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let count_between = |prefix: &str, suffix: &str| {
            value
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
                .and_then(|n| n.parse::<usize>().ok())
        };
        if let Some(count) = count_between("Clean up ", " orphaned files to free storage space") {
            return Ok(Self::CleanupOrphans { count });
        }
        if let Some(count) = count_between("Fix ", " database references to missing files") {
            return Ok(Self::FixMissingReferences { count });
        }
        if value == Self::CompressLargePosters.to_string() {
            return Ok(Self::CompressLargePosters);
        }
        if value == Self::NoActionNeeded.to_string() {
            return Ok(Self::NoActionNeeded);
        }
        Err(format!("unrecognized recommendation: {value:?}"))
    }
}

/// Derive recommendations in a fixed order: orphans, missing, compression.
#[must_use]
pub fn recommend(
    orphan_count: usize,
    missing_count: usize,
    total_size_bytes: u64,
    compression_threshold_bytes: u64,
) -> Vec<Recommendation> {
    let mut out = Vec::new();
    if orphan_count > 0 {
        out.push(Recommendation::CleanupOrphans {
            count: orphan_count,
        });
    }
    if missing_count > 0 {
        out.push(Recommendation::FixMissingReferences {
            count: missing_count,
        });
    }
    if total_size_bytes > compression_threshold_bytes {
        out.push(Recommendation::CompressLargePosters);
    }
    if out.is_empty() {
        out.push(Recommendation::NoActionNeeded);
    }
    out
}

// ──────────────────── full report ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanSummary {
    pub count: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySummary {
    pub existing_count: usize,
    pub missing_count: usize,
    pub missing_files: Vec<String>,
}

/// Everything an operator needs to decide on a cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// RFC 3339 UTC.
    pub generated_at: String,
    pub storage_stats: StorageStats,
    pub orphaned_files: OrphanSummary,
    pub integrity_check: IntegritySummary,
    pub recommendations: Vec<Recommendation>,
    /// Degraded reads encountered while building the report.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// ──────────────────── cleanup outcome ────────────────────

/// Per-file result of a cleanup attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeletionStatus {
    Deleted,
    /// The file vanished between scan and delete; counted as success.
    AlreadyGone,
    Failed { code: String, error: String },
    /// Not attempted (e.g. younger than the grace period).
    Skipped { reason: String },
}

impl DeletionStatus {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Deleted | Self::AlreadyGone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDeletion {
    pub file: String,
    #[serde(flatten)]
    pub status: DeletionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub dry_run: bool,
    /// The record store could not be read, so no deletion was attempted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub references_unavailable: bool,
    /// Orphans a real run would attempt. Only populated for dry runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preview: Vec<String>,
    pub results: Vec<FileDeletion>,
}

impl CleanupOutcome {
    /// Files removed (or already absent).
    #[must_use]
    pub fn deleted(&self) -> Vec<&str> {
        self.files_where(DeletionStatus::is_success)
    }

    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.files_where(|s| matches!(s, DeletionStatus::Failed { .. }))
    }

    #[must_use]
    pub fn skipped(&self) -> Vec<&str> {
        self.files_where(|s| matches!(s, DeletionStatus::Skipped { .. }))
    }

    fn files_where(&self, pred: impl Fn(&DeletionStatus) -> bool) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| pred(&r.status))
            .map(|r| r.file.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_from_sizes() {
        let stats = StorageStats::from_sizes(3, &[100, 300, 2048]);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_size_bytes, 2448);
        assert_eq!(stats.total_size_formatted, "2.4 KB");
        assert_eq!(stats.average_size_bytes, 816);
        assert_eq!(stats.largest_file_bytes, 2048);
        assert_eq!(stats.smallest_file_bytes, 100);
    }

    #[test]
    fn stats_of_nothing_are_zero() {
        let stats = StorageStats::from_sizes(0, &[]);
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.average_size_bytes, 0);
        assert_eq!(stats.total_size_formatted, "0 B");
    }

    #[test]
    fn unreadable_sizes_still_count_as_files() {
        let stats = StorageStats::from_sizes(3, &[100, 300]);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_size_bytes, 400);
        assert_eq!(stats.average_size_bytes, 133);
        assert_eq!(stats.largest_file_bytes, 300);
        assert_eq!(stats.smallest_file_bytes, 100);
    }

    #[test]
    fn missing_references_become_mismatches() {
        let check = IntegrityCheck {
            existing: vec!["p/a.png".to_string()],
            missing: vec!["p/b.png".to_string()],
        };
        assert!(!check.is_clean());
        let errs = check.mismatches();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].code(), "CSN-2004");
        assert!(errs[0].to_string().contains("p/b.png"));
    }

    #[test]
    fn recommendations_follow_findings() {
        let mib = 1024 * 1024;
        assert_eq!(
            recommend(2, 1, 101 * mib, 100 * mib),
            vec![
                Recommendation::CleanupOrphans { count: 2 },
                Recommendation::FixMissingReferences { count: 1 },
                Recommendation::CompressLargePosters,
            ]
        );
        // Exactly at the threshold does not trigger compression.
        assert_eq!(
            recommend(0, 0, 100 * mib, 100 * mib),
            vec![Recommendation::NoActionNeeded]
        );
    }

    #[test]
    fn recommendation_serializes_as_text() {
        let json = serde_json::to_string(&Recommendation::CleanupOrphans { count: 3 }).unwrap();
        assert_eq!(json, "\"Clean up 3 orphaned files to free storage space\"");
        let back: Recommendation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Recommendation::CleanupOrphans { count: 3 });
        assert!(serde_json::from_str::<Recommendation>("\"buy more disks\"").is_err());
    }

    #[test]
    fn deletion_status_is_tagged() {
        let item = FileDeletion {
            file: "p/a.png".to_string(),
            status: DeletionStatus::Failed {
                code: "CSN-2003".to_string(),
                error: "permission denied".to_string(),
            },
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["file"], "p/a.png");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["code"], "CSN-2003");
    }

    #[test]
    fn outcome_partitions_results() {
        let outcome = CleanupOutcome {
            dry_run: false,
            references_unavailable: false,
            preview: Vec::new(),
            results: vec![
                FileDeletion {
                    file: "a".to_string(),
                    status: DeletionStatus::Deleted,
                },
                FileDeletion {
                    file: "b".to_string(),
                    status: DeletionStatus::AlreadyGone,
                },
                FileDeletion {
                    file: "c".to_string(),
                    status: DeletionStatus::Failed {
                        code: "CSN-2003".to_string(),
                        error: "busy".to_string(),
                    },
                },
                FileDeletion {
                    file: "d".to_string(),
                    status: DeletionStatus::Skipped {
                        reason: "too new".to_string(),
                    },
                },
            ],
        };
        assert_eq!(outcome.deleted(), vec!["a", "b"]);
        assert_eq!(outcome.failed(), vec!["c"]);
        assert_eq!(outcome.skipped(), vec!["d"]);
    }
}
