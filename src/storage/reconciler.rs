//! Storage reconciler: set difference between the poster directory and the
//! file references held by campaign records.
//!
//! Every read is fault-tolerant. A failing blob-store or record-store read is
//! logged and degrades to an empty result, so a report is always produced.
//! Deletions are continue-on-error with one tagged result per file.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_truncation)]

use std::collections::BTreeSet;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

use crate::core::config::StorageConfig;
use crate::core::errors::CsnError;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::storage::blob::{BlobStore, DeleteStatus};
use crate::storage::records::RecordStore;
use crate::storage::report::{
    CleanupOutcome, CleanupReport, DeletionStatus, FileDeletion, IntegrityCheck,
    IntegritySummary, OrphanSummary, StorageStats, recommend,
};

pub struct Reconciler<B, R> {
    blobs: B,
    records: R,
    config: StorageConfig,
    config_hash: String,
    logger: Option<ActivityLoggerHandle>,
    warnings: Mutex<Vec<String>>,
}

impl<B: BlobStore, R: RecordStore> Reconciler<B, R> {
    pub fn new(
        blobs: B,
        records: R,
        config: &StorageConfig,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            blobs,
            records,
            config: config.clone(),
            config_hash: String::new(),
            logger,
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Tag reconcile start events with the effective config hash.
    #[must_use]
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Drain the degraded-read warnings collected since the last call.
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.warnings.lock())
    }

    // ──────────────────── reads ────────────────────

    /// Identifiers of every file in the poster directory.
    pub fn scan_storage(&self) -> BTreeSet<String> {
        match self.blobs.list(&self.config.poster_dir) {
            Ok(files) => files.into_iter().collect(),
            Err(e) => {
                self.degraded("blob store", &e);
                BTreeSet::new()
            }
        }
    }

    /// Identifiers referenced by any campaign record.
    pub fn referenced_files(&self) -> BTreeSet<String> {
        self.read_references().unwrap_or_default()
    }

    /// `None` when the record store could not be read (already logged).
    fn read_references(&self) -> Option<BTreeSet<String>> {
        match self.records.poster_references() {
            Ok(refs) => Some(refs.into_iter().filter(|r| !r.is_empty()).collect()),
            Err(e) => {
                self.degraded("record store", &e);
                None
            }
        }
    }

    /// Files present in storage that no record references, sorted.
    pub fn find_orphans(&self) -> (Vec<String>, usize) {
        let orphans = orphans_of(&self.scan_storage(), &self.referenced_files());
        let count = orphans.len();
        (orphans, count)
    }

    /// Partition the referenced set by presence in storage.
    pub fn validate_integrity(&self) -> IntegrityCheck {
        self.integrity_of(&self.referenced_files())
    }

    pub fn storage_stats(&self) -> StorageStats {
        self.stats_of(&self.scan_storage())
    }

    // ──────────────────── cleanup ────────────────────

    /// Delete every orphan, or with `dry_run` only list what would go.
    pub fn cleanup(&self, dry_run: bool) -> CleanupOutcome {
        let mode = if dry_run { "dry_run" } else { "confirm" };
        let start = Instant::now();
        self.log_event(ActivityEvent::ReconcileStarted {
            mode: mode.to_string(),
            config_hash: self.config_hash.clone(),
        });

        let storage = self.scan_storage();
        let referenced = self.read_references();
        let references_unavailable = referenced.is_none();
        let orphans = orphans_of(&storage, &referenced.unwrap_or_default());
        let orphan_count = orphans.len();
        let mut outcome = CleanupOutcome {
            dry_run,
            references_unavailable,
            preview: Vec::new(),
            results: Vec::new(),
        };

        if dry_run {
            outcome.preview = orphans;
        } else if references_unavailable {
            // Without the reference set every file looks orphaned; delete nothing.
            outcome.results = orphans
                .into_iter()
                .map(|file| FileDeletion {
                    file,
                    status: DeletionStatus::Skipped {
                        reason: "record store unavailable".to_string(),
                    },
                })
                .collect();
        } else {
            let grace = Duration::from_secs(self.config.min_orphan_age_minutes.saturating_mul(60));
            let now = SystemTime::now();
            for file in orphans {
                let status = self.delete_one(&file, grace, now);
                outcome.results.push(FileDeletion { file, status });
            }
        }

        self.log_event(ActivityEvent::ReconcileCompleted {
            mode: mode.to_string(),
            orphaned: orphan_count,
            missing: 0,
            deleted: outcome.deleted().len(),
            failed: outcome.failed().len(),
            duration_ms: start.elapsed().as_millis() as u64,
        });
        outcome
    }

    fn delete_one(&self, file: &str, grace: Duration, now: SystemTime) -> DeletionStatus {
        if !grace.is_zero()
            && let Ok(modified) = self.blobs.modified(file)
        {
            // A future mtime counts as brand new.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < grace {
                return DeletionStatus::Skipped {
                    reason: format!(
                        "younger than {} minute grace period",
                        self.config.min_orphan_age_minutes
                    ),
                };
            }
        }

        match self.blobs.delete(file) {
            Ok(status) => {
                let already_gone = status == DeleteStatus::AlreadyGone;
                self.log_event(ActivityEvent::OrphanDeleted {
                    file: file.to_string(),
                    already_gone,
                });
                if already_gone {
                    DeletionStatus::AlreadyGone
                } else {
                    DeletionStatus::Deleted
                }
            }
            Err(e) => {
                self.log_event(ActivityEvent::OrphanDeletionFailed {
                    file: file.to_string(),
                    error_code: e.code().to_string(),
                    error_message: e.to_string(),
                });
                DeletionStatus::Failed {
                    code: e.code().to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    // ──────────────────── report ────────────────────

    /// Stats, orphans, integrity and recommendations from a single scan.
    pub fn build_report(&self) -> CleanupReport {
        let start = Instant::now();
        self.log_event(ActivityEvent::ReconcileStarted {
            mode: "report".to_string(),
            config_hash: self.config_hash.clone(),
        });

        let storage = self.scan_storage();
        let referenced = self.referenced_files();

        let stats = self.stats_of(&storage);
        let orphans = orphans_of(&storage, &referenced);
        let integrity = self.integrity_of(&referenced);
        let recommendations = recommend(
            orphans.len(),
            integrity.missing.len(),
            stats.total_size_bytes,
            self.config.compression_threshold_bytes,
        );

        self.log_event(ActivityEvent::ReconcileCompleted {
            mode: "report".to_string(),
            orphaned: orphans.len(),
            missing: integrity.missing.len(),
            deleted: 0,
            failed: 0,
            duration_ms: start.elapsed().as_millis() as u64,
        });

        CleanupReport {
            generated_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            storage_stats: stats,
            orphaned_files: OrphanSummary {
                count: orphans.len(),
                files: orphans,
            },
            integrity_check: IntegritySummary {
                existing_count: integrity.existing.len(),
                missing_count: integrity.missing.len(),
                missing_files: integrity.missing,
            },
            recommendations,
            warnings: self.take_warnings(),
        }
    }

    // ──────────────────── helpers ────────────────────

    fn integrity_of(&self, referenced: &BTreeSet<String>) -> IntegrityCheck {
        let mut check = IntegrityCheck::default();
        for file in referenced {
            match self.blobs.exists(file) {
                Ok(true) => check.existing.push(file.clone()),
                Ok(false) => check.missing.push(file.clone()),
                Err(e) => {
                    self.degraded("blob store", &e);
                    check.missing.push(file.clone());
                }
            }
        }
        check
    }

    fn stats_of(&self, storage: &BTreeSet<String>) -> StorageStats {
        let sizes: Vec<u64> = storage
            .iter()
            .filter_map(|file| self.blobs.size(file).ok())
            .collect();
        StorageStats::from_sizes(storage.len(), &sizes)
    }

    fn degraded(&self, source: &str, err: &CsnError) {
        self.warnings.lock().push(format!("{source}: {err}"));
        match &self.logger {
            Some(logger) => logger.send(ActivityEvent::DegradedRead {
                source: source.to_string(),
                error_code: err.code().to_string(),
                error_message: err.to_string(),
            }),
            None => eprintln!("[CSN-RECONCILE] degraded read from {source}: {err}"),
        }
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

/// `storage - referenced`, in identifier order.
#[must_use]
pub fn orphans_of(storage: &BTreeSet<String>, referenced: &BTreeSet<String>) -> Vec<String> {
    storage.difference(referenced).cloned().collect()
}
