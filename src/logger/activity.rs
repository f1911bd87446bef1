//! Activity logger: a dedicated thread owns the JSONL writer; everything else
//! sends `ActivityEvent`s through a bounded crossbeam channel.
//!
//! `send()` uses `try_send()`, so a reconcile pass or a request-path check is
//! never blocked by logging back-pressure. Dropped events are counted and
//! reported on the next successful write.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{CsnError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the reconciler and the session components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    ReconcileStarted {
        mode: String,
        config_hash: String,
    },
    ReconcileCompleted {
        mode: String,
        orphaned: usize,
        missing: usize,
        deleted: usize,
        failed: usize,
        duration_ms: u64,
    },
    OrphanDeleted {
        file: String,
        already_gone: bool,
    },
    OrphanDeletionFailed {
        file: String,
        error_code: String,
        error_message: String,
    },
    /// A read against the blob store or record store failed and was degraded
    /// to an empty result.
    DegradedRead {
        source: String,
        error_code: String,
        error_message: String,
    },
    SessionScored {
        session: String,
        score: u32,
        level: String,
    },
    SessionBound {
        session: String,
    },
    SessionInvalidated {
        session: String,
        reason: String,
    },
    /// Ask the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply-cloneable, non-blocking sender for activity events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event; drops it (and counts the drop) if the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request shutdown. Blocks only until the sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// A handle whose events land on the returned receiver instead of a file.
    #[cfg(test)]
    pub(crate) fn capture() -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }
}

/// Spawn the logger thread writing to `config`.
///
/// The thread runs until `shutdown()` is called or every handle is dropped.
pub fn spawn_logger(
    config: JsonlConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(CHANNEL_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let join = thread::Builder::new()
        .name("csen-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped_clone))
        .map_err(|e| CsnError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((
        ActivityLoggerHandle {
            tx,
            dropped_events: dropped,
        },
        join,
    ))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if event == ActivityEvent::Shutdown {
            break;
        }
        jsonl.write_entry(&to_log_entry(&event));
    }

    jsonl.flush();
}

/// Map an event to its JSONL representation.
pub fn to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::ReconcileStarted { mode, config_hash } => {
            let mut e = LogEntry::new(EventType::ReconcileStart, Severity::Info);
            e.details = Some(format!("mode={mode} config_hash={config_hash}"));
            e
        }
        ActivityEvent::ReconcileCompleted {
            mode,
            orphaned,
            missing,
            deleted,
            failed,
            duration_ms,
        } => {
            let severity = if *failed > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::ReconcileComplete, severity);
            e.count = Some(*orphaned as u64);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*failed == 0);
            e.details = Some(format!(
                "mode={mode} orphaned={orphaned} missing={missing} deleted={deleted} failed={failed}"
            ));
            e
        }
        ActivityEvent::OrphanDeleted { file, already_gone } => {
            let mut e = LogEntry::new(EventType::OrphanDelete, Severity::Info);
            e.file = Some(file.clone());
            e.ok = Some(true);
            if *already_gone {
                e.details = Some("already gone".to_string());
            }
            e
        }
        ActivityEvent::OrphanDeletionFailed {
            file,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::OrphanDeleteFailed, Severity::Warning);
            e.file = Some(file.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::DegradedRead {
            source,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::DegradedRead, Severity::Warning);
            e.details = Some(format!("source={source}"));
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::SessionScored {
            session,
            score,
            level,
        } => {
            let mut e = LogEntry::new(EventType::SessionScore, Severity::Info);
            e.session = Some(session.clone());
            e.score = Some(*score);
            e.level = Some(level.clone());
            e
        }
        ActivityEvent::SessionBound { session } => {
            let mut e = LogEntry::new(EventType::SessionBind, Severity::Info);
            e.session = Some(session.clone());
            e
        }
        ActivityEvent::SessionInvalidated { session, reason } => {
            let mut e = LogEntry::new(EventType::SessionInvalidate, Severity::Warning);
            e.session = Some(session.clone());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::Error, Severity::Info),
    }
}
