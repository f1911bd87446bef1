//! Poster storage reconciliation: blob store, record store, set-difference reconciler, reports.

pub mod blob;
pub mod reconciler;
pub mod records;
pub mod report;
