//! Activity logging: JSONL append-only writer behind a non-blocking handle.

pub mod activity;
pub mod jsonl;
