//! Core types: errors, configuration, shared formatting.

pub mod config;
pub mod errors;
pub mod format;
