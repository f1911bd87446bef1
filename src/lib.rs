#![forbid(unsafe_code)]

//! Campaign Sentry (csen): housekeeping for an ad-campaign manager.
//!
//! Two independent concerns:
//! 1. **Poster reconciliation**: find uploaded poster files no campaign record
//!    references, check that every reference still resolves, report on usage
//!    and delete orphans on request.
//! 2. **Session trust**: score a stored session fingerprint against the
//!    current request, and enforce strict network/agent binding.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use campaign_sentry::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use campaign_sentry::core::config::Config;
//! use campaign_sentry::storage::reconciler::Reconciler;
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod session;
pub mod storage;
