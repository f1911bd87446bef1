//! Session trust: fingerprints, risk scoring, request binding, session store, review.

pub mod binding;
pub mod fingerprint;
pub mod review;
pub mod scoring;
pub mod store;
