//! Bucket size tracking domain primitives.
//!
//! This crate owns the deterministic pipeline behavior: notification decoding,
//! size recomputation, history ordering, alarm evaluation, deletion planning,
//! and chart rendering. It intentionally excludes AWS SDK and Lambda runtime
//! concerns, which live in `bucket_tracker_lambda`.

pub mod alarm;
pub mod budget;
pub mod chart;
pub mod cleanup;
pub mod contract;
pub mod history;
pub mod notification;
pub mod retry;
pub mod sampling;
pub mod sizing;
pub mod storage_keys;
