//! AWS-oriented adapters and handlers for the bucket size tracker.
//!
//! This crate owns runtime integration details (Lambda handlers, adapter
//! traits, environment configuration) and a local pipeline that wires the
//! handlers to in-memory adapters the same way the deployment wires them to
//! S3, DynamoDB and CloudWatch.

pub mod adapters;
pub mod config;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod telemetry;
