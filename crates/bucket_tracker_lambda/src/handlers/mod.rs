pub mod api;
pub mod audit_logging;
pub mod cleaner;
pub mod driver;
pub mod plotting;
pub mod size_tracking;
pub mod sqs;
