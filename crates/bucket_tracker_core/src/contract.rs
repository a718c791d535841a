use serde::{Deserialize, Serialize};

pub const DEFAULT_PLOT_OBJECT_KEY: &str = "plot.svg";
pub const PLOT_CONTENT_TYPE: &str = "image/svg+xml";
pub const DEFAULT_SIZE_THRESHOLD_BYTES: u64 = 20;
pub const DEFAULT_SIZE_INDEX_NAME: &str = "BucketSizeIndex";
pub const TOTAL_SIZE_FIELD: &str = "total_size";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    ObjectCreated,
    ObjectRemoved,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectCreated => "ObjectCreated",
            Self::ObjectRemoved => "ObjectRemoved",
        }
    }
}

/// A single object-level change published by the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEvent {
    Created {
        bucket_name: String,
        object_key: String,
        size: u64,
    },
    Removed {
        bucket_name: String,
        object_key: String,
    },
}

impl ObjectEvent {
    pub fn bucket_name(&self) -> &str {
        match self {
            Self::Created { bucket_name, .. } | Self::Removed { bucket_name, .. } => bucket_name,
        }
    }

    pub fn object_key(&self) -> &str {
        match self {
            Self::Created { object_key, .. } | Self::Removed { object_key, .. } => object_key,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::Created { .. } => EventType::ObjectCreated,
            Self::Removed { .. } => EventType::ObjectRemoved,
        }
    }

    /// Bytes added by this event; removals report zero because the payload
    /// does not carry the size of the deleted object.
    pub fn size_delta(&self) -> u64 {
        match self {
            Self::Created { size, .. } => *size,
            Self::Removed { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSize {
    pub total_bytes: u64,
    pub object_count: u64,
}

/// One row of the history table, keyed by `(bucket_name, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRecord {
    pub bucket_name: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub size: u64,
    pub object_count: u64,
}

/// Structured audit line consumed by the metric filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub object_name: String,
    pub size_delta: u64,
    pub total_size: u64,
    pub event_type: EventType,
    pub timestamp: i64,
    pub events_coalesced: usize,
}

impl LogRecord {
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).expect("log record should serialize")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DecodeError {}
