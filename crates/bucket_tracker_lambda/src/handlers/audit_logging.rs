use bucket_tracker_core::contract::{EventType, LogRecord, ObjectEvent};
use bucket_tracker_core::sampling::SamplingWindow;
use bucket_tracker_core::sizing::compute_tracked_size;
use bucket_tracker_core::storage_keys::log_stream_name;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::adapters::log_sink::LogSink;
use crate::adapters::object_store::ObjectStore;
use crate::handlers::sqs::{decode_batch, BatchResponse, SqsEvent};
use crate::telemetry::{log_error, log_info};

const COMPONENT: &str = "audit_logger";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLoggerConfig {
    pub bucket_name: String,
    pub window: SamplingWindow,
    pub now_ms: i64,
    /// Keys left out of `total_size`, such as the plot artifact.
    pub untracked_keys: Vec<String>,
}

impl AuditLoggerConfig {
    pub fn new(bucket_name: impl Into<String>, window: SamplingWindow, now_ms: i64) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            window,
            now_ms,
            untracked_keys: Vec::new(),
        }
    }

    pub fn with_untracked_keys(mut self, untracked_keys: Vec<String>) -> Self {
        self.untracked_keys = untracked_keys;
        self
    }

    pub fn window_start_ms(&self) -> i64 {
        self.window.window_start(self.now_ms)
    }

    /// One stream per sampling window; creating it is what claims the window.
    pub fn stream_name(&self) -> String {
        let at = DateTime::<Utc>::from_timestamp_millis(self.window_start_ms()).unwrap_or_default();
        log_stream_name(at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditDisposition {
    /// Nothing in the batch concerned the tracked bucket.
    Idle,
    Logged(LogRecord),
    /// The current window already holds a record; messages go back to the queue.
    Deferred { window_start_ms: i64 },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditOutcome {
    pub disposition: AuditDisposition,
    pub response: BatchResponse,
}

/// Writes at most one audit record per sampling window.
///
/// Every event in the batch is folded into a single record whose total comes
/// from a fresh listing. The window is claimed by creating its log stream
/// before anything is listed, so concurrent invocations cannot both write.
/// When the window is already taken, or any dependency fails, all
/// contributing messages are reported as failures so the values reach the
/// log in a later window instead of being lost.
pub fn handle_audit_batch(
    event: &SqsEvent,
    config: &AuditLoggerConfig,
    store: &impl ObjectStore,
    sink: &impl LogSink,
) -> AuditOutcome {
    let decoded = decode_batch(event, COMPONENT);

    let mut message_ids = Vec::new();
    let mut events: Vec<&ObjectEvent> = Vec::new();
    for message in &decoded {
        let relevant: Vec<&ObjectEvent> = message
            .events
            .iter()
            .filter(|object_event| object_event.bucket_name() == config.bucket_name)
            .collect();
        if relevant.is_empty() {
            continue;
        }
        message_ids.push(message.message_id.as_str());
        events.extend(relevant);
    }

    if events.is_empty() {
        return AuditOutcome {
            disposition: AuditDisposition::Idle,
            response: BatchResponse::default(),
        };
    }

    let window_start_ms = config.window_start_ms();
    let stream_name = config.stream_name();
    match sink.claim_stream(&stream_name) {
        Ok(true) => {}
        Ok(false) => {
            log_info(
                COMPONENT,
                "audit_record_deferred",
                json!({
                    "window_start_ms": window_start_ms,
                    "stream": stream_name,
                    "messages": message_ids.len(),
                }),
            );
            return AuditOutcome {
                disposition: AuditDisposition::Deferred { window_start_ms },
                response: BatchResponse::failing(message_ids),
            };
        }
        Err(error) => {
            return failed(format!("Failed to claim log stream: {error}"), message_ids);
        }
    }

    let total_size = match store.list_objects(&config.bucket_name) {
        Ok(objects) => compute_tracked_size(&objects, &config.untracked_keys).total_bytes,
        Err(error) => {
            return failed(format!("Failed to list bucket objects: {error}"), message_ids);
        }
    };

    let record = coalesce(&events, total_size, config.now_ms);
    let line = record.to_json_line();
    if let Err(error) = sink.put_record(&stream_name, config.now_ms, &line) {
        return failed(format!("Failed to write audit record: {error}"), message_ids);
    }

    log_info(
        COMPONENT,
        "audit_record_written",
        json!({
            "stream": stream_name,
            "object_name": record.object_name.clone(),
            "total_size": record.total_size,
            "events_coalesced": record.events_coalesced,
        }),
    );

    AuditOutcome {
        disposition: AuditDisposition::Logged(record),
        response: BatchResponse::default(),
    }
}

fn coalesce(events: &[&ObjectEvent], total_size: u64, timestamp: i64) -> LogRecord {
    let size_delta = events
        .iter()
        .filter(|event| event.event_type() == EventType::ObjectCreated)
        .map(|event| event.size_delta())
        .fold(0_u64, u64::saturating_add);
    let (object_name, event_type) = events
        .last()
        .map(|event| (event.object_key().to_string(), event.event_type()))
        .unwrap_or_else(|| (String::new(), EventType::ObjectCreated));

    LogRecord {
        object_name,
        size_delta,
        total_size,
        event_type,
        timestamp,
        events_coalesced: events.len(),
    }
}

fn failed(error: String, message_ids: Vec<&str>) -> AuditOutcome {
    log_error(
        COMPONENT,
        "audit_logging_failed",
        json!({
            "error": error.clone(),
            "redelivered_messages": message_ids.clone(),
        }),
    );
    AuditOutcome {
        disposition: AuditDisposition::Failed { error },
        response: BatchResponse::failing(message_ids),
    }
}
