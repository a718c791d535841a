//! SQS batch envelope shared by the queue-driven handlers.

use bucket_tracker_core::contract::ObjectEvent;
use bucket_tracker_core::notification::decode_message_body;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::telemetry::log_error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SqsEvent {
    #[serde(rename = "Records")]
    pub records: Vec<SqsMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SqsMessage {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub body: String,
    #[serde(rename = "eventSource", default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
}

/// Partial batch response; listed messages become visible again for redelivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchResponse {
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

impl BatchResponse {
    pub fn failing<'a>(message_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut response = Self::default();
        for message_id in message_ids {
            response.push_failure(message_id);
        }
        response
    }

    pub fn push_failure(&mut self, message_id: &str) {
        if !self
            .batch_item_failures
            .iter()
            .any(|failure| failure.item_identifier == message_id)
        {
            self.batch_item_failures.push(BatchItemFailure {
                item_identifier: message_id.to_string(),
            });
        }
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|failure| failure.item_identifier.as_str())
            .collect()
    }

    pub fn is_fully_acknowledged(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub message_id: String,
    pub events: Vec<ObjectEvent>,
}

pub fn is_sqs_event(event: &Value) -> bool {
    event
        .get("Records")
        .and_then(Value::as_array)
        .is_some_and(|records| {
            !records.is_empty()
                && records.iter().all(|record| {
                    record.get("eventSource").and_then(Value::as_str) == Some("aws:sqs")
                })
        })
}

/// Accepts only batches whose records all come from SQS; a queue function
/// wired to the wrong trigger fails loudly instead of acknowledging nothing.
pub fn parse_sqs_event(event: Value) -> Result<SqsEvent, HandlerError> {
    if !is_sqs_event(&event) {
        return Err(HandlerError::malformed("event is not an SQS batch"));
    }
    serde_json::from_value(event)
        .map_err(|error| HandlerError::malformed(format!("invalid SQS event: {error}")))
}

/// Decodes every record, logging and dropping the ones that cannot be
/// decoded. Dropped records are acknowledged: redelivery cannot fix them.
pub fn decode_batch(event: &SqsEvent, component: &str) -> Vec<DecodedMessage> {
    event
        .records
        .iter()
        .filter_map(|record| match decode_message_body(&record.body) {
            Ok(events) => Some(DecodedMessage {
                message_id: record.message_id.clone(),
                events,
            }),
            Err(error) => {
                log_error(
                    component,
                    "malformed_message_discarded",
                    json!({
                        "message_id": record.message_id.clone(),
                        "error": error.message(),
                    }),
                );
                None
            }
        })
        .collect()
}
