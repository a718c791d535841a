use std::collections::BTreeMap;

use bucket_tracker_core::contract::SizeRecord;
use bucket_tracker_core::sizing::compute_tracked_size;
use serde_json::json;

use crate::adapters::history_table::HistoryTable;
use crate::adapters::object_store::ObjectStore;
use crate::handlers::sqs::{decode_batch, BatchResponse, SqsEvent};
use crate::telemetry::{log_error, log_info};

const COMPONENT: &str = "size_tracker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeTrackingOutcome {
    pub records_written: Vec<SizeRecord>,
    pub response: BatchResponse,
}

/// Recomputes the size of every bucket named in the batch and appends one
/// history row per bucket.
///
/// The listing is the source of truth; event payloads only select which
/// buckets to recompute. Objects under `untracked_keys` are not counted.
/// When listing or writing fails for a bucket, the messages that referenced
/// it are returned as batch item failures so the queue redelivers them.
pub fn handle_size_tracking_batch(
    event: &SqsEvent,
    now_ms: i64,
    untracked_keys: &[String],
    store: &impl ObjectStore,
    table: &impl HistoryTable,
) -> SizeTrackingOutcome {
    let decoded = decode_batch(event, COMPONENT);

    let mut message_ids_by_bucket: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for message in &decoded {
        for object_event in &message.events {
            let ids = message_ids_by_bucket
                .entry(object_event.bucket_name().to_string())
                .or_default();
            if !ids.contains(&message.message_id) {
                ids.push(message.message_id.clone());
            }
        }
    }

    let mut records_written = Vec::with_capacity(message_ids_by_bucket.len());
    let mut response = BatchResponse::default();

    for (bucket_name, message_ids) in message_ids_by_bucket {
        match track_bucket(&bucket_name, now_ms, untracked_keys, store, table) {
            Ok(record) => {
                log_info(
                    COMPONENT,
                    "size_recorded",
                    json!({
                        "bucket_name": record.bucket_name.clone(),
                        "timestamp": record.timestamp,
                        "size": record.size,
                        "object_count": record.object_count,
                        "messages": message_ids.len(),
                    }),
                );
                records_written.push(record);
            }
            Err(error) => {
                log_error(
                    COMPONENT,
                    "size_tracking_failed",
                    json!({
                        "bucket_name": bucket_name,
                        "error": error.clone(),
                        "redelivered_messages": message_ids.clone(),
                    }),
                );
                for message_id in &message_ids {
                    response.push_failure(message_id);
                }
            }
        }
    }

    SizeTrackingOutcome {
        records_written,
        response,
    }
}

/// Lists `bucket_name`, recomputes its size and writes one row.
pub fn track_bucket(
    bucket_name: &str,
    now_ms: i64,
    untracked_keys: &[String],
    store: &impl ObjectStore,
    table: &impl HistoryTable,
) -> Result<SizeRecord, String> {
    let objects = store
        .list_objects(bucket_name)
        .map_err(|error| format!("Failed to list bucket objects: {error}"))?;
    let size = compute_tracked_size(&objects, untracked_keys);

    let record = SizeRecord {
        bucket_name: bucket_name.to_string(),
        timestamp: now_ms,
        size: size.total_bytes,
        object_count: size.object_count,
    };
    table
        .put_record(&record)
        .map_err(|error| format!("Failed to persist size record: {error}"))?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bucket_tracker_core::contract::ObjectEvent;
    use bucket_tracker_core::history::{HistoryPage, HistoryQuery};
    use bucket_tracker_core::notification::encode_notification;

    use super::*;
    use crate::adapters::memory::{InMemoryHistoryTable, InMemoryObjectStore};
    use crate::handlers::sqs::SqsMessage;

    struct FailingTable {
        attempts: Mutex<usize>,
    }

    impl HistoryTable for FailingTable {
        fn put_record(&self, _record: &SizeRecord) -> Result<(), String> {
            *self.attempts.lock().expect("poisoned mutex") += 1;
            Err("ProvisionedThroughputExceededException".to_string())
        }

        fn query_page(&self, _query: &HistoryQuery) -> Result<HistoryPage, String> {
            Ok(HistoryPage::default())
        }
    }

    fn message(id: &str, events: &[ObjectEvent]) -> SqsMessage {
        SqsMessage {
            message_id: id.to_string(),
            body: encode_notification(events),
            event_source: Some("aws:sqs".to_string()),
        }
    }

    fn created(bucket: &str, key: &str, size: u64) -> ObjectEvent {
        ObjectEvent::Created {
            bucket_name: bucket.to_string(),
            object_key: key.to_string(),
            size,
        }
    }

    fn seeded_store() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new();
        store
            .put_object("b1", "assignment1.txt", b"Empty Assignment 1.", "text/plain")
            .expect("put");
        store
            .put_object("b1", "assignment3.txt", b"33", "text/plain")
            .expect("put");
        store
    }

    #[test]
    fn writes_listing_total_not_event_payload() {
        let store = seeded_store();
        let table = InMemoryHistoryTable::new();
        // Payload claims 999 bytes; the listing says 21.
        let event = SqsEvent {
            records: vec![message("m1", &[created("b1", "assignment1.txt", 999)])],
        };

        let outcome = handle_size_tracking_batch(&event, 1_000, &[], &store, &table);

        assert!(outcome.response.is_fully_acknowledged());
        assert_eq!(outcome.records_written.len(), 1);
        assert_eq!(outcome.records_written[0].size, 21);
        assert_eq!(outcome.records_written[0].object_count, 2);
        assert_eq!(table.records(), outcome.records_written);
    }

    #[test]
    fn batch_writes_one_record_per_bucket() {
        let store = seeded_store();
        store.put_object("b2", "x", b"xyz", "text/plain").expect("put");
        let table = InMemoryHistoryTable::new();
        let event = SqsEvent {
            records: vec![
                message("m1", &[created("b1", "assignment1.txt", 19)]),
                message("m2", &[created("b1", "assignment3.txt", 2)]),
                message("m3", &[created("b2", "x", 3)]),
            ],
        };

        let outcome = handle_size_tracking_batch(&event, 2_000, &[], &store, &table);

        let sizes: Vec<(&str, u64)> = outcome
            .records_written
            .iter()
            .map(|record| (record.bucket_name.as_str(), record.size))
            .collect();
        assert_eq!(sizes, vec![("b1", 21), ("b2", 3)]);
    }

    #[test]
    fn listing_failure_returns_messages_for_redelivery() {
        let store = seeded_store();
        store.set_listing_failure(true);
        let table = InMemoryHistoryTable::new();
        let event = SqsEvent {
            records: vec![
                message("m1", &[created("b1", "assignment1.txt", 19)]),
                message("m2", &[created("b1", "assignment3.txt", 2)]),
            ],
        };

        let outcome = handle_size_tracking_batch(&event, 3_000, &[], &store, &table);

        assert!(outcome.records_written.is_empty());
        assert_eq!(outcome.response.failed_ids(), vec!["m1", "m2"]);
        assert!(table.is_empty());
    }

    #[test]
    fn write_failure_returns_messages_for_redelivery() {
        let store = seeded_store();
        let table = FailingTable {
            attempts: Mutex::new(0),
        };
        let event = SqsEvent {
            records: vec![message("m1", &[created("b1", "assignment1.txt", 19)])],
        };

        let outcome = handle_size_tracking_batch(&event, 3_000, &[], &store, &table);

        assert_eq!(outcome.response.failed_ids(), vec!["m1"]);
        assert_eq!(*table.attempts.lock().expect("poisoned mutex"), 1);
    }

    #[test]
    fn malformed_messages_are_acknowledged_without_writes() {
        let store = seeded_store();
        let table = InMemoryHistoryTable::new();
        let event = SqsEvent {
            records: vec![SqsMessage {
                message_id: "bad".to_string(),
                body: "not json".to_string(),
                event_source: Some("aws:sqs".to_string()),
            }],
        };

        let outcome = handle_size_tracking_batch(&event, 4_000, &[], &store, &table);

        assert!(outcome.response.is_fully_acknowledged());
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_delivery_appends_identical_sizes() {
        let store = seeded_store();
        let table = InMemoryHistoryTable::new();
        let event = SqsEvent {
            records: vec![message("m1", &[created("b1", "assignment1.txt", 19)])],
        };

        handle_size_tracking_batch(&event, 5_000, &[], &store, &table);
        handle_size_tracking_batch(&event, 6_000, &[], &store, &table);

        let sizes: Vec<u64> = table.records().iter().map(|record| record.size).collect();
        assert_eq!(sizes, vec![21, 21]);
    }

    #[test]
    fn plot_artifact_does_not_move_tracked_size() {
        let store = seeded_store();
        store
            .put_object("b1", "plot.svg", &[0; 4_096], "image/svg+xml")
            .expect("put");
        let table = InMemoryHistoryTable::new();
        let event = SqsEvent {
            records: vec![message("m1", &[created("b1", "plot.svg", 4_096)])],
        };

        let outcome =
            handle_size_tracking_batch(&event, 7_000, &["plot.svg".to_string()], &store, &table);

        assert_eq!(outcome.records_written[0].size, 21);
        assert_eq!(outcome.records_written[0].object_count, 2);
    }
}
