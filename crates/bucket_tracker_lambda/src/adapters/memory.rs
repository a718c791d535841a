//! In-memory adapters backing the local pipeline and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bucket_tracker_core::contract::{ObjectEvent, ObjectSummary, SizeRecord};
use bucket_tracker_core::history::{HistoryPage, HistoryQuery};

use crate::adapters::history_table::HistoryTable;
use crate::adapters::log_sink::LogSink;
use crate::adapters::object_store::ObjectStore;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub last_modified_ms: i64,
}

/// Object store that publishes an [`ObjectEvent`] for every mutation, like a
/// bucket with create/remove notifications enabled.
///
/// `last_modified_ms` comes from a logical clock that advances on every put,
/// so write order is total even within one millisecond.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    events: Mutex<Vec<ObjectEvent>>,
    clock_ms: AtomicI64,
    fail_listing: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_clock_ms(&self, now_ms: i64) {
        self.clock_ms.fetch_max(now_ms, Ordering::SeqCst);
    }

    pub fn set_listing_failure(&self, failing: bool) {
        self.fail_listing.store(failing, Ordering::SeqCst);
    }

    /// Events published since the last drain, in mutation order.
    pub fn drain_events(&self) -> Vec<ObjectEvent> {
        std::mem::take(&mut *guard(&self.events))
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        guard(&self.objects)
            .keys()
            .filter(|(owner, _)| owner == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        guard(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn total_size(&self, bucket: &str) -> u64 {
        guard(&self.objects)
            .iter()
            .filter(|((owner, _), _)| owner == bucket)
            .map(|(_, object)| object.body.len() as u64)
            .sum()
    }

    fn publish(&self, event: ObjectEvent) {
        guard(&self.events).push(event);
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>, String> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(format!("simulated listing failure for bucket: {bucket}"));
        }

        Ok(guard(&self.objects)
            .iter()
            .filter(|((owner, _), _)| owner == bucket)
            .map(|((_, key), object)| ObjectSummary {
                key: key.clone(),
                size: object.body.len() as u64,
                last_modified_ms: object.last_modified_ms,
            })
            .collect())
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String> {
        Ok(self.object(bucket, key).map(|object| object.body))
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), String> {
        let last_modified_ms = self.clock_ms.fetch_add(1, Ordering::SeqCst);
        guard(&self.objects).insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
                last_modified_ms,
            },
        );
        self.publish(ObjectEvent::Created {
            bucket_name: bucket.to_string(),
            object_key: key.to_string(),
            size: body.len() as u64,
        });
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), String> {
        let removed = guard(&self.objects)
            .remove(&(bucket.to_string(), key.to_string()));
        if removed.is_some() {
            self.publish(ObjectEvent::Removed {
                bucket_name: bucket.to_string(),
                object_key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryHistoryTable {
    rows: Mutex<BTreeMap<(String, i64), SizeRecord>>,
}

impl InMemoryHistoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        guard(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<SizeRecord> {
        guard(&self.rows)
            .values()
            .cloned()
            .collect()
    }
}

impl HistoryTable for InMemoryHistoryTable {
    fn put_record(&self, record: &SizeRecord) -> Result<(), String> {
        guard(&self.rows).insert(
            (record.bucket_name.clone(), record.timestamp),
            record.clone(),
        );
        Ok(())
    }

    fn query_page(&self, query: &HistoryQuery) -> Result<HistoryPage, String> {
        let rows = guard(&self.rows);
        Ok(query.select(rows.values()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: String,
    pub timestamp_ms: i64,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct InMemoryLogSink {
    streams: Mutex<BTreeSet<String>>,
    lines: Mutex<Vec<LogLine>>,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        guard(&self.lines).clone()
    }

    /// Lines appended after the first `offset` lines.
    pub fn lines_from(&self, offset: usize) -> Vec<LogLine> {
        guard(&self.lines)
            .iter()
            .skip(offset)
            .cloned()
            .collect()
    }
}

impl LogSink for InMemoryLogSink {
    fn claim_stream(&self, stream: &str) -> Result<bool, String> {
        Ok(guard(&self.streams).insert(stream.to_string()))
    }

    fn put_record(&self, stream: &str, timestamp_ms: i64, message: &str) -> Result<(), String> {
        if !guard(&self.streams).contains(stream) {
            return Err(format!("ResourceNotFoundException: log stream {stream} does not exist"));
        }
        guard(&self.lines).push(LogLine {
            stream: stream.to_string(),
            timestamp_ms,
            message: message.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bucket_tracker_core::history::HistoryQuery;

    use super::*;

    #[test]
    fn store_publishes_events_for_mutations() {
        let store = InMemoryObjectStore::new();
        store
            .put_object("b1", "a.txt", b"hello", "text/plain")
            .expect("put should succeed");
        store.delete_object("b1", "a.txt").expect("delete should succeed");
        store
            .delete_object("b1", "a.txt")
            .expect("repeated delete should succeed");

        let events = store.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].size_delta(), 5);
        assert!(store.drain_events().is_empty());
    }

    #[test]
    fn listing_reports_write_order_through_last_modified() {
        let store = InMemoryObjectStore::new();
        store.set_clock_ms(1_000);
        store.put_object("b1", "z.txt", b"1", "text/plain").expect("put");
        store.put_object("b1", "a.txt", b"22", "text/plain").expect("put");

        let mut listing = store.list_objects("b1").expect("listing");
        listing.sort_by_key(|object| object.last_modified_ms);
        assert_eq!(listing[0].key, "z.txt");
        assert_eq!(listing[0].last_modified_ms, 1_000);
        assert_eq!(store.total_size("b1"), 3);
    }

    #[test]
    fn table_overwrites_same_key_and_orders_by_timestamp() {
        let table = InMemoryHistoryTable::new();
        for (timestamp, size) in [(200, 15), (100, 10), (200, 16)] {
            table
                .put_record(&SizeRecord {
                    bucket_name: "b1".to_string(),
                    timestamp,
                    size,
                    object_count: 1,
                })
                .expect("put");
        }

        let page = table
            .query_page(&HistoryQuery::by_timestamp("b1"))
            .expect("query");
        let pairs: Vec<(i64, u64)> = page.records.iter().map(|r| (r.timestamp, r.size)).collect();
        assert_eq!(pairs, vec![(100, 10), (200, 16)]);
    }

    #[test]
    fn sink_grants_each_stream_once() {
        let sink = InMemoryLogSink::new();
        assert!(sink.put_record("s", 5_000, "{}").is_err());

        assert_eq!(sink.claim_stream("s"), Ok(true));
        assert_eq!(sink.claim_stream("s"), Ok(false));
        sink.put_record("s", 5_000, "{}").expect("put");

        assert_eq!(sink.lines().len(), 1);
    }
}
