use bucket_tracker_core::contract::SizeRecord;
use bucket_tracker_core::history::{HistoryPage, HistoryQuery};

pub trait HistoryTable {
    /// Unconditional put; a row with the same `(bucket_name, timestamp)` is replaced.
    fn put_record(&self, record: &SizeRecord) -> Result<(), String>;
    fn query_page(&self, query: &HistoryQuery) -> Result<HistoryPage, String>;
}
