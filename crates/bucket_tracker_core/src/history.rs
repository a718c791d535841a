//! Query model for the size history table.
//!
//! Rows are keyed by `(bucket_name, timestamp)`; a secondary ordering by
//! `(bucket_name, size)` serves "historical high" lookups. Adapters either
//! translate a [`HistoryQuery`] into a table query or, for in-memory tables,
//! evaluate it directly with [`HistoryQuery::select`].

use std::cmp::Ordering;

use crate::contract::SizeRecord;

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOrder {
    Timestamp,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Exclusive start position for the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    pub timestamp: i64,
    pub size: u64,
}

impl HistoryCursor {
    pub fn after(record: &SizeRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            size: record.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub bucket_name: String,
    pub order: HistoryOrder,
    pub direction: SortDirection,
    /// Inclusive lower bound on `timestamp`.
    pub start_timestamp: Option<i64>,
    /// Inclusive upper bound on `timestamp`.
    pub end_timestamp: Option<i64>,
    pub limit: usize,
    pub cursor: Option<HistoryCursor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    pub records: Vec<SizeRecord>,
    pub next_cursor: Option<HistoryCursor>,
}

impl HistoryQuery {
    pub fn by_timestamp(bucket_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            order: HistoryOrder::Timestamp,
            direction: SortDirection::Ascending,
            start_timestamp: None,
            end_timestamp: None,
            limit: DEFAULT_PAGE_SIZE,
            cursor: None,
        }
    }

    /// Largest recorded size first, one row.
    pub fn historical_high(bucket_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            order: HistoryOrder::Size,
            direction: SortDirection::Descending,
            start_timestamp: None,
            end_timestamp: None,
            limit: 1,
            cursor: None,
        }
    }

    pub fn with_range(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start_timestamp = start;
        self.end_timestamp = end;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cursor(mut self, cursor: Option<HistoryCursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn matches(&self, record: &SizeRecord) -> bool {
        record.bucket_name == self.bucket_name
            && self.start_timestamp.is_none_or(|start| record.timestamp >= start)
            && self.end_timestamp.is_none_or(|end| record.timestamp <= end)
    }

    /// Order of two records under this query's ordering and direction.
    pub fn compare(&self, left: &SizeRecord, right: &SizeRecord) -> Ordering {
        self.compare_keys(
            (left.timestamp, left.size),
            (right.timestamp, right.size),
        )
    }

    fn compare_keys(&self, left: (i64, u64), right: (i64, u64)) -> Ordering {
        let ordering = match self.order {
            HistoryOrder::Timestamp => left.0.cmp(&right.0),
            HistoryOrder::Size => left.1.cmp(&right.1).then_with(|| left.0.cmp(&right.0)),
        };
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }

    fn is_past_cursor(&self, record: &SizeRecord) -> bool {
        match self.cursor {
            None => true,
            Some(cursor) => {
                self.compare_keys((record.timestamp, record.size), (cursor.timestamp, cursor.size))
                    == Ordering::Greater
            }
        }
    }

    /// Evaluates the query over an unordered set of rows.
    pub fn select<'a>(&self, records: impl IntoIterator<Item = &'a SizeRecord>) -> HistoryPage {
        let mut candidates: Vec<&SizeRecord> = records
            .into_iter()
            .filter(|record| self.matches(record) && self.is_past_cursor(record))
            .collect();
        candidates.sort_by(|left, right| self.compare(left, right));

        let limit = self.limit.max(1);
        let has_more = candidates.len() > limit;
        let records: Vec<SizeRecord> = candidates.into_iter().take(limit).cloned().collect();
        let next_cursor = if has_more {
            records.last().map(HistoryCursor::after)
        } else {
            None
        };

        HistoryPage {
            records,
            next_cursor,
        }
    }
}
