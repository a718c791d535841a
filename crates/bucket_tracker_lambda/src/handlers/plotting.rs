use bucket_tracker_core::budget::ExecutionBudget;
use bucket_tracker_core::chart::{
    render_svg, ChartSeries, ChartSpec, SeriesBuilder, SeriesPoint, DEFAULT_MAX_POINTS,
};
use bucket_tracker_core::contract::PLOT_CONTENT_TYPE;
use bucket_tracker_core::history::{HistoryQuery, DEFAULT_PAGE_SIZE};
use bucket_tracker_core::storage_keys::object_uri;
use serde::Serialize;
use serde_json::{json, Value};

use crate::adapters::history_table::HistoryTable;
use crate::adapters::object_store::ObjectStore;
use crate::error::{ErrorKind, HandlerError};
use crate::handlers::api::{
    error_response, success_response, validation_error_response, ApiGatewayResponse, ApiRequest,
};
use crate::telemetry::{log_error, log_info};

const COMPONENT: &str = "plot_renderer";
pub const WINDOW_SECONDS_PARAM: &str = "window_seconds";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotConfig {
    /// Bucket the rendered chart is written to.
    pub bucket_name: String,
    pub tracked_buckets: Vec<String>,
    pub plot_object_key: String,
    pub now_ms: i64,
    pub page_size: usize,
    pub max_points: usize,
}

impl PlotConfig {
    pub fn for_bucket(
        bucket_name: impl Into<String>,
        plot_object_key: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        let bucket_name = bucket_name.into();
        Self {
            tracked_buckets: vec![bucket_name.clone()],
            bucket_name,
            plot_object_key: plot_object_key.into(),
            now_ms,
            page_size: DEFAULT_PAGE_SIZE,
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BucketPlotSummary {
    pub bucket_name: String,
    pub points: usize,
    pub records_read: usize,
    pub historical_high: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlotSummary {
    pub plot_uri: String,
    pub points: usize,
    pub window_seconds: Option<u64>,
    pub buckets: Vec<BucketPlotSummary>,
}

pub fn handle_plot_request(
    event: &Value,
    config: &PlotConfig,
    budget: &ExecutionBudget,
    table: &impl HistoryTable,
    store: &impl ObjectStore,
) -> ApiGatewayResponse {
    let request = ApiRequest::from_event(event);
    if !request.is_get() {
        return error_response(
            405,
            json!({
                "error": "method_not_allowed",
                "message": format!(
                    "{} is not supported; use GET",
                    request.method.as_deref().unwrap_or_default()
                ),
            }),
        );
    }

    let window_seconds = match request.query_param(WINDOW_SECONDS_PARAM) {
        None => None,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => Some(value),
            _ => {
                return validation_error_response(&format!(
                    "{WINDOW_SECONDS_PARAM} must be a positive integer, got '{raw}'"
                ))
            }
        },
    };

    match render_plot(config, window_seconds, budget, table, store) {
        Ok(summary) => {
            log_info(
                COMPONENT,
                "plot_rendered",
                json!({
                    "plot_uri": summary.plot_uri.clone(),
                    "points": summary.points,
                    "elapsed_ms": budget.elapsed().as_millis() as u64,
                }),
            );
            success_response(200, summary)
        }
        Err(error) => {
            log_error(
                COMPONENT,
                "plot_failed",
                json!({
                    "kind": error.kind.as_str(),
                    "error": error.message.clone(),
                }),
            );
            let status = match error.kind {
                ErrorKind::BudgetExceeded => 504,
                _ => 500,
            };
            error_response(
                status,
                json!({
                    "error": error.kind.as_str(),
                    "message": error.message,
                }),
            )
        }
    }
}

/// Pages each tracked bucket's history into a bounded series, renders the
/// chart and stores it under the configured key.
pub fn render_plot(
    config: &PlotConfig,
    window_seconds: Option<u64>,
    budget: &ExecutionBudget,
    table: &impl HistoryTable,
    store: &impl ObjectStore,
) -> Result<PlotSummary, HandlerError> {
    let start_timestamp = window_seconds.map(|seconds| {
        let span_ms = i64::try_from(seconds.saturating_mul(1_000)).unwrap_or(i64::MAX);
        config.now_ms.saturating_sub(span_ms)
    });

    let mut series = Vec::with_capacity(config.tracked_buckets.len());
    let mut buckets = Vec::with_capacity(config.tracked_buckets.len());
    for bucket_name in &config.tracked_buckets {
        let (points, records_read) =
            collect_points(bucket_name, start_timestamp, config, budget, table)?;
        let historical_high = historical_high(bucket_name, table)?;

        buckets.push(BucketPlotSummary {
            bucket_name: bucket_name.clone(),
            points: points.len(),
            records_read,
            historical_high,
        });
        series.push(ChartSeries {
            label: bucket_name.clone(),
            points,
            historical_high: historical_high.map(|size| size as f64),
        });
    }

    let chart = ChartSpec::bucket_sizes(config.now_ms, series);
    let svg = render_svg(&chart);
    ensure_budget(budget, "storing the chart")?;
    store
        .put_object(
            &config.bucket_name,
            &config.plot_object_key,
            svg.as_bytes(),
            PLOT_CONTENT_TYPE,
        )
        .map_err(|error| HandlerError::transient(format!("Failed to store plot: {error}")))?;

    Ok(PlotSummary {
        plot_uri: object_uri(&config.bucket_name, &config.plot_object_key),
        points: chart.point_count(),
        window_seconds,
        buckets,
    })
}

fn collect_points(
    bucket_name: &str,
    start_timestamp: Option<i64>,
    config: &PlotConfig,
    budget: &ExecutionBudget,
    table: &impl HistoryTable,
) -> Result<(Vec<SeriesPoint>, usize), HandlerError> {
    let mut builder = SeriesBuilder::new(config.max_points);
    let mut query = HistoryQuery::by_timestamp(bucket_name)
        .with_range(start_timestamp, None)
        .with_limit(config.page_size);

    loop {
        ensure_budget(budget, "reading history")?;
        let page = table.query_page(&query).map_err(|error| {
            HandlerError::transient(format!("Failed to query history for {bucket_name}: {error}"))
        })?;
        for record in &page.records {
            builder.push(SeriesPoint {
                timestamp_ms: record.timestamp,
                value: record.size as f64,
            });
        }
        match page.next_cursor {
            Some(cursor) => query = query.with_cursor(Some(cursor)),
            None => break,
        }
    }

    let records_read = builder.seen();
    Ok((builder.finish(), records_read))
}

fn historical_high(
    bucket_name: &str,
    table: &impl HistoryTable,
) -> Result<Option<u64>, HandlerError> {
    let page = table
        .query_page(&HistoryQuery::historical_high(bucket_name))
        .map_err(|error| {
            HandlerError::transient(format!(
                "Failed to query historical high for {bucket_name}: {error}"
            ))
        })?;
    Ok(page.records.first().map(|record| record.size))
}

fn ensure_budget(budget: &ExecutionBudget, stage: &str) -> Result<(), HandlerError> {
    if budget.is_exhausted() {
        return Err(HandlerError::budget_exceeded(format!(
            "plot budget of {}s exhausted while {stage}",
            budget.limit().as_secs()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bucket_tracker_core::budget::PLOT_RENDERER_BUDGET;
    use bucket_tracker_core::contract::SizeRecord;
    use bucket_tracker_core::history::HistoryPage;

    use super::*;
    use crate::adapters::memory::{InMemoryHistoryTable, InMemoryObjectStore};

    struct CountingTable {
        inner: InMemoryHistoryTable,
        queries: Mutex<Vec<HistoryQuery>>,
    }

    impl HistoryTable for CountingTable {
        fn put_record(&self, record: &SizeRecord) -> Result<(), String> {
            self.inner.put_record(record)
        }

        fn query_page(&self, query: &HistoryQuery) -> Result<HistoryPage, String> {
            self.queries.lock().expect("poisoned mutex").push(query.clone());
            self.inner.query_page(query)
        }
    }

    struct BrokenTable;

    impl HistoryTable for BrokenTable {
        fn put_record(&self, _record: &SizeRecord) -> Result<(), String> {
            Err("unavailable".to_string())
        }

        fn query_page(&self, _query: &HistoryQuery) -> Result<HistoryPage, String> {
            Err("ResourceNotFoundException".to_string())
        }
    }

    fn record(timestamp: i64, size: u64) -> SizeRecord {
        SizeRecord {
            bucket_name: "tracked".to_string(),
            timestamp,
            size,
            object_count: 1,
        }
    }

    fn get_event() -> Value {
        json!({"httpMethod": "GET", "path": "/plot"})
    }

    fn budget() -> ExecutionBudget {
        ExecutionBudget::start(PLOT_RENDERER_BUDGET)
    }

    #[test]
    fn empty_history_still_renders_chart() {
        let table = InMemoryHistoryTable::new();
        let store = InMemoryObjectStore::new();
        let config = PlotConfig::for_bucket("tracked", "plot.svg", 100_000);

        let response = handle_plot_request(&get_event(), &config, &budget(), &table, &store);

        assert_eq!(response.status_code, 200);
        let body = response.body_json().expect("json body");
        assert_eq!(body["plot_uri"], "s3://tracked/plot.svg");
        assert_eq!(body["points"], 0);

        let stored = store.object("tracked", "plot.svg").expect("plot stored");
        assert_eq!(stored.content_type, "image/svg+xml");
        let svg = String::from_utf8(stored.body).expect("utf-8 svg");
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("No data points"));
    }

    #[test]
    fn pages_full_history_and_reports_historical_high() {
        let table = CountingTable {
            inner: InMemoryHistoryTable::new(),
            queries: Mutex::new(Vec::new()),
        };
        for index in 0..250 {
            table
                .put_record(&record(1_000 + index, (index % 30) as u64))
                .expect("put");
        }
        let store = InMemoryObjectStore::new();
        let config = PlotConfig::for_bucket("tracked", "plot.svg", 10_000);

        let summary = render_plot(&config, None, &budget(), &table, &store).expect("plot");

        assert_eq!(summary.points, 250);
        assert_eq!(summary.buckets[0].records_read, 250);
        assert_eq!(summary.buckets[0].historical_high, Some(29));
        // Three timestamp pages plus one size-index lookup.
        assert_eq!(table.queries.lock().expect("poisoned mutex").len(), 4);
    }

    #[test]
    fn long_history_is_decimated() {
        let table = InMemoryHistoryTable::new();
        for index in 0..500 {
            table.put_record(&record(index, index as u64)).expect("put");
        }
        let store = InMemoryObjectStore::new();
        let mut config = PlotConfig::for_bucket("tracked", "plot.svg", 1_000);
        config.max_points = 100;

        let summary = render_plot(&config, None, &budget(), &table, &store).expect("plot");

        assert!(summary.points <= 100);
        assert_eq!(summary.buckets[0].records_read, 500);
        assert_eq!(summary.buckets[0].historical_high, Some(499));
    }

    #[test]
    fn window_limits_history() {
        let table = InMemoryHistoryTable::new();
        for timestamp in [10_000, 50_000, 95_000] {
            table.put_record(&record(timestamp, 5)).expect("put");
        }
        let store = InMemoryObjectStore::new();
        let config = PlotConfig::for_bucket("tracked", "plot.svg", 100_000);

        let response = handle_plot_request(
            &json!({"httpMethod": "GET", "queryStringParameters": {"window_seconds": "60"}}),
            &config,
            &budget(),
            &table,
            &store,
        );

        let body = response.body_json().expect("json body");
        assert_eq!(body["points"], 2);
        assert_eq!(body["window_seconds"], 60);
    }

    #[test]
    fn rejects_bad_window_and_methods() {
        let table = InMemoryHistoryTable::new();
        let store = InMemoryObjectStore::new();
        let config = PlotConfig::for_bucket("tracked", "plot.svg", 0);

        let bad_window = handle_plot_request(
            &json!({"httpMethod": "GET", "queryStringParameters": {"window_seconds": "-5"}}),
            &config,
            &budget(),
            &table,
            &store,
        );
        assert_eq!(bad_window.status_code, 400);

        let post_event = json!({"httpMethod": "POST"});
        let post = handle_plot_request(&post_event, &config, &budget(), &table, &store);
        assert_eq!(post.status_code, 405);
        assert!(store.object("tracked", "plot.svg").is_none());
    }

    #[test]
    fn table_failure_returns_server_error() {
        let store = InMemoryObjectStore::new();
        let config = PlotConfig::for_bucket("tracked", "plot.svg", 0);

        let response = handle_plot_request(&get_event(), &config, &budget(), &BrokenTable, &store);

        assert_eq!(response.status_code, 500);
        let body = response.body_json().expect("json body");
        assert_eq!(body["error"], "transient");
    }

    #[test]
    fn exhausted_budget_times_out() {
        let table = InMemoryHistoryTable::new();
        let store = InMemoryObjectStore::new();
        let config = PlotConfig::for_bucket("tracked", "plot.svg", 0);

        let response = handle_plot_request(
            &get_event(),
            &config,
            &ExecutionBudget::start(Duration::ZERO),
            &table,
            &store,
        );
        assert_eq!(response.status_code, 504);
    }
}
