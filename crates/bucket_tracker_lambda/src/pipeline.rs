//! In-process wiring of the whole tracker.
//!
//! Object store mutations fan out to two at-least-once queues (size tracking
//! and audit logging). Audit lines flow through the metric filter into a
//! period aggregator and the alarm; entering alarm runs the cleaner. Time is
//! simulated: nothing closes a period until [`LocalPipeline::advance`] moves
//! the clock past it.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use bucket_tracker_core::alarm::{
    Alarm, AlarmConfig, AlarmState, AlarmTransition, MetricFilter, PeriodAggregator,
};
use bucket_tracker_core::budget::{ExecutionBudget, CLEANER_BUDGET, PLOT_RENDERER_BUDGET};
use bucket_tracker_core::cleanup::DeletionPolicy;
use bucket_tracker_core::contract::{
    ObjectSummary, SizeRecord, DEFAULT_PLOT_OBJECT_KEY, DEFAULT_SIZE_THRESHOLD_BYTES,
};
use bucket_tracker_core::history::HistoryQuery;
use bucket_tracker_core::notification::encode_notification;
use bucket_tracker_core::sampling::{SamplingWindow, DEFAULT_SAMPLING_WINDOW};
use bucket_tracker_core::sizing::compute_tracked_size;
use serde::Serialize;
use serde_json::{json, Value};

use crate::adapters::history_table::HistoryTable;
use crate::adapters::memory::{InMemoryHistoryTable, InMemoryLogSink, InMemoryObjectStore};
use crate::adapters::object_store::ObjectStore;
use crate::adapters::plot_endpoint::{EndpointResponse, PlotEndpoint};
use crate::error::HandlerError;
use crate::handlers::api::ApiGatewayResponse;
use crate::handlers::audit_logging::{handle_audit_batch, AuditLoggerConfig};
use crate::handlers::cleaner::{handle_alarm_event, CleanerConfig, CleanerReport};
use crate::handlers::driver::Pause;
use crate::handlers::plotting::{handle_plot_request, PlotConfig};
use crate::handlers::size_tracking::handle_size_tracking_batch;
use crate::handlers::sqs::{BatchResponse, SqsEvent, SqsMessage};
use crate::telemetry::{log_error, log_info};

const COMPONENT: &str = "local_pipeline";
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub bucket_name: String,
    pub threshold_bytes: u64,
    pub policy: DeletionPolicy,
    pub plot_object_key: String,
    pub sampling_window: Duration,
    pub start_ms: i64,
    pub batch_size: usize,
    /// Send every notification twice, as an at-least-once queue may.
    pub duplicate_deliveries: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bucket_name: "tracked-bucket".to_string(),
            threshold_bytes: DEFAULT_SIZE_THRESHOLD_BYTES,
            policy: DeletionPolicy::default(),
            plot_object_key: DEFAULT_PLOT_OBJECT_KEY.to_string(),
            sampling_window: DEFAULT_SAMPLING_WINDOW,
            start_ms: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            duplicate_deliveries: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedMessage {
    message_id: String,
    body: String,
}

/// At-least-once queue: a received batch is gone until the consumer reports
/// failures, which are put back at the tail.
#[derive(Debug)]
struct LocalQueue {
    name: &'static str,
    pending: VecDeque<QueuedMessage>,
    next_id: u64,
}

impl LocalQueue {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: VecDeque::new(),
            next_id: 0,
        }
    }

    fn send(&mut self, body: String) {
        self.next_id += 1;
        let message_id = format!("{}-{:06}", self.name, self.next_id);
        self.pending.push_back(QueuedMessage { message_id, body });
    }

    fn duplicate_pending(&mut self) {
        let copies: Vec<QueuedMessage> = self.pending.iter().cloned().collect();
        self.pending.extend(copies);
    }

    fn take_all(&mut self) -> Vec<QueuedMessage> {
        self.pending.drain(..).collect()
    }

    fn requeue(&mut self, batch: Vec<QueuedMessage>, response: &BatchResponse) {
        let failed = response.failed_ids();
        self.pending.extend(
            batch
                .into_iter()
                .filter(|message| failed.contains(&message.message_id.as_str())),
        );
    }
}

fn to_sqs_event(batch: &[QueuedMessage]) -> SqsEvent {
    SqsEvent {
        records: batch
            .iter()
            .map(|message| SqsMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                event_source: Some("aws:sqs".to_string()),
            })
            .collect(),
    }
}

#[derive(Debug)]
struct PipelineState {
    now_ms: i64,
    tracking_queue: LocalQueue,
    logging_queue: LocalQueue,
    filter: MetricFilter,
    aggregator: PeriodAggregator,
    alarm: Alarm,
    log_offset: usize,
    transitions: Vec<AlarmTransition>,
    cleaner_reports: Vec<CleanerReport>,
    plot_endpoint_reachable: bool,
    plot_requests: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PipelineSnapshot {
    pub now_ms: i64,
    pub bucket_name: String,
    pub objects: Vec<String>,
    pub bucket_total: u64,
    pub history: Vec<SizeRecord>,
    pub audit_lines: usize,
    pub alarm_state: &'static str,
    pub alarm_transitions: Vec<String>,
    pub cleaner_runs: Vec<CleanerReport>,
    pub plot_requests: u32,
}

pub struct LocalPipeline {
    settings: PipelineSettings,
    store: InMemoryObjectStore,
    table: InMemoryHistoryTable,
    sink: InMemoryLogSink,
    state: Mutex<PipelineState>,
}

impl LocalPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        let alarm_config = AlarmConfig {
            threshold: settings.threshold_bytes as f64,
            period: settings.sampling_window,
            ..AlarmConfig::default()
        };
        let state = PipelineState {
            now_ms: settings.start_ms,
            tracking_queue: LocalQueue::new("size-tracking"),
            logging_queue: LocalQueue::new("logging"),
            filter: MetricFilter::default(),
            aggregator: PeriodAggregator::new(alarm_config.period, alarm_config.statistic),
            alarm: Alarm::new(alarm_config),
            log_offset: 0,
            transitions: Vec::new(),
            cleaner_reports: Vec::new(),
            plot_endpoint_reachable: true,
            plot_requests: 0,
        };
        let store = InMemoryObjectStore::new();
        store.set_clock_ms(settings.start_ms);
        Self {
            settings,
            store,
            table: InMemoryHistoryTable::new(),
            sink: InMemoryLogSink::new(),
            state: Mutex::new(state),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> &InMemoryObjectStore {
        &self.store
    }

    pub fn table(&self) -> &InMemoryHistoryTable {
        &self.table
    }

    pub fn sink(&self) -> &InMemoryLogSink {
        &self.sink
    }

    pub fn now_ms(&self) -> i64 {
        self.lock().now_ms
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.lock().alarm.state()
    }

    pub fn transitions(&self) -> Vec<AlarmTransition> {
        self.lock().transitions.clone()
    }

    pub fn cleaner_reports(&self) -> Vec<CleanerReport> {
        self.lock().cleaner_reports.clone()
    }

    pub fn plot_requests(&self) -> u32 {
        self.lock().plot_requests
    }

    pub fn set_plot_endpoint_reachable(&self, reachable: bool) {
        self.lock().plot_endpoint_reachable = reachable;
    }

    /// Puts a second copy of every undelivered message on both queues.
    pub fn inject_duplicates(&self) {
        let mut state = self.lock();
        state.tracking_queue.duplicate_pending();
        state.logging_queue.duplicate_pending();
    }

    /// Size recorded by the newest history row, if any.
    pub fn latest_tracked_size(&self) -> Result<Option<u64>, HandlerError> {
        let page = self
            .table
            .query_page(
                &HistoryQuery::by_timestamp(self.settings.bucket_name.clone())
                    .with_limit(usize::MAX),
            )
            .map_err(HandlerError::transient)?;
        Ok(page.records.last().map(|record| record.size))
    }

    /// Fans store notifications out to both queues without delivering them.
    pub fn publish(&self) -> usize {
        let events = self.store.drain_events();
        let copies = if self.settings.duplicate_deliveries { 2 } else { 1 };
        let mut state = self.lock();
        for event in &events {
            let body = encode_notification(std::slice::from_ref(event));
            for _ in 0..copies {
                state.tracking_queue.send(body.clone());
                state.logging_queue.send(body.clone());
            }
        }
        events.len()
    }

    /// Delivers everything currently queued once. Messages a handler fails go
    /// back to their queue and wait for the next pump.
    pub fn pump(&self) {
        self.publish();
        let (now_ms, tracking, logging) = {
            let mut state = self.lock();
            let tracking = state.tracking_queue.take_all();
            let logging = state.logging_queue.take_all();
            (state.now_ms, tracking, logging)
        };
        let batch_size = self.settings.batch_size.max(1);
        let untracked_keys = self.untracked_keys();

        for batch in tracking.chunks(batch_size) {
            let outcome = handle_size_tracking_batch(
                &to_sqs_event(batch),
                now_ms,
                &untracked_keys,
                &self.store,
                &self.table,
            );
            self.lock().tracking_queue.requeue(batch.to_vec(), &outcome.response);
        }

        let logger = AuditLoggerConfig::new(
            self.settings.bucket_name.clone(),
            SamplingWindow::new(self.settings.sampling_window),
            now_ms,
        )
        .with_untracked_keys(untracked_keys);
        for batch in logging.chunks(batch_size) {
            let event = to_sqs_event(batch);
            let outcome = handle_audit_batch(&event, &logger, &self.store, &self.sink);
            self.lock().logging_queue.requeue(batch.to_vec(), &outcome.response);
        }

        self.ingest_audit_lines();
    }

    fn ingest_audit_lines(&self) {
        let mut state = self.lock();
        let lines = self.sink.lines_from(state.log_offset);
        state.log_offset += lines.len();
        for line in lines {
            if let Some(value) = state.filter.extract(&line.message) {
                state.aggregator.record(line.timestamp_ms, value);
            }
        }
    }

    /// Evaluates every closed period; entering alarm runs the cleaner once.
    pub fn evaluate_alarm(&self) -> Result<Vec<AlarmTransition>, HandlerError> {
        let fired = {
            let mut state = self.lock();
            let now_ms = state.now_ms;
            let samples = state.aggregator.drain_closed(now_ms);
            let mut fired = Vec::new();
            for sample in samples {
                if let Some(transition) = state.alarm.evaluate(sample) {
                    state.transitions.push(transition);
                    fired.push(transition);
                }
            }
            fired
        };

        for transition in &fired {
            log_info(
                COMPONENT,
                "alarm_transition",
                json!({"transition": describe_transition(transition)}),
            );
            if matches!(transition, AlarmTransition::EnteredAlarm { .. }) {
                self.run_cleaner()?;
            }
        }
        Ok(fired)
    }

    fn run_cleaner(&self) -> Result<CleanerReport, HandlerError> {
        let config = CleanerConfig {
            bucket_name: self.settings.bucket_name.clone(),
            threshold_bytes: self.settings.threshold_bytes,
            policy: self.settings.policy,
            protected_keys: self.untracked_keys(),
        };
        let event = json!({
            "source": "aws.cloudwatch",
            "alarmData": {
                "alarmName": "bucket-size-alarm",
                "state": {"value": "ALARM"},
                "previousState": {"value": "OK"}
            }
        });
        let report = handle_alarm_event(
            &event,
            &config,
            &ExecutionBudget::start(CLEANER_BUDGET),
            &self.store,
        )?;
        self.lock().cleaner_reports.push(report.clone());
        self.pump();
        Ok(report)
    }

    /// Moves the clock forward, then delivers pending messages and evaluates
    /// periods that closed on the way.
    pub fn advance(&self, duration: Duration) -> Result<(), HandlerError> {
        {
            let mut state = self.lock();
            let step_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
            state.now_ms = state.now_ms.saturating_add(step_ms);
            self.store.set_clock_ms(state.now_ms);
        }
        self.pump();
        self.evaluate_alarm()?;
        Ok(())
    }

    pub fn put_object(&self, key: &str, body: &[u8]) -> Result<(), HandlerError> {
        ObjectStore::put_object(self, &self.settings.bucket_name, key, body, "text/plain")
            .map_err(HandlerError::transient)
    }

    pub fn delete_object(&self, key: &str) -> Result<(), HandlerError> {
        ObjectStore::delete_object(self, &self.settings.bucket_name, key)
            .map_err(HandlerError::transient)
    }

    /// Runs the plot renderer as `GET /plot` would.
    pub fn render_plot(&self, query: Option<Value>) -> ApiGatewayResponse {
        let now_ms = {
            let mut state = self.lock();
            state.plot_requests += 1;
            state.now_ms
        };
        let mut event = json!({"httpMethod": "GET", "path": "/plot"});
        if let Some(query) = query {
            event["queryStringParameters"] = query;
        }
        let config = PlotConfig::for_bucket(
            self.settings.bucket_name.clone(),
            self.settings.plot_object_key.clone(),
            now_ms,
        );
        handle_plot_request(
            &event,
            &config,
            &ExecutionBudget::start(PLOT_RENDERER_BUDGET),
            &self.table,
            &self.store,
        )
    }

    pub fn write_plot_to(&self, path: &Path) -> Result<(), HandlerError> {
        let body = self
            .store
            .get_object(&self.settings.bucket_name, &self.settings.plot_object_key)
            .map_err(HandlerError::transient)?
            .ok_or_else(|| HandlerError::transient("no plot has been rendered yet"))?;
        std::fs::write(path, body).map_err(|error| {
            HandlerError::transient(format!("failed to write {}: {error}", path.display()))
        })
    }

    /// Keys the pipeline writes itself; they never count towards the bucket size.
    pub fn untracked_keys(&self) -> Vec<String> {
        vec![self.settings.plot_object_key.clone()]
    }

    /// Bucket size as the tracker reports it.
    pub fn tracked_total(&self) -> u64 {
        self.store
            .list_objects(&self.settings.bucket_name)
            .map(|objects| compute_tracked_size(&objects, &self.untracked_keys()).total_bytes)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let bucket_total = self.tracked_total();
        let state = self.lock();
        PipelineSnapshot {
            now_ms: state.now_ms,
            bucket_name: self.settings.bucket_name.clone(),
            objects: self.store.keys(&self.settings.bucket_name),
            bucket_total,
            history: self.table.records(),
            audit_lines: self.sink.lines().len(),
            alarm_state: state.alarm.state().as_str(),
            alarm_transitions: state.transitions.iter().map(describe_transition).collect(),
            cleaner_runs: state.cleaner_reports.clone(),
            plot_requests: state.plot_requests,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PipelineState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn describe_transition(transition: &AlarmTransition) -> String {
    match transition {
        AlarmTransition::EnteredAlarm {
            period_start_ms,
            value,
        } => format!("OK->ALARM at {period_start_ms} ({value})"),
        AlarmTransition::Recovered {
            period_start_ms,
            value,
        } => format!("ALARM->OK at {period_start_ms} ({value})"),
    }
}

/// Writes go through the pipeline so every mutation is delivered to the
/// queue consumers straight away, as the deployed notifications would be.
impl ObjectStore for LocalPipeline {
    fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>, String> {
        self.store.list_objects(bucket)
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String> {
        self.store.get_object(bucket, key)
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), String> {
        self.store.put_object(bucket, key, body, content_type)?;
        self.pump();
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), String> {
        self.store.delete_object(bucket, key)?;
        self.pump();
        Ok(())
    }
}

impl PlotEndpoint for LocalPipeline {
    fn request_plot(&self) -> Result<EndpointResponse, String> {
        {
            let mut state = self.lock();
            if !state.plot_endpoint_reachable {
                state.plot_requests += 1;
                return Err("connection refused".to_string());
            }
        }
        let response = self.render_plot(None);
        Ok(EndpointResponse {
            status: response.status_code,
            body: response.body,
        })
    }
}

/// Driver pauses advance simulated time.
impl Pause for LocalPipeline {
    fn pause(&self, duration: Duration) {
        if let Err(error) = self.advance(duration) {
            log_error(
                COMPONENT,
                "advance_failed",
                json!({"error": error.to_string()}),
            );
        }
    }
}
