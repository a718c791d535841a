use bucket_tracker_core::budget::ExecutionBudget;
use bucket_tracker_core::cleanup::{plan_deletions, DeletionPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::adapters::object_store::ObjectStore;
use crate::error::HandlerError;
use crate::telemetry::{log_error, log_info};

const COMPONENT: &str = "cleaner";

/// CloudWatch alarm action payload; only the state fields are read.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AlarmEvent {
    #[serde(rename = "alarmData")]
    pub alarm_data: AlarmData,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AlarmData {
    #[serde(rename = "alarmName", default)]
    pub alarm_name: Option<String>,
    pub state: AlarmStateValue,
    #[serde(rename = "previousState", default)]
    pub previous_state: Option<AlarmStateValue>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AlarmStateValue {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanerConfig {
    pub bucket_name: String,
    pub threshold_bytes: u64,
    pub policy: DeletionPolicy,
    pub protected_keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CleanerStatus {
    Cleaned,
    WithinThreshold,
    /// The alarm event was not an `OK -> ALARM` edge.
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CleanerReport {
    pub status: CleanerStatus,
    pub bucket_name: String,
    pub deleted_keys: Vec<String>,
    pub total_before: u64,
    pub total_after: u64,
    pub threshold_bytes: u64,
    pub policy: &'static str,
}

impl CleanerReport {
    fn skipped(config: &CleanerConfig) -> Self {
        Self {
            status: CleanerStatus::Skipped,
            bucket_name: config.bucket_name.clone(),
            deleted_keys: Vec::new(),
            total_before: 0,
            total_after: 0,
            threshold_bytes: config.threshold_bytes,
            policy: config.policy.as_str(),
        }
    }
}

/// Entry point for the alarm action. Payloads without `alarmData` are manual
/// invocations and always clean.
pub fn handle_alarm_event(
    event: &Value,
    config: &CleanerConfig,
    budget: &ExecutionBudget,
    store: &impl ObjectStore,
) -> Result<CleanerReport, HandlerError> {
    if event.get("alarmData").is_some() {
        let alarm: AlarmEvent = serde_json::from_value(event.clone())
            .map_err(|error| HandlerError::malformed(format!("invalid alarm event: {error}")))?;
        if !is_alarm_edge(&alarm.alarm_data) {
            log_info(
                COMPONENT,
                "alarm_event_ignored",
                json!({
                    "alarm_name": alarm.alarm_data.alarm_name,
                    "state": alarm.alarm_data.state.value,
                    "previous_state": alarm.alarm_data.previous_state.map(|state| state.value),
                }),
            );
            return Ok(CleanerReport::skipped(config));
        }
    }

    clean_bucket(config, budget, store)
}

fn is_alarm_edge(alarm: &AlarmData) -> bool {
    let entered = alarm.state.value.eq_ignore_ascii_case("ALARM");
    let was_alarm = alarm
        .previous_state
        .as_ref()
        .map(|state| state.value.eq_ignore_ascii_case("ALARM"))
        .unwrap_or(false);
    entered && !was_alarm
}

/// Deletes objects per `config.policy` until the bucket is at or below the
/// threshold. Every run starts from a fresh listing, so a repeated or
/// interrupted run never over-deletes.
pub fn clean_bucket(
    config: &CleanerConfig,
    budget: &ExecutionBudget,
    store: &impl ObjectStore,
) -> Result<CleanerReport, HandlerError> {
    let objects = store.list_objects(&config.bucket_name).map_err(|error| {
        HandlerError::transient(format!("Failed to list bucket objects: {error}"))
    })?;
    let plan = plan_deletions(
        &objects,
        config.threshold_bytes,
        config.policy,
        &config.protected_keys,
    );

    if plan.is_noop() {
        log_info(
            COMPONENT,
            "bucket_within_threshold",
            json!({
                "bucket_name": config.bucket_name.clone(),
                "total_size": plan.current_total,
                "threshold": plan.threshold,
            }),
        );
        return Ok(CleanerReport {
            status: CleanerStatus::WithinThreshold,
            bucket_name: config.bucket_name.clone(),
            deleted_keys: Vec::new(),
            total_before: plan.current_total,
            total_after: plan.current_total,
            threshold_bytes: plan.threshold,
            policy: config.policy.as_str(),
        });
    }

    let mut deleted_keys = Vec::with_capacity(plan.victims.len());
    for victim in &plan.victims {
        if budget.is_exhausted() {
            log_error(
                COMPONENT,
                "cleaner_budget_exhausted",
                json!({
                    "bucket_name": config.bucket_name.clone(),
                    "deleted_keys": deleted_keys.clone(),
                    "remaining_victims": plan.victims.len() - deleted_keys.len(),
                }),
            );
            return Err(HandlerError::budget_exceeded(format!(
                "cleaner budget of {}s exhausted after {} of {} deletions",
                budget.limit().as_secs(),
                deleted_keys.len(),
                plan.victims.len()
            )));
        }

        if let Err(error) = store.delete_object(&config.bucket_name, &victim.key) {
            log_error(
                COMPONENT,
                "object_delete_failed",
                json!({
                    "bucket_name": config.bucket_name.clone(),
                    "key": victim.key.clone(),
                    "deleted_keys": deleted_keys.clone(),
                    "error": error.clone(),
                }),
            );
            return Err(HandlerError::transient(format!(
                "Failed to delete {}: {error}",
                victim.key
            )));
        }
        deleted_keys.push(victim.key.clone());
    }

    log_info(
        COMPONENT,
        "bucket_cleaned",
        json!({
            "bucket_name": config.bucket_name.clone(),
            "policy": config.policy.as_str(),
            "deleted_keys": deleted_keys.clone(),
            "total_before": plan.current_total,
            "total_after": plan.projected_total,
        }),
    );

    Ok(CleanerReport {
        status: CleanerStatus::Cleaned,
        bucket_name: config.bucket_name.clone(),
        deleted_keys,
        total_before: plan.current_total,
        total_after: plan.projected_total,
        threshold_bytes: plan.threshold,
        policy: config.policy.as_str(),
    })
}
