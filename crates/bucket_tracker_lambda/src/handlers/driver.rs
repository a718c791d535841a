//! Demonstration workload: writes a few objects with pauses in between so the
//! tracker, logger and alarm observe each change, then asks for a plot.

use std::time::Duration;

use bucket_tracker_core::budget::ExecutionBudget;
use bucket_tracker_core::retry::RetryPolicy;
use serde::Serialize;
use serde_json::{json, Value};

use crate::adapters::object_store::ObjectStore;
use crate::adapters::plot_endpoint::PlotEndpoint;
use crate::error::HandlerError;
use crate::telemetry::{log_error, log_info};

const COMPONENT: &str = "driver";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverStep {
    PutObject { key: String, body: Vec<u8> },
    Pause(Duration),
    RequestPlot,
}

/// Three assignment objects of 19, 27 and 2 bytes. The second write pushes
/// the bucket over the default threshold; the last pause is doubled to leave
/// time for the alarm and cleanup before plotting.
pub fn default_script(step_pause: Duration) -> Vec<DriverStep> {
    vec![
        DriverStep::PutObject {
            key: "assignment1.txt".to_string(),
            body: b"Empty Assignment 1.".to_vec(),
        },
        DriverStep::Pause(step_pause),
        DriverStep::PutObject {
            key: "assignment2.txt".to_string(),
            body: b"Empty Assignment 2222222222".to_vec(),
        },
        DriverStep::Pause(step_pause),
        DriverStep::PutObject {
            key: "assignment3.txt".to_string(),
            body: b"33".to_vec(),
        },
        DriverStep::Pause(step_pause.saturating_mul(2)),
        DriverStep::RequestPlot,
    ]
}

pub trait Pause {
    fn pause(&self, duration: Duration);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub bucket_name: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlotOutcome {
    NotRequested,
    Generated { attempts: u32, status: u16 },
    Failed { attempts: u32, last_error: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DriverReport {
    pub bucket_name: String,
    pub objects_written: Vec<String>,
    pub plot: PlotOutcome,
}

impl DriverReport {
    pub fn status_code(&self) -> u16 {
        match self.plot {
            PlotOutcome::Failed { .. } => 502,
            _ => 200,
        }
    }

    pub fn to_response(&self) -> Value {
        let body = match &self.plot {
            PlotOutcome::Failed { attempts, last_error } => {
                format!("Plot request failed after {attempts} attempts: {last_error}")
            }
            _ => "Driver completed successfully".to_string(),
        };
        json!({
            "statusCode": self.status_code(),
            "body": body,
            "report": self,
        })
    }
}

/// Runs `script` to completion. A failing plot request is reported in the
/// result rather than returned as an error; object writes and budget
/// exhaustion abort the run.
pub fn run_driver(
    script: &[DriverStep],
    config: &DriverConfig,
    budget: &ExecutionBudget,
    store: &impl ObjectStore,
    endpoint: &impl PlotEndpoint,
    pause: &impl Pause,
) -> Result<DriverReport, HandlerError> {
    let mut report = DriverReport {
        bucket_name: config.bucket_name.clone(),
        objects_written: Vec::new(),
        plot: PlotOutcome::NotRequested,
    };

    for (index, step) in script.iter().enumerate() {
        if budget.is_exhausted() {
            log_error(
                COMPONENT,
                "driver_budget_exhausted",
                json!({
                    "step": index,
                    "objects_written": report.objects_written.clone(),
                }),
            );
            return Err(HandlerError::budget_exceeded(format!(
                "driver budget of {}s exhausted before step {index}",
                budget.limit().as_secs()
            )));
        }

        match step {
            DriverStep::PutObject { key, body } => {
                store
                    .put_object(&config.bucket_name, key, body, "text/plain")
                    .map_err(|error| {
                        HandlerError::transient(format!("Failed to create {key}: {error}"))
                    })?;
                log_info(
                    COMPONENT,
                    "object_created",
                    json!({"key": key.clone(), "size": body.len()}),
                );
                report.objects_written.push(key.clone());
            }
            DriverStep::Pause(duration) => pause.pause(*duration),
            DriverStep::RequestPlot => {
                report.plot = request_plot_with_retry(endpoint, &config.retry, pause);
            }
        }
    }

    Ok(report)
}

/// Invocation result for the function host. A completed run answers with the
/// report, `502` when the plot never succeeded. An aborted run is an error so
/// the host records the invocation as failed.
pub fn handle_driver_invocation(
    script: &[DriverStep],
    config: &DriverConfig,
    budget: &ExecutionBudget,
    store: &impl ObjectStore,
    endpoint: &impl PlotEndpoint,
    pause: &impl Pause,
) -> Result<Value, HandlerError> {
    let report = run_driver(script, config, budget, store, endpoint, pause)?;
    Ok(report.to_response())
}

/// Makes up to `retry.max_attempts` requests, backing off between them.
/// Transport errors and non-2xx statuses are both retried.
pub fn request_plot_with_retry(
    endpoint: &impl PlotEndpoint,
    retry: &RetryPolicy,
    pause: &impl Pause,
) -> PlotOutcome {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let last_error = match endpoint.request_plot() {
            Ok(response) if response.is_success() => {
                log_info(
                    COMPONENT,
                    "plot_generated",
                    json!({"attempts": attempt, "status": response.status}),
                );
                return PlotOutcome::Generated {
                    attempts: attempt,
                    status: response.status,
                };
            }
            Ok(response) => {
                format!("plot endpoint returned {}: {}", response.status, response.body)
            }
            Err(error) => error,
        };

        if !retry.should_retry(attempt) {
            log_error(
                COMPONENT,
                "plot_request_failed",
                json!({"attempts": attempt, "error": last_error.clone()}),
            );
            return PlotOutcome::Failed {
                attempts: attempt,
                last_error,
            };
        }

        let backoff = retry.backoff_after(attempt);
        log_info(
            COMPONENT,
            "plot_request_retrying",
            json!({
                "attempt": attempt,
                "backoff_ms": backoff.as_millis() as u64,
                "error": last_error,
            }),
        );
        pause.pause(backoff);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bucket_tracker_core::budget::DRIVER_BUDGET;

    use super::*;
    use crate::adapters::memory::InMemoryObjectStore;
    use crate::adapters::plot_endpoint::EndpointResponse;

    #[derive(Default)]
    struct RecordingPause {
        pauses: Mutex<Vec<Duration>>,
    }

    impl Pause for RecordingPause {
        fn pause(&self, duration: Duration) {
            self.pauses.lock().expect("poisoned mutex").push(duration);
        }
    }

    struct ScriptedEndpoint {
        responses: Mutex<Vec<Result<EndpointResponse, String>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedEndpoint {
        fn new(mut responses: Vec<Result<EndpointResponse, String>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("poisoned mutex")
        }
    }

    impl PlotEndpoint for ScriptedEndpoint {
        fn request_plot(&self) -> Result<EndpointResponse, String> {
            *self.calls.lock().expect("poisoned mutex") += 1;
            self.responses
                .lock()
                .expect("poisoned mutex")
                .pop()
                .unwrap_or_else(|| Err("connection refused".to_string()))
        }
    }

    fn ok() -> Result<EndpointResponse, String> {
        Ok(EndpointResponse {
            status: 200,
            body: "{}".to_string(),
        })
    }

    fn config(max_attempts: u32) -> DriverConfig {
        DriverConfig {
            bucket_name: "tracked".to_string(),
            retry: RetryPolicy::with_max_attempts(max_attempts),
        }
    }

    #[test]
    fn default_script_writes_expected_sizes() {
        let sizes: Vec<usize> = default_script(Duration::from_secs(60))
            .iter()
            .filter_map(|step| match step {
                DriverStep::PutObject { body, .. } => Some(body.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![19, 27, 2]);
    }

    #[test]
    fn runs_script_and_generates_plot() {
        let store = InMemoryObjectStore::new();
        let endpoint = ScriptedEndpoint::new(vec![ok()]);
        let pause = RecordingPause::default();

        let report = run_driver(
            &default_script(Duration::from_secs(60)),
            &config(3),
            &ExecutionBudget::start(DRIVER_BUDGET),
            &store,
            &endpoint,
            &pause,
        )
        .expect("driver should complete");

        assert_eq!(report.objects_written.len(), 3);
        assert_eq!(
            report.plot,
            PlotOutcome::Generated {
                attempts: 1,
                status: 200
            }
        );
        assert_eq!(report.status_code(), 200);
        assert_eq!(store.total_size("tracked"), 48);
        assert_eq!(
            *pause.pauses.lock().expect("poisoned mutex"),
            vec![
                Duration::from_secs(60),
                Duration::from_secs(60),
                Duration::from_secs(120)
            ]
        );
    }

    #[test]
    fn unreachable_endpoint_fails_after_exactly_max_attempts() {
        let endpoint = ScriptedEndpoint::new(Vec::new());
        let pause = RecordingPause::default();

        let retry = RetryPolicy::with_max_attempts(3);
        let outcome = request_plot_with_retry(&endpoint, &retry, &pause);

        assert_eq!(endpoint.calls(), 3);
        assert_eq!(
            outcome,
            PlotOutcome::Failed {
                attempts: 3,
                last_error: "connection refused".to_string()
            }
        );
        assert_eq!(
            *pause.pauses.lock().expect("poisoned mutex"),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn server_errors_are_retried_until_success() {
        let endpoint = ScriptedEndpoint::new(vec![
            Ok(EndpointResponse {
                status: 503,
                body: "busy".to_string(),
            }),
            ok(),
        ]);
        let pause = RecordingPause::default();

        let retry = RetryPolicy::with_max_attempts(3);
        let outcome = request_plot_with_retry(&endpoint, &retry, &pause);

        assert_eq!(
            outcome,
            PlotOutcome::Generated {
                attempts: 2,
                status: 200
            }
        );
    }

    #[test]
    fn failed_plot_reports_bad_gateway_without_erroring() {
        let store = InMemoryObjectStore::new();
        let endpoint = ScriptedEndpoint::new(Vec::new());

        let report = run_driver(
            &[DriverStep::RequestPlot],
            &config(2),
            &ExecutionBudget::start(DRIVER_BUDGET),
            &store,
            &endpoint,
            &RecordingPause::default(),
        )
        .expect("driver returns normally");

        assert_eq!(report.status_code(), 502);
        let response = report.to_response();
        assert_eq!(response["statusCode"], 502);
        assert_eq!(response["report"]["plot"]["outcome"], "failed");
        assert_eq!(response["report"]["plot"]["attempts"], 2);
    }

    #[test]
    fn exhausted_budget_aborts_script() {
        let store = InMemoryObjectStore::new();
        let endpoint = ScriptedEndpoint::new(vec![ok()]);

        let error = run_driver(
            &default_script(Duration::from_secs(1)),
            &config(1),
            &ExecutionBudget::start(Duration::ZERO),
            &store,
            &endpoint,
            &RecordingPause::default(),
        )
        .expect_err("budget exhausted");

        assert_eq!(error.kind, crate::error::ErrorKind::BudgetExceeded);
        assert!(store.keys("tracked").is_empty());
        assert_eq!(endpoint.calls(), 0);
    }

    #[test]
    fn aborted_run_surfaces_as_invocation_error() {
        let store = InMemoryObjectStore::new();
        let endpoint = ScriptedEndpoint::new(vec![ok()]);

        let error = handle_driver_invocation(
            &default_script(Duration::from_secs(1)),
            &config(1),
            &ExecutionBudget::start(Duration::ZERO),
            &store,
            &endpoint,
            &RecordingPause::default(),
        )
        .expect_err("aborted run is an error");
        assert_eq!(error.kind, crate::error::ErrorKind::BudgetExceeded);

        let response = handle_driver_invocation(
            &[DriverStep::RequestPlot],
            &config(1),
            &ExecutionBudget::start(DRIVER_BUDGET),
            &store,
            &ScriptedEndpoint::new(Vec::new()),
            &RecordingPause::default(),
        )
        .expect("failed plot still completes");
        assert_eq!(response["statusCode"], 502);
    }
}
