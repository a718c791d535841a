use std::path::PathBuf;
use std::time::Duration;

use bucket_tracker_core::budget::{ExecutionBudget, DRIVER_BUDGET};
use bucket_tracker_core::cleanup::DeletionPolicy;
use bucket_tracker_core::contract::{DEFAULT_PLOT_OBJECT_KEY, DEFAULT_SIZE_THRESHOLD_BYTES};
use bucket_tracker_core::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use bucket_tracker_lambda::handlers::driver::{default_script, run_driver, DriverConfig};
use bucket_tracker_lambda::pipeline::{LocalPipeline, PipelineSettings};
use bucket_tracker_lambda::telemetry::now_ms;
use clap::Parser;
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "local_pipeline",
    about = "Run the demonstration workload against the in-process tracker",
    long_about = "Wires the size tracker, audit logger, alarm, cleaner and plot renderer\n\
                  to in-memory adapters, runs the driver script with simulated time and\n\
                  prints a JSON summary of what happened."
)]
struct Args {
    /// Tracked bucket name
    #[arg(long, default_value = "tracked-bucket")]
    bucket: String,
    /// Alarm and cleaner threshold in bytes
    #[arg(long, env = "SIZE_THRESHOLD_BYTES", default_value_t = DEFAULT_SIZE_THRESHOLD_BYTES)]
    threshold: u64,
    /// Deletion policy: oldest_first, largest_first or all
    #[arg(long, env = "CLEANER_POLICY", default_value = "oldest_first")]
    policy: DeletionPolicy,
    /// Simulated pause between driver writes
    #[arg(long, default_value_t = 60)]
    step_pause_seconds: u64,
    /// Plot request attempts before the driver gives up
    #[arg(long, env = "DRIVER_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,
    /// Make every plot request fail as if the endpoint were down
    #[arg(long)]
    unreachable_plot: bool,
    /// Deliver every notification twice
    #[arg(long)]
    duplicate_deliveries: bool,
    /// Write the rendered chart to this path
    #[arg(long)]
    plot_output: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let settings = PipelineSettings {
        bucket_name: args.bucket.clone(),
        threshold_bytes: args.threshold,
        policy: args.policy,
        plot_object_key: DEFAULT_PLOT_OBJECT_KEY.to_string(),
        start_ms: now_ms(),
        duplicate_deliveries: args.duplicate_deliveries,
        ..PipelineSettings::default()
    };
    let pipeline = LocalPipeline::new(settings);
    pipeline.set_plot_endpoint_reachable(!args.unreachable_plot);

    let script = default_script(Duration::from_secs(args.step_pause_seconds));
    let config = DriverConfig {
        bucket_name: args.bucket,
        retry: RetryPolicy::with_max_attempts(args.max_attempts),
    };

    let report = match run_driver(
        &script,
        &config,
        &ExecutionBudget::start(DRIVER_BUDGET),
        &pipeline,
        &pipeline,
        &pipeline,
    ) {
        Ok(report) => report,
        Err(error) => {
            eprintln!("driver failed: {error}");
            std::process::exit(1);
        }
    };

    if let Err(error) = pipeline.advance(pipeline.settings().sampling_window) {
        eprintln!("failed to flush final period: {error}");
        std::process::exit(1);
    }

    if let Some(path) = &args.plot_output {
        if let Err(error) = pipeline.write_plot_to(path) {
            eprintln!("{error}");
            std::process::exit(1);
        }
    }

    let summary = json!({
        "driver": report,
        "status_code": report.status_code(),
        "pipeline": pipeline.snapshot(),
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{text}"),
        Err(error) => {
            eprintln!("failed to render summary: {error}");
            std::process::exit(1);
        }
    }
}
