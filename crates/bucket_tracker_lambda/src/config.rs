//! Deployment configuration injected through environment variables.

use std::str::FromStr;
use std::time::Duration;

use bucket_tracker_core::cleanup::DeletionPolicy;
use bucket_tracker_core::contract::{
    DEFAULT_PLOT_OBJECT_KEY, DEFAULT_SIZE_INDEX_NAME, DEFAULT_SIZE_THRESHOLD_BYTES,
};
use bucket_tracker_core::retry::DEFAULT_MAX_ATTEMPTS;
use bucket_tracker_core::sampling::DEFAULT_SAMPLING_WINDOW;

use crate::error::HandlerError;

pub const DEFAULT_DRIVER_STEP_PAUSE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRole {
    SizeTracking,
    Logging,
    Cleaner,
    Plotting,
    Driver,
}

impl FunctionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SizeTracking => "size_tracking",
            Self::Logging => "logging",
            Self::Cleaner => "cleaner",
            Self::Plotting => "plotting",
            Self::Driver => "driver",
        }
    }
}

const FUNCTION_ROLES: &str = "size_tracking, logging, cleaner, plotting, driver";

impl FromStr for FunctionRole {
    type Err = HandlerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "size_tracking" => Ok(Self::SizeTracking),
            "logging" => Ok(Self::Logging),
            "cleaner" => Ok(Self::Cleaner),
            "plotting" => Ok(Self::Plotting),
            "driver" => Ok(Self::Driver),
            other => Err(HandlerError::misconfiguration(format!(
                "TRACKER_FUNCTION '{other}' is not one of {FUNCTION_ROLES}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub function: FunctionRole,
    pub bucket_name: String,
    pub table_name: Option<String>,
    pub size_index_name: String,
    pub log_group_name: Option<String>,
    pub plotting_api_url: Option<String>,
    pub threshold_bytes: u64,
    pub cleaner_policy: DeletionPolicy,
    pub plot_object_key: String,
    pub sampling_window: Duration,
    pub driver_max_attempts: u32,
    pub driver_step_pause: Duration,
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self, HandlerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, requiring the variables the
    /// selected function needs.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HandlerError> {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let required = |key: &str| {
            value(key)
                .ok_or_else(|| HandlerError::misconfiguration(format!("{key} must be configured")))
        };

        let function: FunctionRole = required("TRACKER_FUNCTION")?.parse()?;
        let bucket_name = required("BUCKET_NAME")?;

        let table_name = match function {
            FunctionRole::SizeTracking | FunctionRole::Plotting => {
                Some(required("DYNAMODB_TABLE_NAME")?)
            }
            _ => value("DYNAMODB_TABLE_NAME"),
        };
        let log_group_name = match function {
            FunctionRole::Logging => Some(required("LOG_GROUP_NAME")?),
            _ => value("LOG_GROUP_NAME"),
        };
        let plotting_api_url = match function {
            FunctionRole::Driver => Some(required("PLOTTING_API_URL")?),
            _ => value("PLOTTING_API_URL"),
        };

        let cleaner_policy = match value("CLEANER_POLICY") {
            Some(raw) => raw
                .parse::<DeletionPolicy>()
                .map_err(|error| HandlerError::misconfiguration(error.message()))?,
            None => DeletionPolicy::default(),
        };

        Ok(Self {
            function,
            bucket_name,
            table_name,
            size_index_name: value("DYNAMODB_SIZE_INDEX")
                .unwrap_or_else(|| DEFAULT_SIZE_INDEX_NAME.to_string()),
            log_group_name,
            plotting_api_url,
            threshold_bytes: parse_number(
                value("SIZE_THRESHOLD_BYTES"),
                "SIZE_THRESHOLD_BYTES",
                DEFAULT_SIZE_THRESHOLD_BYTES,
            )?,
            cleaner_policy,
            plot_object_key: value("PLOT_OBJECT_KEY")
                .unwrap_or_else(|| DEFAULT_PLOT_OBJECT_KEY.to_string()),
            sampling_window: Duration::from_secs(parse_number(
                value("SAMPLING_WINDOW_SECONDS"),
                "SAMPLING_WINDOW_SECONDS",
                DEFAULT_SAMPLING_WINDOW.as_secs(),
            )?),
            driver_max_attempts: parse_number(
                value("DRIVER_MAX_ATTEMPTS"),
                "DRIVER_MAX_ATTEMPTS",
                DEFAULT_MAX_ATTEMPTS,
            )?,
            driver_step_pause: Duration::from_secs(parse_number(
                value("DRIVER_STEP_PAUSE_SECONDS"),
                "DRIVER_STEP_PAUSE_SECONDS",
                DEFAULT_DRIVER_STEP_PAUSE.as_secs(),
            )?),
        })
    }
}

fn parse_number<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, HandlerError> {
    match raw {
        Some(text) => text.parse::<T>().map_err(|_| {
            HandlerError::misconfiguration(format!(
                "{key} must be a non-negative integer, got '{text}'"
            ))
        }),
        None => Ok(default),
    }
}
