use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_cloudwatchlogs::operation::create_log_stream::CreateLogStreamError;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use bucket_tracker_core::budget::{
    ExecutionBudget, CLEANER_BUDGET, DRIVER_BUDGET, PLOT_RENDERER_BUDGET,
};
use bucket_tracker_core::contract::{ObjectSummary, SizeRecord};
use bucket_tracker_core::history::{
    HistoryCursor, HistoryOrder, HistoryPage, HistoryQuery, SortDirection,
};
use bucket_tracker_core::retry::RetryPolicy;
use bucket_tracker_core::sampling::SamplingWindow;
use bucket_tracker_lambda::adapters::history_table::HistoryTable;
use bucket_tracker_lambda::adapters::log_sink::LogSink;
use bucket_tracker_lambda::adapters::object_store::ObjectStore;
use bucket_tracker_lambda::adapters::plot_endpoint::{EndpointResponse, PlotEndpoint};
use bucket_tracker_lambda::config::{FunctionRole, TrackerConfig};
use bucket_tracker_lambda::error::HandlerError;
use bucket_tracker_lambda::handlers::audit_logging::{handle_audit_batch, AuditLoggerConfig};
use bucket_tracker_lambda::handlers::cleaner::{handle_alarm_event, CleanerConfig};
use bucket_tracker_lambda::handlers::driver::{
    default_script, handle_driver_invocation, DriverConfig, Pause,
};
use bucket_tracker_lambda::handlers::plotting::{handle_plot_request, PlotConfig};
use bucket_tracker_lambda::handlers::size_tracking::handle_size_tracking_batch;
use bucket_tracker_lambda::handlers::sqs::parse_sqs_event;
use bucket_tracker_lambda::telemetry::{log_error, log_info, now_ms};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value};

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

struct S3ObjectStore {
    s3_client: aws_sdk_s3::Client,
}

impl ObjectStore for S3ObjectStore {
    fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>, String> {
        let client = self.s3_client.clone();
        let bucket = bucket.to_string();

        block_on(async move {
            let mut pages = client
                .list_objects_v2()
                .bucket(bucket)
                .into_paginator()
                .send();
            let mut objects = Vec::new();
            while let Some(page) = pages.next().await {
                let page = page.map_err(|error| format!("failed to list objects in s3: {error}"))?;
                for object in page.contents() {
                    objects.push(ObjectSummary {
                        key: object.key().unwrap_or_default().to_string(),
                        size: object.size().unwrap_or_default().max(0) as u64,
                        last_modified_ms: object
                            .last_modified()
                            .and_then(|at| at.to_millis().ok())
                            .unwrap_or_default(),
                    });
                }
            }
            Ok(objects)
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String> {
        let client = self.s3_client.clone();
        let bucket = bucket.to_string();
        let object_key = key.to_string();

        block_on(async move {
            let output = match client.get_object().bucket(bucket).key(object_key).send().await {
                Ok(output) => output,
                Err(error) => {
                    return match error.into_service_error() {
                        GetObjectError::NoSuchKey(_) => Ok(None),
                        other => Err(format!("failed to read object from s3: {other}")),
                    }
                }
            };
            let bytes = output
                .body
                .collect()
                .await
                .map_err(|error| format!("failed to read object body: {error}"))?;
            Ok(Some(bytes.into_bytes().to_vec()))
        })
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), String> {
        let client = self.s3_client.clone();
        let bucket = bucket.to_string();
        let object_key = key.to_string();
        let body_bytes = body.to_vec();
        let content_type = content_type.to_string();

        block_on(async move {
            client
                .put_object()
                .bucket(bucket)
                .key(object_key)
                .content_type(content_type)
                .body(ByteStream::from(body_bytes))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to write object to s3: {error}"))
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), String> {
        let client = self.s3_client.clone();
        let bucket = bucket.to_string();
        let object_key = key.to_string();

        block_on(async move {
            client
                .delete_object()
                .bucket(bucket)
                .key(object_key)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to delete object from s3: {error}"))
        })
    }
}

struct DynamoHistoryTable {
    table_name: String,
    size_index_name: String,
    client: aws_sdk_dynamodb::Client,
}

fn number_attribute(item: &HashMap<String, AttributeValue>, name: &str) -> Result<i64, String> {
    item.get(name)
        .and_then(|value| value.as_n().ok())
        .ok_or_else(|| format!("history item is missing numeric attribute {name}"))?
        .parse::<i64>()
        .map_err(|error| format!("history attribute {name} is not an integer: {error}"))
}

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Result<SizeRecord, String> {
    let bucket_name = item
        .get("bucket_name")
        .and_then(|value| value.as_s().ok())
        .ok_or_else(|| "history item is missing bucket_name".to_string())?
        .clone();
    Ok(SizeRecord {
        bucket_name,
        timestamp: number_attribute(item, "timestamp")?,
        size: number_attribute(item, "size")?.max(0) as u64,
        object_count: number_attribute(item, "object_count").unwrap_or_default().max(0) as u64,
    })
}

impl HistoryTable for DynamoHistoryTable {
    fn put_record(&self, record: &SizeRecord) -> Result<(), String> {
        let request = self
            .client
            .put_item()
            .table_name(self.table_name.clone())
            .item("bucket_name", AttributeValue::S(record.bucket_name.clone()))
            .item("timestamp", AttributeValue::N(record.timestamp.to_string()))
            .item("size", AttributeValue::N(record.size.to_string()))
            .item("object_count", AttributeValue::N(record.object_count.to_string()));

        block_on(async move {
            request
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to write size record to dynamodb: {error}"))
        })
    }

    fn query_page(&self, query: &HistoryQuery) -> Result<HistoryPage, String> {
        let mut names = HashMap::from([("#bucket".to_string(), "bucket_name".to_string())]);
        let mut values = HashMap::from([(
            ":bucket".to_string(),
            AttributeValue::S(query.bucket_name.clone()),
        )]);

        let mut range = Vec::new();
        if let Some(start) = query.start_timestamp {
            range.push("#ts >= :start");
            values.insert(":start".to_string(), AttributeValue::N(start.to_string()));
        }
        if let Some(end) = query.end_timestamp {
            range.push("#ts <= :end");
            values.insert(":end".to_string(), AttributeValue::N(end.to_string()));
        }
        if !range.is_empty() {
            names.insert("#ts".to_string(), "timestamp".to_string());
        }
        let range_expression = range.join(" AND ");

        let mut request = self
            .client
            .query()
            .table_name(self.table_name.clone())
            .scan_index_forward(query.direction == SortDirection::Ascending)
            .limit(i32::try_from(query.limit.max(1)).unwrap_or(i32::MAX));

        match query.order {
            HistoryOrder::Timestamp => {
                let key_condition = if range.is_empty() {
                    "#bucket = :bucket".to_string()
                } else {
                    format!("#bucket = :bucket AND {range_expression}")
                };
                request = request.key_condition_expression(key_condition);
            }
            HistoryOrder::Size => {
                request = request
                    .index_name(self.size_index_name.clone())
                    .key_condition_expression("#bucket = :bucket");
                if !range.is_empty() {
                    request = request.filter_expression(range_expression);
                }
            }
        }

        if let Some(cursor) = query.cursor {
            let mut start_key = HashMap::from([
                (
                    "bucket_name".to_string(),
                    AttributeValue::S(query.bucket_name.clone()),
                ),
                (
                    "timestamp".to_string(),
                    AttributeValue::N(cursor.timestamp.to_string()),
                ),
            ]);
            if query.order == HistoryOrder::Size {
                start_key.insert("size".to_string(), AttributeValue::N(cursor.size.to_string()));
            }
            request = request.set_exclusive_start_key(Some(start_key));
        }

        let request = request
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values));

        block_on(async move {
            let output = request
                .send()
                .await
                .map_err(|error| format!("failed to query size history: {error}"))?;
            let records = output
                .items()
                .iter()
                .map(record_from_item)
                .collect::<Result<Vec<_>, _>>()?;
            let next_cursor = match output.last_evaluated_key() {
                Some(key) => Some(HistoryCursor {
                    timestamp: number_attribute(key, "timestamp")?,
                    size: number_attribute(key, "size").unwrap_or_default().max(0) as u64,
                }),
                None => None,
            };
            Ok(HistoryPage {
                records,
                next_cursor,
            })
        })
    }
}

struct CloudWatchLogSink {
    log_group_name: String,
    client: aws_sdk_cloudwatchlogs::Client,
}

impl LogSink for CloudWatchLogSink {
    /// `CreateLogStream` is the only conditional write the log group offers:
    /// the first caller creates the stream, every later one is refused.
    fn claim_stream(&self, stream: &str) -> Result<bool, String> {
        let request = self
            .client
            .create_log_stream()
            .log_group_name(self.log_group_name.clone())
            .log_stream_name(stream);
        block_on(async move {
            match request.send().await {
                Ok(_) => Ok(true),
                Err(error) => match error.into_service_error() {
                    CreateLogStreamError::ResourceAlreadyExistsException(_) => Ok(false),
                    other => Err(format!("failed to create log stream: {other}")),
                },
            }
        })
    }

    fn put_record(&self, stream: &str, timestamp_ms: i64, message: &str) -> Result<(), String> {
        let event = InputLogEvent::builder()
            .timestamp(timestamp_ms)
            .message(message)
            .build()
            .map_err(|error| format!("invalid audit log event: {error}"))?;
        let request = self
            .client
            .put_log_events()
            .log_group_name(self.log_group_name.clone())
            .log_stream_name(stream)
            .log_events(event);

        block_on(async move {
            request
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to write audit log event: {error}"))
        })
    }
}

struct HttpPlotEndpoint {
    url: String,
    client: reqwest::Client,
}

impl PlotEndpoint for HttpPlotEndpoint {
    fn request_plot(&self) -> Result<EndpointResponse, String> {
        let request = self.client.get(self.url.clone());
        block_on(async move {
            let response = request
                .send()
                .await
                .map_err(|error| format!("failed to reach plotting api: {error}"))?;
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Ok(EndpointResponse { status, body })
        })
    }
}

struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        tokio::task::block_in_place(|| std::thread::sleep(duration));
    }
}

struct RuntimeDependencies {
    config: TrackerConfig,
    store: S3ObjectStore,
    table: Option<DynamoHistoryTable>,
    sink: Option<CloudWatchLogSink>,
    endpoint: Option<HttpPlotEndpoint>,
}

impl RuntimeDependencies {
    async fn load(config: TrackerConfig) -> Result<Self, Error> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let table = config.table_name.clone().map(|table_name| DynamoHistoryTable {
            table_name,
            size_index_name: config.size_index_name.clone(),
            client: aws_sdk_dynamodb::Client::new(&aws_config),
        });
        let sink = config
            .log_group_name
            .clone()
            .map(|log_group_name| CloudWatchLogSink {
                log_group_name,
                client: aws_sdk_cloudwatchlogs::Client::new(&aws_config),
            });
        let endpoint = match config.plotting_api_url.clone() {
            Some(url) => Some(HttpPlotEndpoint {
                url,
                client: reqwest::Client::builder()
                    .timeout(Duration::from_secs(60))
                    .build()
                    .map_err(|error| Error::from(format!("failed to build http client: {error}")))?,
            }),
            None => None,
        };

        Ok(Self {
            store: S3ObjectStore {
                s3_client: aws_sdk_s3::Client::new(&aws_config),
            },
            table,
            sink,
            endpoint,
            config,
        })
    }

    fn table(&self) -> Result<&DynamoHistoryTable, HandlerError> {
        self.table
            .as_ref()
            .ok_or_else(|| HandlerError::misconfiguration("DYNAMODB_TABLE_NAME must be configured"))
    }

    fn sink(&self) -> Result<&CloudWatchLogSink, HandlerError> {
        self.sink
            .as_ref()
            .ok_or_else(|| HandlerError::misconfiguration("LOG_GROUP_NAME must be configured"))
    }

    fn endpoint(&self) -> Result<&HttpPlotEndpoint, HandlerError> {
        self.endpoint
            .as_ref()
            .ok_or_else(|| HandlerError::misconfiguration("PLOTTING_API_URL must be configured"))
    }
}

fn to_value(payload: impl serde::Serialize) -> Result<Value, HandlerError> {
    serde_json::to_value(payload)
        .map_err(|error| HandlerError::malformed(format!("failed to serialize response: {error}")))
}

fn dispatch(payload: Value, deps: &RuntimeDependencies) -> Result<Value, HandlerError> {
    let config = &deps.config;
    let untracked_keys = vec![config.plot_object_key.clone()];
    match config.function {
        FunctionRole::SizeTracking => {
            let event = parse_sqs_event(payload)?;
            let outcome = handle_size_tracking_batch(
                &event,
                now_ms(),
                &untracked_keys,
                &deps.store,
                deps.table()?,
            );
            to_value(outcome.response)
        }
        FunctionRole::Logging => {
            let event = parse_sqs_event(payload)?;
            let logger = AuditLoggerConfig::new(
                config.bucket_name.clone(),
                SamplingWindow::new(config.sampling_window),
                now_ms(),
            )
            .with_untracked_keys(untracked_keys);
            let outcome = handle_audit_batch(&event, &logger, &deps.store, deps.sink()?);
            to_value(outcome.response)
        }
        FunctionRole::Cleaner => {
            let cleaner = CleanerConfig {
                bucket_name: config.bucket_name.clone(),
                threshold_bytes: config.threshold_bytes,
                policy: config.cleaner_policy,
                protected_keys: untracked_keys,
            };
            let report = handle_alarm_event(
                &payload,
                &cleaner,
                &ExecutionBudget::start(CLEANER_BUDGET),
                &deps.store,
            )?;
            to_value(report)
        }
        FunctionRole::Plotting => {
            let plot = PlotConfig::for_bucket(
                config.bucket_name.clone(),
                config.plot_object_key.clone(),
                now_ms(),
            );
            let response = handle_plot_request(
                &payload,
                &plot,
                &ExecutionBudget::start(PLOT_RENDERER_BUDGET),
                deps.table()?,
                &deps.store,
            );
            to_value(response)
        }
        FunctionRole::Driver => {
            let driver = DriverConfig {
                bucket_name: config.bucket_name.clone(),
                retry: RetryPolicy::with_max_attempts(config.driver_max_attempts),
            };
            handle_driver_invocation(
                &default_script(config.driver_step_pause),
                &driver,
                &ExecutionBudget::start(DRIVER_BUDGET),
                &deps.store,
                deps.endpoint()?,
                &ThreadPause,
            )
        }
    }
}

async fn handle_request(
    event: LambdaEvent<Value>,
    deps: &RuntimeDependencies,
) -> Result<Value, Error> {
    let function = deps.config.function.as_str();
    log_info(
        function,
        "invocation_started",
        json!({"request_id": event.context.request_id.clone()}),
    );

    dispatch(event.payload, deps).map_err(|error| {
        log_error(
            function,
            "invocation_failed",
            json!({"kind": error.kind.as_str(), "error": error.message.clone()}),
        );
        Error::from(error)
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = TrackerConfig::from_env()?;
    let deps = Arc::new(RuntimeDependencies::load(config).await?);
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let deps = Arc::clone(&deps);
        async move { handle_request(event, &deps).await }
    }))
    .await
}
