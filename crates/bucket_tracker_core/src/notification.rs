//! Decoding of object-store notifications delivered through the event bus.
//!
//! A queue message body is either an SNS envelope whose `Message` field holds
//! the S3 notification as a JSON string, or the S3 notification itself.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::contract::{DecodeError, ObjectEvent};

const TEST_EVENT: &str = "s3:TestEvent";

#[derive(Debug, Deserialize)]
struct S3Notification {
    #[serde(rename = "Records", default)]
    records: Vec<S3Record>,
    #[serde(rename = "Event")]
    event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S3Record {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
    size: Option<u64>,
}

pub fn decode_message_body(body: &str) -> Result<Vec<ObjectEvent>, DecodeError> {
    let outer: Value = serde_json::from_str(body)
        .map_err(|error| DecodeError::new(format!("Malformed message body: {error}")))?;

    let notification = match outer.get("Message") {
        Some(Value::String(message)) => serde_json::from_str::<S3Notification>(message)
            .map_err(|error| DecodeError::new(format!("Malformed SNS message: {error}")))?,
        Some(_) => return Err(DecodeError::new("SNS Message field must be a string")),
        None => serde_json::from_value::<S3Notification>(outer)
            .map_err(|error| DecodeError::new(format!("Malformed S3 notification: {error}")))?,
    };

    if notification.event.as_deref() == Some(TEST_EVENT) {
        return Ok(Vec::new());
    }

    if notification.records.is_empty() {
        return Err(DecodeError::new("S3 notification contains no records"));
    }

    notification.records.into_iter().map(decode_record).collect()
}

fn decode_record(record: S3Record) -> Result<ObjectEvent, DecodeError> {
    let bucket_name = record.s3.bucket.name;
    if bucket_name.trim().is_empty() {
        return Err(DecodeError::new("bucket name cannot be empty"));
    }
    let object_key = decode_object_key(&record.s3.object.key)?;

    if record.event_name.starts_with("ObjectCreated") {
        let size = record.s3.object.size.ok_or_else(|| {
            DecodeError::new(format!(
                "ObjectCreated record for '{object_key}' is missing object size"
            ))
        })?;
        Ok(ObjectEvent::Created {
            bucket_name,
            object_key,
            size,
        })
    } else if record.event_name.starts_with("ObjectRemoved") {
        Ok(ObjectEvent::Removed {
            bucket_name,
            object_key,
        })
    } else {
        Err(DecodeError::new(format!(
            "Unsupported event name '{}'",
            record.event_name
        )))
    }
}

/// S3 notification keys are form-encoded: `+` is a space and reserved bytes
/// are `%XX` escapes.
pub fn decode_object_key(raw: &str) -> Result<String, DecodeError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|value| value.into_owned())
        .map_err(|error| DecodeError::new(format!("Object key is not valid UTF-8: {error}")))
}

/// Builds the SNS-wrapped notification body the event bus would deliver for
/// `events`.
pub fn encode_notification(events: &[ObjectEvent]) -> String {
    let records: Vec<Value> = events
        .iter()
        .map(|event| {
            let (event_name, object) = match event {
                ObjectEvent::Created {
                    object_key, size, ..
                } => (
                    "ObjectCreated:Put",
                    json!({ "key": urlencoding::encode(object_key), "size": size }),
                ),
                ObjectEvent::Removed { object_key, .. } => (
                    "ObjectRemoved:Delete",
                    json!({ "key": urlencoding::encode(object_key) }),
                ),
            };
            json!({
                "eventSource": "aws:s3",
                "eventName": event_name,
                "s3": {
                    "bucket": { "name": event.bucket_name() },
                    "object": object,
                },
            })
        })
        .collect();

    json!({
        "Type": "Notification",
        "Message": json!({ "Records": records }).to_string(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sns_body(inner: Value) -> String {
        json!({ "Type": "Notification", "Message": inner.to_string() }).to_string()
    }

    #[test]
    fn decodes_created_record_from_sns_envelope() {
        let body = sns_body(json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": "tracked" },
                    "object": { "key": "assignment1.txt", "size": 19 }
                }
            }]
        }));

        let events = decode_message_body(&body).expect("body should decode");
        assert_eq!(
            events,
            vec![ObjectEvent::Created {
                bucket_name: "tracked".to_string(),
                object_key: "assignment1.txt".to_string(),
                size: 19,
            }]
        );
    }

    #[test]
    fn decodes_raw_s3_notification_without_envelope() {
        let body = json!({
            "Records": [{
                "eventName": "ObjectRemoved:Delete",
                "s3": {
                    "bucket": { "name": "tracked" },
                    "object": { "key": "reports/q1+summary%282%29.txt" }
                }
            }]
        })
        .to_string();

        let events = decode_message_body(&body).expect("body should decode");
        assert_eq!(events[0].object_key(), "reports/q1 summary(2).txt");
        assert_eq!(events[0].size_delta(), 0);
    }

    #[test]
    fn test_event_decodes_to_no_events() {
        let body = sns_body(json!({
            "Service": "Amazon S3",
            "Event": "s3:TestEvent",
            "Bucket": "tracked"
        }));
        assert!(decode_message_body(&body)
            .expect("test event should decode")
            .is_empty());
    }

    #[test]
    fn rejects_created_record_without_size() {
        let body = sns_body(json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": { "bucket": { "name": "tracked" }, "object": { "key": "a" } }
            }]
        }));
        let error = decode_message_body(&body).expect_err("missing size should fail");
        assert!(error.message().contains("missing object size"));
    }

    #[test]
    fn rejects_unsupported_event_name() {
        let body = sns_body(json!({
            "Records": [{
                "eventName": "ObjectRestore:Post",
                "s3": { "bucket": { "name": "tracked" }, "object": { "key": "a" } }
            }]
        }));
        let error = decode_message_body(&body).expect_err("restore events are not tracked");
        assert!(error.message().contains("Unsupported event name"));
    }

    #[test]
    fn rejects_non_json_body() {
        let error = decode_message_body("not json").expect_err("garbage should fail");
        assert!(error.message().contains("Malformed message body"));
    }

    #[test]
    fn encoded_notification_decodes_back_with_special_keys() {
        let events = vec![
            ObjectEvent::Created {
                bucket_name: "tracked".to_string(),
                object_key: "dir/with space+plus.txt".to_string(),
                size: 7,
            },
            ObjectEvent::Removed {
                bucket_name: "tracked".to_string(),
                object_key: "old.txt".to_string(),
            },
        ];

        let decoded =
            decode_message_body(&encode_notification(&events)).expect("encoded body decodes");
        assert_eq!(decoded, events);
    }
}
