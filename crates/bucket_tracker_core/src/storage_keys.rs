use chrono::{DateTime, Utc};

pub const LOG_STREAM_PREFIX: &str = "s3-events";

/// Log stream name for the sampling window starting at `at`, e.g. `s3-events-2026-02-14-09-30-05`.
pub fn log_stream_name(at: DateTime<Utc>) -> String {
    format!("{LOG_STREAM_PREFIX}-{}", at.format("%Y-%m-%d-%H-%M-%S"))
}

pub fn object_uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{}", key.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn builds_log_stream_name_from_clock() {
        let at = Utc
            .with_ymd_and_hms(2026, 2, 14, 9, 30, 5)
            .single()
            .expect("valid timestamp");
        assert_eq!(log_stream_name(at), "s3-events-2026-02-14-09-30-05");
    }

    #[test]
    fn builds_object_uri() {
        assert_eq!(object_uri("tracked", "/plot.svg"), "s3://tracked/plot.svg");
    }
}
