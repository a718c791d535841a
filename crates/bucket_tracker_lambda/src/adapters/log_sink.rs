pub trait LogSink {
    /// Creates `stream` if nobody has yet. Returns `Ok(false)` when the stream
    /// already exists; exactly one concurrent caller sees `Ok(true)`.
    fn claim_stream(&self, stream: &str) -> Result<bool, String>;
    fn put_record(&self, stream: &str, timestamp_ms: i64, message: &str) -> Result<(), String>;
}
