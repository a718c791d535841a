use bucket_tracker_core::contract::ObjectSummary;

pub trait ObjectStore {
    /// Every live object in `bucket`; implementations follow pagination.
    fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>, String>;
    fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String>;
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), String>;
    /// Deleting a missing key succeeds.
    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), String>;
}
