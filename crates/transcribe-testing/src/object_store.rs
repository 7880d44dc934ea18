use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use transcribe_core::{ObjectMetadata, ObjectStore, ObjectStoreError};

/// In-memory object store keyed by object key, holding raw bytes instead of
/// talking to a real bucket. Lets worker-pipeline tests exercise download
/// failures (`fail_with`) without network access.
#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, ObjectStoreError>>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, object_key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(object_key.to_string(), bytes);
    }

    /// Makes the next call against `object_key` return `err` instead of
    /// touching `objects`.
    pub fn fail_with(&self, object_key: &str, err: ObjectStoreError) {
        self.failures.lock().unwrap().insert(object_key.to_string(), err);
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn download_to_path(&self, object_key: &str, target_path: &Path) -> Result<(), ObjectStoreError> {
        if let Some(err) = self.failures.lock().unwrap().remove(object_key) {
            return Err(err);
        }

        let objects = self.objects.lock().unwrap();
        let bytes = objects.get(object_key).ok_or_else(|| ObjectStoreError::NotFound { object_key: object_key.to_string() })?;

        if let Some(parent) = target_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ObjectStoreError::Other { object_key: object_key.to_string(), reason: e.to_string() })?;
        }
        std::fs::write(target_path, bytes)
            .map_err(|e| ObjectStoreError::Other { object_key: object_key.to_string(), reason: e.to_string() })?;

        Ok(())
    }

    async fn object_exists(&self, object_key: &str) -> Result<bool, ObjectStoreError> {
        if let Some(err) = self.failures.lock().unwrap().remove(object_key) {
            return Err(err);
        }
        Ok(self.objects.lock().unwrap().contains_key(object_key))
    }

    async fn object_metadata(&self, object_key: &str) -> Result<ObjectMetadata, ObjectStoreError> {
        if let Some(err) = self.failures.lock().unwrap().remove(object_key) {
            return Err(err);
        }

        let objects = self.objects.lock().unwrap();
        let bytes = objects.get(object_key).ok_or_else(|| ObjectStoreError::NotFound { object_key: object_key.to_string() })?;

        Ok(ObjectMetadata { content_length: bytes.len() as u64, content_type: None })
    }

    async fn generate_signed_put_url(
        &self,
        object_key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> Result<(String, DateTime<Utc>), ObjectStoreError> {
        let expires_at = Utc::now() + chrono::Duration::from_std(expires_in).unwrap_or_default();
        Ok((format!("https://fake-store.test/{object_key}?put=1"), expires_at))
    }

    async fn generate_signed_get_url(&self, object_key: &str, _expires_in: Duration) -> Result<String, ObjectStoreError> {
        Ok(format!("https://fake-store.test/{object_key}?get=1"))
    }
}
