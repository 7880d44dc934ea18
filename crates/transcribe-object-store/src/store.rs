use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use transcribe_core::{ObjectMetadata, ObjectStore, ObjectStoreError};

/// Configuration needed to talk to one S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectStoreConfig {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
}

/// S3-compatible implementation of [`ObjectStore`].
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(config: S3ObjectStoreConfig) -> Self {
        let credentials = aws_credential_types::Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "transcribe-object-store",
        );

        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region))
            .endpoint_url(config.endpoint_url)
            .credentials_provider(credentials)
            .load()
            .await;

        let client = Client::new(&shared_config);

        Self { client, bucket: config.bucket }
    }

    /// Construct directly from an already-configured client, used by tests
    /// that point at a local MinIO instance or similar.
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self { client, bucket: bucket.into() }
    }

    fn classify_error(object_key: &str, err: &aws_sdk_s3::error::SdkError<impl std::fmt::Debug>) -> ObjectStoreError {
        use aws_sdk_s3::error::SdkError;

        match err {
            SdkError::TimeoutError(_) => ObjectStoreError::Timeout { object_key: object_key.to_string(), timeout_secs: 300 },
            SdkError::DispatchFailure(_) => ObjectStoreError::Timeout { object_key: object_key.to_string(), timeout_secs: 300 },
            other => ObjectStoreError::Other { object_key: object_key.to_string(), reason: format!("{other:?}") },
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn download_to_path(&self, object_key: &str, target_path: &Path) -> Result<(), ObjectStoreError> {
        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ObjectStoreError::Other {
                object_key: object_key.to_string(),
                reason: format!("failed to create parent directory: {e}"),
            })?;
        }

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|err| {
                if matches!(err.as_service_error(), Some(e) if e.is_no_such_key()) {
                    ObjectStoreError::NotFound { object_key: object_key.to_string() }
                } else {
                    Self::classify_error(object_key, &err)
                }
            })?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(target_path).await.map_err(|e| ObjectStoreError::Other {
            object_key: object_key.to_string(),
            reason: format!("failed to create temp file: {e}"),
        })?;

        while let Some(chunk) = body.try_next().await.map_err(|e| ObjectStoreError::Other {
            object_key: object_key.to_string(),
            reason: format!("stream error: {e}"),
        })? {
            file.write_all(&chunk).await.map_err(|e| ObjectStoreError::Other {
                object_key: object_key.to_string(),
                reason: format!("write error: {e}"),
            })?;
        }

        tracing::debug!(object_key, target_path = %target_path.display(), "downloaded object");
        Ok(())
    }

    async fn object_exists(&self, object_key: &str) -> Result<bool, ObjectStoreError> {
        match self.client.head_object().bucket(&self.bucket).key(object_key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if matches!(err.as_service_error(), Some(e) if e.is_not_found()) {
                    Ok(false)
                } else {
                    Err(Self::classify_error(object_key, &err))
                }
            }
        }
    }

    async fn object_metadata(&self, object_key: &str) -> Result<ObjectMetadata, ObjectStoreError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|err| {
                if matches!(err.as_service_error(), Some(e) if e.is_not_found()) {
                    ObjectStoreError::NotFound { object_key: object_key.to_string() }
                } else {
                    Self::classify_error(object_key, &err)
                }
            })?;

        Ok(ObjectMetadata {
            content_length: response.content_length().unwrap_or(0).max(0) as u64,
            content_type: response.content_type().map(str::to_string),
        })
    }

    async fn generate_signed_put_url(
        &self,
        object_key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<(String, DateTime<Utc>), ObjectStoreError> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| ObjectStoreError::Other {
            object_key: object_key.to_string(),
            reason: e.to_string(),
        })?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|err| Self::classify_error(object_key, &err))?;

        let expires_at = Utc::now() + chrono::Duration::from_std(expires_in).unwrap_or_default();
        Ok((request.uri().to_string(), expires_at))
    }

    async fn generate_signed_get_url(&self, object_key: &str, expires_in: Duration) -> Result<String, ObjectStoreError> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| ObjectStoreError::Other {
            object_key: object_key.to_string(),
            reason: e.to_string(),
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_key)
            .presigned(presigning)
            .await
            .map_err(|err| Self::classify_error(object_key, &err))?;

        Ok(request.uri().to_string())
    }
}
