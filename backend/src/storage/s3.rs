//! S3-compatible object storage via the Apache `object_store` crate.
//!
//! ```bash
//! STORAGE_BACKEND=s3
//! S3_BUCKET=crowdtask-exports
//! AWS_REGION=eu-west-1
//! AWS_ACCESS_KEY_ID=...
//! AWS_SECRET_ACCESS_KEY=...
//! AWS_ENDPOINT=https://minio.internal:9000   # optional, for S3-compatible stores
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::storage::{validate_key, StorageBackend};

pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
}

impl S3Storage {
    /// Build from the standard `AWS_*` environment variables.
    pub fn from_env(bucket: &str) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| AppError::Config(format!("Invalid S3 configuration: {}", e)))?;
        tracing::info!(bucket = %bucket, "Using S3 storage backend");
        Ok(Self::with_store(Arc::new(store)))
    }

    /// Wrap an existing object store (any `object_store` implementation).
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn object_path(key: &str) -> Result<ObjectPath> {
        validate_key(key)?;
        ObjectPath::parse(key)
            .map_err(|e| AppError::Storage(format!("Invalid object path '{}': {}", key, e)))
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        let path = Self::object_path(key)?;
        self.store
            .put(&path, PutPayload::from(content))
            .await
            .map_err(|e| AppError::Storage(format!("S3 upload of {} failed: {}", key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = Self::object_path(key)?;
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(AppError::NotFound(format!("Object not found: {}", key)))
            }
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "S3 download of {} failed: {}",
                    key, e
                )))
            }
        };
        result
            .bytes()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read {}: {}", key, e)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = Self::object_path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(AppError::Storage(format!(
                "S3 head of {} failed: {}",
                key, e
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = Self::object_path(key)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "S3 delete of {} failed: {}",
                key, e
            ))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn storage() -> S3Storage {
        S3Storage::with_store(Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn test_put_get_exists_delete() {
        let storage = storage();
        let key = "user_4/stars_task_run_csv.zip";

        assert!(!storage.exists(key).await.unwrap());
        storage
            .put(key, Bytes::from_static(b"archive"))
            .await
            .unwrap();
        assert!(storage.exists(key).await.unwrap());
        assert_eq!(
            storage.get(key).await.unwrap(),
            Bytes::from_static(b"archive")
        );

        storage.delete(key).await.unwrap();
        assert!(!storage.exists(key).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        assert!(matches!(
            storage().get("user_1/none.zip").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_traversal_key() {
        assert!(storage().exists("../secret").await.is_err());
    }
}
