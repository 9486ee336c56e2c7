//! Upload storage for generated export archives.
//!
//! Keys are `/`-separated relative paths such as `user_3/birds_task_json.zip`.

pub mod filesystem;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{AppError, Result};

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store content at `key`, replacing any existing object.
    async fn put(&self, key: &str, content: Bytes) -> Result<()>;

    /// Read the object at `key`; `AppError::NotFound` if missing.
    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete the object at `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Human-readable backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Validate a storage key: relative, non-empty components, no `.` or `..`.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(AppError::Storage(format!("Invalid storage key '{}'", key)));
    }
    Ok(())
}

/// Build the storage backend selected by `STORAGE_BACKEND`.
pub fn from_config(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    match config.storage_backend.as_str() {
        "s3" => {
            let bucket = config.s3_bucket.as_deref().ok_or_else(|| {
                AppError::Config("S3_BUCKET must be set when STORAGE_BACKEND=s3".to_string())
            })?;
            Ok(Arc::new(s3::S3Storage::from_env(bucket)?))
        }
        _ => Ok(Arc::new(filesystem::FilesystemStorage::new(
            &config.upload_folder,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(validate_key("user_1/birds_task_json.zip").is_ok());
        assert!(validate_key("file.zip").is_ok());
    }

    #[test]
    fn test_rejects_traversal_and_absolute() {
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("user_1/../../etc/passwd").is_err());
        assert!(validate_key("user_1/./x").is_err());
        assert!(validate_key("user_1//x").is_err());
        assert!(validate_key("user_1\\x").is_err());
    }

    #[test]
    fn test_from_config_defaults_to_filesystem() {
        let storage = from_config(&Config::default()).unwrap();
        assert_eq!(storage.backend_name(), "filesystem");
    }
}
