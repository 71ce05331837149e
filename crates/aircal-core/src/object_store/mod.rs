//! Durable storage for published daily artifacts and run markers.

mod local;
mod memory;
#[cfg(feature = "s3")]
mod s3;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }

    /// Transient failures worth another attempt. Missing objects and bad
    /// configuration never get better by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Io { .. } | StoreError::Sdk(_) | StoreError::Unavailable(_)
        )
    }
}

/// Flat key/value blob storage. Keys are the deterministic daily file names.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StoreError>;

    /// Every key sorting strictly after `start_after`, in lexicographic order.
    async fn list(&self, start_after: Option<&str>) -> Result<Vec<String>, StoreError>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Reads a small UTF-8 object, treating an absent key as `None`.
pub async fn get_text(store: &dyn ObjectStore, key: &str) -> Result<Option<String>, StoreError> {
    match store.get(key).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim().to_string())),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}
