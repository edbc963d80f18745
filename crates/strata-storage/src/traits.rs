use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_common::error::{Result, StoreError};
use strata_common::types::{ObjectDescriptor, PutAttributes};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub tag: String,
}

/// Listing request. With a non-empty `delimiter`, keys that continue past the
/// delimiter after `prefix` are rolled up into `ListPage::common_prefixes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub prefix: String,
    pub delimiter: String,
    pub marker: String,
    /// Zero means no limit.
    pub max_keys: usize,
}

impl ListOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiated: DateTime<Utc>,
}

/// Remote object store consumed by the upload engine.
///
/// Retry, backoff and credential handling live behind this trait. Callers
/// treat every error as final for the attempt they made.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Opens a multipart session. Repeating the call with the same key and
    /// idempotency token while the session is still open returns the same id.
    async fn create_upload(
        &self,
        key: &str,
        attrs: &PutAttributes,
        idempotency_token: &str,
    ) -> Result<String>;
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        payload: Bytes,
    ) -> Result<String>;
    /// `parts` must be ascending by part number and name every uploaded part
    /// that belongs in the object.
    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<ObjectDescriptor>;
    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<()>;
    async fn put(&self, key: &str, payload: Bytes, attrs: &PutAttributes) -> Result<ObjectDescriptor>;
    async fn get(&self, key: &str) -> Result<(ObjectDescriptor, Bytes)>;
    async fn head(&self, key: &str) -> Result<ObjectDescriptor>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Deletes every key and returns the ones that could not be removed.
    /// Keys that are already gone count as deleted.
    async fn delete_batch(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for key in keys {
            match self.delete(key).await {
                Ok(()) | Err(StoreError::ObjectNotFound { .. }) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "batch delete failed for key");
                    failed.push(key.clone());
                }
            }
        }
        Ok(failed)
    }

    async fn list(&self, options: &ListOptions) -> Result<ListPage>;
}
