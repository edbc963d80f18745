use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Caller-supplied attributes applied to a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutAttributes {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Refuse to replace an object that already exists at the key.
    #[serde(default)]
    pub no_overwrite: bool,
}

impl PutAttributes {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_no_overwrite(mut self) -> Self {
        self.no_overwrite = true;
        self
    }

    /// Fills in the content type from the file extension when none was given.
    pub fn with_content_type_from_path(mut self, path: impl AsRef<Path>) -> Self {
        if self.content_type.as_deref().is_none_or(str::is_empty)
            && let Some(guessed) = mime_guess::from_path(path).first_raw()
        {
            self.content_type = Some(guessed.to_string());
        }
        self
    }

    pub fn effective_content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// Final metadata describing a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl ObjectDescriptor {
    pub fn new(
        key: impl Into<String>,
        size: u64,
        etag: impl Into<String>,
        attrs: &PutAttributes,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            size,
            etag: etag.into(),
            content_type: attrs.effective_content_type().to_string(),
            cache_control: attrs.cache_control.clone(),
            content_encoding: attrs.content_encoding.clone(),
            last_modified,
            metadata: attrs.metadata.clone(),
        }
    }
}
