use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_common::error::{Result, StoreError};
use strata_common::time::now;
use strata_common::types::{ObjectDescriptor, PutAttributes};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::multipart::{
    check_completion, list_page, md5_hex, multipart_etag, validate_object_key, validate_part_number,
};
use crate::memory::no_such_upload;
use crate::traits::{CompletedPart, ListOptions, ListPage, MultipartUploadInfo, ObjectStore};

const SYS_DIR_NAME: &str = ".strata.sys";
const MULTIPART_DIR_NAME: &str = "multipart";
const META_FILE_NAME: &str = "strata.meta";
const DATA_PART_FILE_NAME: &str = "part.1";
const UPLOAD_FILE_NAME: &str = "upload.json";

/// Object store laid out on a local filesystem.
///
/// Every object is a directory holding a JSON metadata file and a data
/// directory named by a fresh uuid. Open multipart sessions live under the
/// system directory, one directory per upload id.
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    root_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectMeta {
    version: String,
    data_dir: String,
    size: u64,
    etag: String,
    content_type: String,
    cache_control: Option<String>,
    content_encoding: Option<String>,
    mod_time: DateTime<Utc>,
    metadata: std::collections::HashMap<String, String>,
}

impl ObjectMeta {
    fn describe(&self, key: &str) -> ObjectDescriptor {
        ObjectDescriptor {
            key: key.to_string(),
            size: self.size,
            etag: self.etag.clone(),
            content_type: self.content_type.clone(),
            cache_control: self.cache_control.clone(),
            content_encoding: self.content_encoding.clone(),
            last_modified: self.mod_time,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UploadRecord {
    key: String,
    token: String,
    attrs: PutAttributes,
    initiated: DateTime<Utc>,
}

impl LocalDiskStore {
    pub async fn new(root_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root_dir).await?;
        fs::create_dir_all(root_dir.join(SYS_DIR_NAME).join(MULTIPART_DIR_NAME)).await?;
        Ok(Self { root_dir })
    }

    pub async fn pending_uploads(&self) -> Result<Vec<MultipartUploadInfo>> {
        let mut uploads = Vec::new();
        let mut entries = fs::read_dir(self.multipart_root()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let upload_id = entry.file_name().to_string_lossy().to_string();
            let Ok(record) = read_upload_record(&entry.path()).await else {
                continue;
            };
            uploads.push(MultipartUploadInfo {
                key: record.key,
                upload_id,
                initiated: record.initiated,
            });
        }
        uploads.sort_by(|a, b| a.initiated.cmp(&b.initiated));
        Ok(uploads)
    }

    fn multipart_root(&self) -> PathBuf {
        self.root_dir.join(SYS_DIR_NAME).join(MULTIPART_DIR_NAME)
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn upload_path(&self, key: &str, upload_id: &str) -> Result<PathBuf> {
        if Uuid::parse_str(upload_id).is_err() {
            return Err(no_such_upload(key, upload_id));
        }
        Ok(self.multipart_root().join(upload_id))
    }

    async fn open_upload(&self, key: &str, upload_id: &str) -> Result<(PathBuf, UploadRecord)> {
        let upload_path = self.upload_path(key, upload_id)?;
        let record = read_upload_record(&upload_path)
            .await
            .map_err(|_| no_such_upload(key, upload_id))?;
        if record.key != key {
            return Err(no_such_upload(key, upload_id));
        }
        Ok((upload_path, record))
    }

    async fn read_object(&self, key: &str) -> Result<(ObjectMeta, PathBuf)> {
        validate_key(key)?;
        let object_path = self.object_path(key);
        let meta_bytes = fs::read(object_path.join(META_FILE_NAME))
            .await
            .map_err(|_| object_not_found(key))?;
        let meta: ObjectMeta = serde_json::from_slice(&meta_bytes).map_err(|err| {
            StoreError::InternalError(format!("failed to parse {META_FILE_NAME}: {err}"))
        })?;
        Ok((meta, object_path))
    }

    /// Creates a fresh data directory for `key`. Returns the data file path,
    /// the directory name, and the data directory of the object it replaces.
    /// Objects nested under `key` share its directory and are not touched.
    async fn prepare_object(
        &self,
        key: &str,
        no_overwrite: bool,
    ) -> Result<(PathBuf, String, Option<String>)> {
        let previous = match self.read_object(key).await {
            Ok((meta, _)) => Some(meta.data_dir),
            Err(StoreError::ObjectNotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        if no_overwrite && previous.is_some() {
            return Err(already_exists(key));
        }

        let data_dir = Uuid::new_v4().to_string();
        let data_path = self.object_path(key).join(&data_dir);
        fs::create_dir_all(&data_path).await?;
        Ok((data_path.join(DATA_PART_FILE_NAME), data_dir, previous))
    }

    /// Drops the data directory of a replaced object once the new metadata is
    /// in place.
    async fn retire_data_dir(&self, key: &str, previous: Option<String>) {
        if let Some(previous) = previous
            && let Err(err) = fs::remove_dir_all(self.object_path(key).join(&previous)).await
        {
            warn!(key = %key, data_dir = %previous, error = %err, "failed to remove replaced data directory");
        }
    }

    /// Removes empty directories from `dir` up to, not including, the root.
    async fn prune_empty_dirs(&self, mut dir: PathBuf) {
        while dir != self.root_dir && dir.starts_with(&self.root_dir) {
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
            let Some(parent) = dir.parent() else {
                break;
            };
            dir = parent.to_path_buf();
        }
    }

    async fn write_meta(&self, key: &str, meta: &ObjectMeta) -> Result<()> {
        let meta_json = serde_json::to_vec(meta).map_err(|err| {
            StoreError::InternalError(format!("failed to serialize {META_FILE_NAME}: {err}"))
        })?;
        fs::write(self.object_path(key).join(META_FILE_NAME), meta_json).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalDiskStore {
    async fn create_upload(
        &self,
        key: &str,
        attrs: &PutAttributes,
        idempotency_token: &str,
    ) -> Result<String> {
        validate_key(key)?;
        if attrs.no_overwrite && self.read_object(key).await.is_ok() {
            return Err(already_exists(key));
        }

        if !idempotency_token.is_empty() {
            let mut entries = fs::read_dir(self.multipart_root()).await?;
            while let Some(entry) = entries.next_entry().await? {
                if let Ok(record) = read_upload_record(&entry.path()).await
                    && record.key == key
                    && record.token == idempotency_token
                {
                    return Ok(entry.file_name().to_string_lossy().to_string());
                }
            }
        }

        let upload_id = Uuid::new_v4().to_string();
        let upload_path = self.multipart_root().join(&upload_id);
        fs::create_dir_all(&upload_path).await?;

        let record = UploadRecord {
            key: key.to_string(),
            token: idempotency_token.to_string(),
            attrs: attrs.clone(),
            initiated: now(),
        };
        let record_json = serde_json::to_vec(&record).map_err(|err| {
            StoreError::InternalError(format!("failed to serialize upload record: {err}"))
        })?;
        fs::write(upload_path.join(UPLOAD_FILE_NAME), record_json).await?;

        debug!(key = %key, upload_id = %upload_id, "created multipart session on disk");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        payload: Bytes,
    ) -> Result<String> {
        validate_part_number(part_number)?;
        let (upload_path, _) = self.open_upload(key, upload_id).await?;

        let tag = md5_hex(&payload);
        fs::write(part_data_path(&upload_path, part_number), &payload).await?;
        // The tag file is written last; its presence marks the part as whole.
        fs::write(part_tag_path(&upload_path, part_number), &tag).await?;
        Ok(tag)
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<ObjectDescriptor> {
        let (upload_path, record) = self.open_upload(key, upload_id).await?;

        let mut stored_tags = std::collections::HashMap::new();
        for part in &parts {
            if let Ok(tag) = fs::read_to_string(part_tag_path(&upload_path, part.part_number)).await {
                stored_tags.insert(part.part_number, tag);
            }
        }
        check_completion(&parts, |part_number| {
            stored_tags.get(&part_number).map(String::as_str)
        })?;

        let (data_file, data_dir, previous) =
            self.prepare_object(key, record.attrs.no_overwrite).await?;
        let mut out = fs::File::create(&data_file).await?;
        let mut size = 0_u64;
        for part in &parts {
            let data = fs::read(part_data_path(&upload_path, part.part_number)).await?;
            size += data.len() as u64;
            out.write_all(&data).await?;
        }
        out.flush().await?;

        let meta = ObjectMeta {
            version: "1.0".to_string(),
            data_dir,
            size,
            etag: multipart_etag(&parts)?,
            content_type: record.attrs.effective_content_type().to_string(),
            cache_control: record.attrs.cache_control.clone(),
            content_encoding: record.attrs.content_encoding.clone(),
            mod_time: now(),
            metadata: record.attrs.metadata.clone(),
        };
        self.write_meta(key, &meta).await?;
        self.retire_data_dir(key, previous).await;
        fs::remove_dir_all(&upload_path).await?;

        Ok(meta.describe(key))
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let (upload_path, _) = self.open_upload(key, upload_id).await?;
        fs::remove_dir_all(upload_path).await?;
        Ok(())
    }

    async fn put(&self, key: &str, payload: Bytes, attrs: &PutAttributes) -> Result<ObjectDescriptor> {
        validate_key(key)?;
        let (data_file, data_dir, previous) = self.prepare_object(key, attrs.no_overwrite).await?;

        let meta = ObjectMeta {
            version: "1.0".to_string(),
            data_dir,
            size: payload.len() as u64,
            etag: md5_hex(&payload),
            content_type: attrs.effective_content_type().to_string(),
            cache_control: attrs.cache_control.clone(),
            content_encoding: attrs.content_encoding.clone(),
            mod_time: now(),
            metadata: attrs.metadata.clone(),
        };

        fs::write(data_file, &payload).await?;
        self.write_meta(key, &meta).await?;
        self.retire_data_dir(key, previous).await;
        Ok(meta.describe(key))
    }

    async fn get(&self, key: &str) -> Result<(ObjectDescriptor, Bytes)> {
        let (meta, object_path) = self.read_object(key).await?;
        let data = fs::read(object_path.join(&meta.data_dir).join(DATA_PART_FILE_NAME))
            .await
            .map_err(|_| object_not_found(key))?;
        Ok((meta.describe(key), Bytes::from(data)))
    }

    async fn head(&self, key: &str) -> Result<ObjectDescriptor> {
        let (meta, _) = self.read_object(key).await?;
        Ok(meta.describe(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (meta, object_path) = self.read_object(key).await?;
        fs::remove_file(object_path.join(META_FILE_NAME)).await?;
        fs::remove_dir_all(object_path.join(&meta.data_dir)).await?;
        self.prune_empty_dirs(object_path).await;
        Ok(())
    }

    async fn list(&self, options: &ListOptions) -> Result<ListPage> {
        let mut dirs = vec![self.root_dir.clone()];
        let mut objects = Vec::new();

        while let Some(dir_path) = dirs.pop() {
            let mut entries = fs::read_dir(&dir_path).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    if dir_path == self.root_dir && entry.file_name() == SYS_DIR_NAME {
                        continue;
                    }
                    dirs.push(path);
                    continue;
                }

                if entry.file_name() != META_FILE_NAME {
                    continue;
                }

                let Some(object_dir) = path.parent() else {
                    continue;
                };
                let Ok(rel) = object_dir.strip_prefix(&self.root_dir) else {
                    continue;
                };
                let object_key = rel.to_string_lossy().replace('\\', "/");
                if !object_key.starts_with(options.prefix.as_str()) {
                    continue;
                }

                let meta_bytes = fs::read(&path).await?;
                let meta: ObjectMeta = serde_json::from_slice(&meta_bytes).map_err(|err| {
                    StoreError::InternalError(format!(
                        "failed to parse {META_FILE_NAME} during list: {err}"
                    ))
                })?;
                objects.push(meta.describe(&object_key));
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(list_page(objects, options))
    }
}

fn validate_key(key: &str) -> Result<()> {
    validate_object_key(key)?;
    if key == SYS_DIR_NAME || key.starts_with(&format!("{SYS_DIR_NAME}/")) {
        return Err(StoreError::InvalidObjectName(key.to_string()));
    }
    // the metadata file name is reserved inside every object directory
    if key.split('/').any(|component| component == META_FILE_NAME) {
        return Err(StoreError::InvalidObjectName(key.to_string()));
    }
    Ok(())
}

fn part_data_path(upload_path: &Path, part_number: u32) -> PathBuf {
    upload_path.join(format!("part.{part_number}"))
}

fn part_tag_path(upload_path: &Path, part_number: u32) -> PathBuf {
    upload_path.join(format!("part.{part_number}.etag"))
}

async fn read_upload_record(upload_path: &Path) -> Result<UploadRecord> {
    let bytes = fs::read(upload_path.join(UPLOAD_FILE_NAME)).await?;
    serde_json::from_slice(&bytes)
        .map_err(|err| StoreError::InternalError(format!("failed to parse upload record: {err}")))
}

fn already_exists(key: &str) -> StoreError {
    StoreError::AlreadyExists {
        key: key.to_string(),
    }
}

fn object_not_found(key: &str) -> StoreError {
    StoreError::ObjectNotFound {
        key: key.to_string(),
    }
}
