use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use strata_common::error::{Result, StoreError};
use strata_common::time::now;
use strata_common::types::{ObjectDescriptor, PutAttributes};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::multipart::{
    check_completion, list_page, md5_hex, multipart_etag, validate_object_key, validate_part_number,
};
use crate::traits::{CompletedPart, ListOptions, ListPage, MultipartUploadInfo, ObjectStore};

/// Object store held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    descriptor: ObjectDescriptor,
    data: Bytes,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    attrs: PutAttributes,
    token: String,
    initiated: DateTime<Utc>,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug)]
struct StoredPart {
    tag: String,
    data: Bytes,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending_uploads(&self) -> Vec<MultipartUploadInfo> {
        let state = self.state.read().await;
        let mut uploads: Vec<MultipartUploadInfo> = state
            .uploads
            .iter()
            .map(|(upload_id, upload)| MultipartUploadInfo {
                key: upload.key.clone(),
                upload_id: upload_id.clone(),
                initiated: upload.initiated,
            })
            .collect();
        uploads.sort_by(|a, b| a.initiated.cmp(&b.initiated));
        uploads
    }

    pub async fn uploaded_part_numbers(&self, upload_id: &str) -> Vec<u32> {
        let state = self.state.read().await;
        state
            .uploads
            .get(upload_id)
            .map(|upload| upload.parts.keys().copied().collect())
            .unwrap_or_default()
    }
}

pub(crate) fn no_such_upload(key: &str, upload_id: &str) -> StoreError {
    StoreError::NoSuchUpload {
        key: key.to_string(),
        upload_id: upload_id.to_string(),
    }
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

fn pending_upload<'a>(
    state: &'a mut MemoryState,
    key: &str,
    upload_id: &str,
) -> Result<&'a mut PendingUpload> {
    match state.uploads.get_mut(upload_id) {
        Some(upload) if upload.key == key => Ok(upload),
        _ => Err(no_such_upload(key, upload_id)),
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn create_upload(
        &self,
        key: &str,
        attrs: &PutAttributes,
        idempotency_token: &str,
    ) -> Result<String> {
        validate_object_key(key)?;
        let mut state = self.state.write().await;
        if attrs.no_overwrite && state.objects.contains_key(key) {
            return Err(already_exists(key));
        }

        if !idempotency_token.is_empty()
            && let Some((upload_id, _)) = state
                .uploads
                .iter()
                .find(|(_, upload)| upload.key == key && upload.token == idempotency_token)
        {
            return Ok(upload_id.clone());
        }

        let upload_id = Uuid::new_v4().to_string();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                attrs: attrs.clone(),
                token: idempotency_token.to_string(),
                initiated: now(),
                parts: BTreeMap::new(),
            },
        );
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
        let tag = md5_hex(&payload);
        let mut state = self.state.write().await;
        let upload = pending_upload(&mut state, key, upload_id)?;
        upload.parts.insert(
            part_number,
            StoredPart {
                tag: tag.clone(),
                data: payload,
            },
        );
        Ok(tag)
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<ObjectDescriptor> {
        let mut state = self.state.write().await;
        let exists = state.objects.contains_key(key);
        let upload = pending_upload(&mut state, key, upload_id)?;
        if upload.attrs.no_overwrite && exists {
            return Err(already_exists(key));
        }
        check_completion(&parts, |part_number| {
            upload.parts.get(&part_number).map(|part| part.tag.as_str())
        })?;

        let mut data = BytesMut::new();
        for part in &parts {
            if let Some(stored) = upload.parts.get(&part.part_number) {
                data.extend_from_slice(&stored.data);
            }
        }
        let data = data.freeze();
        let etag = multipart_etag(&parts)?;
        let descriptor = ObjectDescriptor::new(key, data.len() as u64, etag, &upload.attrs, now());

        state.uploads.remove(upload_id);
        state.objects.insert(
            key.to_string(),
            StoredObject {
                descriptor: descriptor.clone(),
                data,
            },
        );
        Ok(descriptor)
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        pending_upload(&mut state, key, upload_id)?;
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn put(&self, key: &str, payload: Bytes, attrs: &PutAttributes) -> Result<ObjectDescriptor> {
        validate_object_key(key)?;
        let descriptor =
            ObjectDescriptor::new(key, payload.len() as u64, md5_hex(&payload), attrs, now());
        let mut state = self.state.write().await;
        if attrs.no_overwrite && state.objects.contains_key(key) {
            return Err(already_exists(key));
        }
        state.objects.insert(
            key.to_string(),
            StoredObject {
                descriptor: descriptor.clone(),
                data: payload,
            },
        );
        Ok(descriptor)
    }

    async fn get(&self, key: &str) -> Result<(ObjectDescriptor, Bytes)> {
        let state = self.state.read().await;
        let object = state.objects.get(key).ok_or_else(|| object_not_found(key))?;
        Ok((object.descriptor.clone(), object.data.clone()))
    }

    async fn head(&self, key: &str) -> Result<ObjectDescriptor> {
        let state = self.state.read().await;
        state
            .objects
            .get(key)
            .map(|object| object.descriptor.clone())
            .ok_or_else(|| object_not_found(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| object_not_found(key))
    }

    async fn list(&self, options: &ListOptions) -> Result<ListPage> {
        let state = self.state.read().await;
        let objects = state
            .objects
            .range(options.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(options.prefix.as_str()))
            .map(|(_, object)| object.descriptor.clone())
            .collect();
        Ok(list_page(objects, options))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use strata_common::error::StoreError;
    use strata_common::types::PutAttributes;

    use super::InMemoryStore;
    use crate::multipart::md5_hex;
    use crate::traits::{CompletedPart, ListOptions, ObjectStore};

    #[tokio::test]
    async fn multipart_round_trip_concatenates_in_order() {
        let store = InMemoryStore::new();
        let attrs = PutAttributes::default().with_content_type("text/plain");
        let upload_id = store.create_upload("docs/a.txt", &attrs, "tok").await.unwrap();

        let second = store
            .upload_part("docs/a.txt", &upload_id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let first = store
            .upload_part("docs/a.txt", &upload_id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();

        let descriptor = store
            .complete_upload(
                "docs/a.txt",
                &upload_id,
                vec![
                    CompletedPart { part_number: 1, tag: first },
                    CompletedPart { part_number: 2, tag: second },
                ],
            )
            .await
            .unwrap();

        assert_eq!(descriptor.size, 11);
        assert_eq!(descriptor.content_type, "text/plain");
        assert!(descriptor.etag.ends_with("-2"));

        let (_, data) = store.get("docs/a.txt").await.unwrap();
        assert_eq!(&data[..], b"hello world");
        assert!(store.pending_uploads().await.is_empty());
    }

    #[tokio::test]
    async fn same_token_reuses_open_session() {
        let store = InMemoryStore::new();
        let attrs = PutAttributes::default();
        let first = store.create_upload("k", &attrs, "token-1").await.unwrap();
        let again = store.create_upload("k", &attrs, "token-1").await.unwrap();
        let other = store.create_upload("k", &attrs, "token-2").await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(store.pending_uploads().await.len(), 2);
    }

    #[tokio::test]
    async fn abort_discards_session() {
        let store = InMemoryStore::new();
        let upload_id = store
            .create_upload("k", &PutAttributes::default(), "")
            .await
            .unwrap();
        store
            .upload_part("k", &upload_id, 1, Bytes::from_static(b"x"))
            .await
            .unwrap();
        store.abort_upload("k", &upload_id).await.unwrap();

        assert!(store.pending_uploads().await.is_empty());
        let err = store
            .upload_part("k", &upload_id, 2, Bytes::from_static(b"y"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoSuchUpload { .. }));
        assert!(store.abort_upload("k", &upload_id).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_paginates() {
        let store = InMemoryStore::new();
        let attrs = PutAttributes::default();
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            store.put(key, Bytes::from_static(b"v"), &attrs).await.unwrap();
        }

        let page = store
            .list(&ListOptions::with_prefix("a/").max_keys(2))
            .await
            .unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/1", "a/2"]);
        assert!(page.is_truncated);

        let rest = store
            .list(
                &ListOptions::with_prefix("a/")
                    .marker(page.next_marker.clone().unwrap())
                    .max_keys(2),
            )
            .await
            .unwrap();
        assert_eq!(rest.objects.len(), 1);
        assert!(!rest.is_truncated);

        let head = store.head("b/1").await.unwrap();
        assert_eq!(head.etag, md5_hex(b"v"));
        store.delete("b/1").await.unwrap();
        assert!(store.head("b/1").await.is_err());
    }

    #[tokio::test]
    async fn no_overwrite_refuses_existing_key() {
        let store = InMemoryStore::new();
        let guarded = PutAttributes::default().with_no_overwrite();
        store.put("cfg.json", Bytes::from_static(b"{}"), &guarded).await.unwrap();

        let err = store
            .put("cfg.json", Bytes::from_static(b"[]"), &guarded)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        let (_, data) = store.get("cfg.json").await.unwrap();
        assert_eq!(&data[..], b"{}");

        let err = store.create_upload("cfg.json", &guarded, "").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        store
            .put("cfg.json", Bytes::from_static(b"[]"), &PutAttributes::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn no_overwrite_is_rechecked_at_completion() {
        let store = InMemoryStore::new();
        let guarded = PutAttributes::default().with_no_overwrite();
        let upload_id = store.create_upload("race", &guarded, "").await.unwrap();
        let tag = store
            .upload_part("race", &upload_id, 1, Bytes::from_static(b"late"))
            .await
            .unwrap();
        store
            .put("race", Bytes::from_static(b"early"), &PutAttributes::default())
            .await
            .unwrap();

        let err = store
            .complete_upload("race", &upload_id, vec![CompletedPart { part_number: 1, tag }])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn batch_delete_treats_missing_keys_as_deleted() {
        let store = InMemoryStore::new();
        let attrs = PutAttributes::default();
        store.put("x/1", Bytes::from_static(b"1"), &attrs).await.unwrap();
        store.put("x/2", Bytes::from_static(b"2"), &attrs).await.unwrap();

        let keys = vec!["x/1".to_string(), "x/2".to_string(), "x/missing".to_string()];
        let failed = store.delete_batch(&keys).await.unwrap();
        assert!(failed.is_empty());
        assert!(store.list(&ListOptions::with_prefix("x/")).await.unwrap().objects.is_empty());
    }

    #[tokio::test]
    async fn delimiter_listing_groups_folders() {
        let store = InMemoryStore::new();
        let attrs = PutAttributes::default();
        for key in ["logs/app.log", "logs/2024/01.log", "logs/2024/02.log", "other"] {
            store.put(key, Bytes::from_static(b"v"), &attrs).await.unwrap();
        }

        let page = store
            .list(&ListOptions::with_prefix("logs/").delimiter("/"))
            .await
            .unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "logs/app.log");
        assert_eq!(page.common_prefixes, vec!["logs/2024/"]);
    }
}
