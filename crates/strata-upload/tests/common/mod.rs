#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use strata_common::error::{Result, StoreError};
use strata_common::types::{ObjectDescriptor, PutAttributes};
use strata_storage::memory::InMemoryStore;
use strata_storage::traits::{CompletedPart, ListOptions, ListPage, ObjectStore};
use strata_upload::UploadConfig;
use tokio::io::{AsyncRead, ReadBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { key: String, token: String },
    UploadPart(u32),
    Complete(Vec<u32>),
    Abort,
    Put { size: usize },
    Head,
}

/// In-memory store with scripted failures and a call log.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    calls: Mutex<Vec<Call>>,
    failing_parts: HashSet<u32>,
    held_parts: HashSet<u32>,
    part_delays: HashMap<u32, Duration>,
    fail_create: bool,
    fail_complete: bool,
    fail_abort: bool,
    fail_put: bool,
    fail_head: bool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_part(mut self, part_number: u32) -> Self {
        self.failing_parts.insert(part_number);
        self
    }

    /// The part upload never returns unless cancelled.
    pub fn hold_part(mut self, part_number: u32) -> Self {
        self.held_parts.insert(part_number);
        self
    }

    pub fn delay_part(mut self, part_number: u32, delay: Duration) -> Self {
        self.part_delays.insert(part_number, delay);
        self
    }

    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn fail_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn fail_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub fn fail_put(mut self) -> Self {
        self.fail_put = true;
        self
    }

    pub fn fail_head(mut self) -> Self {
        self.fail_head = true;
        self
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn uploaded_parts(&self) -> Vec<u32> {
        let mut parts: Vec<u32> = self
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadPart(n) => Some(n),
                _ => None,
            })
            .collect();
        parts.sort_unstable();
        parts
    }

    pub fn completes(&self) -> Vec<Vec<u32>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Complete(parts) => Some(parts),
                _ => None,
            })
            .collect()
    }

    pub fn aborts(&self) -> usize {
        self.calls().iter().filter(|call| **call == Call::Abort).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {what} failure"))
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn create_upload(
        &self,
        key: &str,
        attrs: &PutAttributes,
        idempotency_token: &str,
    ) -> Result<String> {
        self.record(Call::Create {
            key: key.to_string(),
            token: idempotency_token.to_string(),
        });
        if self.fail_create {
            return Err(injected("create"));
        }
        self.inner.create_upload(key, attrs, idempotency_token).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        payload: Bytes,
    ) -> Result<String> {
        self.record(Call::UploadPart(part_number));
        if let Some(delay) = self.part_delays.get(&part_number) {
            tokio::time::sleep(*delay).await;
        }
        if self.held_parts.contains(&part_number) {
            std::future::pending::<()>().await;
        }
        if self.failing_parts.contains(&part_number) {
            return Err(StoreError::Unavailable(format!(
                "injected failure for part {part_number}"
            )));
        }
        self.inner.upload_part(key, upload_id, part_number, payload).await
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<ObjectDescriptor> {
        self.record(Call::Complete(parts.iter().map(|p| p.part_number).collect()));
        if self.fail_complete {
            return Err(injected("complete"));
        }
        self.inner.complete_upload(key, upload_id, parts).await
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.record(Call::Abort);
        if self.fail_abort {
            return Err(injected("abort"));
        }
        self.inner.abort_upload(key, upload_id).await
    }

    async fn put(&self, key: &str, payload: Bytes, attrs: &PutAttributes) -> Result<ObjectDescriptor> {
        self.record(Call::Put {
            size: payload.len(),
        });
        if self.fail_put {
            return Err(injected("put"));
        }
        self.inner.put(key, payload, attrs).await
    }

    async fn get(&self, key: &str) -> Result<(ObjectDescriptor, Bytes)> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> Result<ObjectDescriptor> {
        self.record(Call::Head);
        if self.fail_head {
            return Err(injected("head"));
        }
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, options: &ListOptions) -> Result<ListPage> {
        self.inner.list(options).await
    }
}

/// Config that accepts tiny parts so tests can stay small.
pub fn small_part_config() -> UploadConfig {
    UploadConfig {
        min_part_size: 1,
        ..UploadConfig::default()
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Reader over a buffer that counts how many bytes have been handed out.
pub struct CountingReader {
    data: Vec<u8>,
    pos: usize,
    read: Arc<AtomicUsize>,
}

impl CountingReader {
    pub fn new(data: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let read = Arc::new(AtomicUsize::new(0));
        (
            Self {
                data,
                pos: 0,
                read: Arc::clone(&read),
            },
            read,
        )
    }
}

impl AsyncRead for CountingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let end = (self.pos + buf.remaining()).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        buf.put_slice(&chunk);
        self.read.fetch_add(chunk.len(), Ordering::SeqCst);
        self.pos = end;
        Poll::Ready(Ok(()))
    }
}

/// Hands out `good` bytes, then fails every read.
pub struct FailingReader {
    good: Vec<u8>,
    pos: usize,
}

impl FailingReader {
    pub fn new(good: Vec<u8>) -> Self {
        Self { good, pos: 0 }
    }
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos >= self.good.len() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::UnexpectedEof, "source went away")));
        }
        let end = (self.pos + buf.remaining()).min(self.good.len());
        let chunk = self.good[self.pos..end].to_vec();
        buf.put_slice(&chunk);
        self.pos = end;
        Poll::Ready(Ok(()))
    }
}
