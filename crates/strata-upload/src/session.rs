use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use strata_common::error::StoreError;
use strata_common::types::{ObjectDescriptor, PutAttributes};
use strata_storage::traits::{CompletedPart, ObjectStore};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::{ChunkLimits, ChunkReport, run_chunker};
use crate::collector::{Collected, PartFailure, collect};
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::planner::{PartPlan, plan};
use crate::state::SessionState;
use crate::worker::{PartError, PartTarget, WorkerPool};

/// Per-call overrides for [`Uploader::upload_stream`].
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub part_size: Option<u64>,
    pub concurrency: Option<usize>,
    pub attributes: PutAttributes,
    pub idempotency_token: Option<String>,
    pub timeout: Option<Duration>,
}

/// Entry point for streaming uploads into one store.
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, config: UploadConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Uploads `source` to `key` as one multipart object, or with a single put
    /// when the input turns out to be small.
    ///
    /// Cancelling `cancel` stops the upload and aborts the remote session.
    /// Either the final descriptor or a single error is returned, never both.
    /// Dropping the returned future stops every part upload but cannot abort
    /// the remote session; that session is left for the store to expire.
    pub async fn upload_stream<R>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        source: R,
        options: UploadOptions,
    ) -> Result<ObjectDescriptor, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut plan = plan(
            options.part_size.unwrap_or(self.config.default_part_size),
            options.concurrency.unwrap_or(self.config.default_concurrency),
            self.config.min_part_size,
            self.config.max_part_size,
        );
        plan.concurrency = plan.concurrency.min(self.config.max_concurrency).max(1);

        let session = UploadSession {
            store: Arc::clone(&self.store),
            key: key.to_string(),
            upload_id: String::new(),
            idempotency_token: options
                .idempotency_token
                .filter(|token| !token.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            plan,
            channel_depth: self.config.channel_depth(plan.concurrency),
            single_put_threshold: self.config.single_put_threshold,
            timeout: options.timeout.or_else(|| self.config.upload_timeout()),
            state: SessionState::NotStarted,
        };
        session.run(cancel, source, options.attributes).await
    }
}

/// Why an upload is being torn down.
#[derive(Debug)]
enum Failure {
    StreamRead(std::io::Error),
    PartUpload { part_number: u32, source: StoreError },
    Cancelled,
    TimedOut(Duration),
    IncompleteParts { expected: u32, collected: usize },
    SinglePut(StoreError),
}

impl Failure {
    fn into_error(self, key: String, upload_id: String, abort: Option<StoreError>) -> UploadError {
        match self {
            Self::StreamRead(source) => UploadError::StreamRead {
                key,
                upload_id,
                source,
                abort,
            },
            Self::PartUpload {
                part_number,
                source,
            } => UploadError::PartUpload {
                key,
                upload_id,
                part_number,
                source,
                abort,
            },
            Self::Cancelled => UploadError::Cancelled {
                key,
                upload_id,
                abort,
            },
            Self::TimedOut(timeout) => UploadError::TimedOut {
                key,
                upload_id,
                timeout,
                abort,
            },
            Self::IncompleteParts {
                expected,
                collected,
            } => UploadError::IncompleteParts {
                key,
                upload_id,
                expected,
                collected,
                abort,
            },
            Self::SinglePut(source) => UploadError::SinglePut {
                key,
                upload_id,
                source,
                abort,
            },
        }
    }
}

/// One logical upload. Owned by a single call and consumed by [`run`].
///
/// [`run`]: UploadSession::run
pub(crate) struct UploadSession {
    store: Arc<dyn ObjectStore>,
    key: String,
    upload_id: String,
    idempotency_token: String,
    plan: PartPlan,
    channel_depth: usize,
    single_put_threshold: u64,
    timeout: Option<Duration>,
    state: SessionState,
}

impl UploadSession {
    fn transition(&mut self, next: SessionState) -> Result<(), UploadError> {
        if !self.state.can_transition_to(next) {
            return Err(UploadError::InvalidTransition {
                key: self.key.clone(),
                from: self.state,
                to: next,
            });
        }
        debug!(key = %self.key, upload_id = %self.upload_id, from = ?self.state, to = ?next, "upload session transition");
        self.state = next;
        Ok(())
    }

    pub(crate) async fn run<R>(
        mut self,
        caller: &CancellationToken,
        source: R,
        attrs: PutAttributes,
    ) -> Result<ObjectDescriptor, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        self.upload_id = self
            .store
            .create_upload(&self.key, &attrs, &self.idempotency_token)
            .await
            .map_err(|source| UploadError::Create {
                key: self.key.clone(),
                source,
            })?;
        self.transition(SessionState::Created)?;

        info!(
            key = %self.key,
            upload_id = %self.upload_id,
            upload_token = %self.idempotency_token,
            part_size = self.plan.part_size,
            concurrency = self.plan.concurrency,
            "starting multipart upload"
        );

        self.transition(SessionState::Uploading)?;
        let (mut report, collected) = self.pump(caller, source).await;

        if let Some(failure) = self.classify(caller, &report, &collected) {
            return Err(self.abort(failure).await);
        }

        if report.parts_emitted == 0 {
            let payload = report.inline.take().unwrap_or_default();
            return self.finish_single(payload, attrs).await;
        }

        match collected.into_ordered_parts(report.parts_emitted) {
            Ok(parts) => self.complete(parts).await,
            Err(incomplete) => Err(self
                .abort(Failure::IncompleteParts {
                    expected: incomplete.expected,
                    collected: incomplete.collected,
                })
                .await),
        }
    }

    /// Runs chunker, workers and collector until every part has reported.
    /// Workers are cancelled if this future is dropped before that.
    async fn pump<R>(&self, caller: &CancellationToken, source: R) -> (ChunkReport, Collected)
    where
        R: AsyncRead + Unpin,
    {
        let pipeline = caller.child_token();
        let _stop_workers = pipeline.clone().drop_guard();
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let (task_tx, task_rx) = mpsc::channel(self.channel_depth);
        let (result_tx, result_rx) = mpsc::channel(self.channel_depth);

        let pool = WorkerPool::spawn(
            self.plan.concurrency,
            PartTarget {
                store: Arc::clone(&self.store),
                key: Arc::from(self.key.as_str()),
                upload_id: Arc::from(self.upload_id.as_str()),
            },
            task_rx,
            result_tx,
            pipeline.clone(),
        );

        let limits = ChunkLimits {
            inline_threshold: usize::try_from(self.single_put_threshold).unwrap_or(usize::MAX),
            ..ChunkLimits::new(usize::try_from(self.plan.part_size).unwrap_or(usize::MAX))
        };
        let (report, collected) = tokio::join!(
            run_chunker(pipeline.clone(), source, limits, task_tx),
            collect(&pipeline, result_rx, deadline),
        );
        pool.join().await;

        debug!(
            key = %self.key,
            upload_id = %self.upload_id,
            parts = report.parts_emitted,
            bytes = report.bytes_emitted,
            results = collected.results_seen,
            "upload pipeline drained"
        );
        (report, collected)
    }

    /// Picks the failure to surface, if any. A store failure observed first
    /// outranks the cancellations it caused.
    fn classify(
        &self,
        caller: &CancellationToken,
        report: &ChunkReport,
        collected: &Collected,
    ) -> Option<Failure> {
        if let Some(PartFailure {
            part_number,
            error: PartError::Store(source),
        }) = &collected.first_failure
        {
            return Some(Failure::PartUpload {
                part_number: *part_number,
                source: clone_store_error(source),
            });
        }
        if let Some(err) = &report.read_error {
            return Some(Failure::StreamRead(std::io::Error::new(err.kind(), err.to_string())));
        }
        if collected.deadline_expired {
            return Some(Failure::TimedOut(self.timeout.unwrap_or_default()));
        }
        if caller.is_cancelled() || report.cancelled || collected.is_failed() {
            return Some(Failure::Cancelled);
        }
        None
    }

    async fn complete(mut self, parts: Vec<CompletedPart>) -> Result<ObjectDescriptor, UploadError> {
        self.transition(SessionState::Completing)?;
        let part_count = parts.len();

        let completed = match self
            .store
            .complete_upload(&self.key, &self.upload_id, parts)
            .await
        {
            Ok(descriptor) => descriptor,
            Err(source) => {
                self.transition(SessionState::CompletionFailed)?;
                warn!(key = %self.key, upload_id = %self.upload_id, error = %source, "multipart completion failed");
                return Err(UploadError::Completion {
                    key: self.key,
                    upload_id: self.upload_id,
                    source,
                });
            }
        };

        let descriptor = match self.store.head(&self.key).await {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(key = %self.key, error = %err, "head after completion failed, using completion result");
                completed
            }
        };

        self.transition(SessionState::Completed)?;
        info!(
            key = %self.key,
            upload_id = %self.upload_id,
            parts = part_count,
            size = descriptor.size,
            etag = %descriptor.etag,
            "multipart upload completed"
        );
        Ok(descriptor)
    }

    /// Stores an empty or small input with one put and drops the unused
    /// multipart session.
    async fn finish_single(
        mut self,
        payload: Bytes,
        attrs: PutAttributes,
    ) -> Result<ObjectDescriptor, UploadError> {
        self.transition(SessionState::Completing)?;
        let size = payload.len();

        let descriptor = match self.store.put(&self.key, payload, &attrs).await {
            Ok(descriptor) => descriptor,
            Err(source) => return Err(self.abort(Failure::SinglePut(source)).await),
        };

        if let Err(err) = self.store.abort_upload(&self.key, &self.upload_id).await {
            warn!(key = %self.key, upload_id = %self.upload_id, error = %err, "failed to abort unused multipart session");
        }

        self.transition(SessionState::Completed)?;
        info!(key = %self.key, upload_id = %self.upload_id, size, "stored object with a single put");
        Ok(descriptor)
    }

    /// Best-effort cleanup. The abort outcome is attached to, never substituted
    /// for, the original failure.
    async fn abort(mut self, failure: Failure) -> UploadError {
        if let Err(err) = self.transition(SessionState::Aborting) {
            return err;
        }
        warn!(key = %self.key, upload_id = %self.upload_id, reason = ?failure, "aborting multipart upload");

        let abort = match self.store.abort_upload(&self.key, &self.upload_id).await {
            Ok(()) => {
                self.state = SessionState::Aborted;
                None
            }
            Err(err) => {
                warn!(
                    key = %self.key,
                    upload_id = %self.upload_id,
                    code = err.error_code(),
                    error = %err,
                    "failed to abort multipart upload, session may be orphaned"
                );
                self.state = SessionState::AbortFailed;
                Some(err)
            }
        };
        debug!(key = %self.key, upload_id = %self.upload_id, state = ?self.state, "upload session finished");

        failure.into_error(self.key, self.upload_id, abort)
    }
}

/// `StoreError` holds an `io::Error` and cannot derive `Clone`.
fn clone_store_error(err: &StoreError) -> StoreError {
    match err {
        StoreError::ObjectNotFound { key } => StoreError::ObjectNotFound { key: key.clone() },
        StoreError::AlreadyExists { key } => StoreError::AlreadyExists { key: key.clone() },
        StoreError::NoSuchUpload { key, upload_id } => StoreError::NoSuchUpload {
            key: key.clone(),
            upload_id: upload_id.clone(),
        },
        StoreError::InvalidObjectName(name) => StoreError::InvalidObjectName(name.clone()),
        StoreError::InvalidPart {
            part_number,
            reason,
        } => StoreError::InvalidPart {
            part_number: *part_number,
            reason: reason.clone(),
        },
        StoreError::InvalidArgument(msg) => StoreError::InvalidArgument(msg.clone()),
        StoreError::Unavailable(msg) => StoreError::Unavailable(msg.clone()),
        StoreError::InternalError(msg) => StoreError::InternalError(msg.clone()),
        StoreError::Io(err) => StoreError::Io(std::io::Error::new(err.kind(), err.to_string())),
    }
}
