use std::time::Duration;

use strata_common::error::StoreError;
use thiserror::Error;

use crate::state::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    CreateFailure,
    StreamReadFailure,
    PartUploadFailure,
    CompletionFailure,
    CancellationFailure,
    Internal,
}

/// The single failure surfaced by an upload call.
///
/// Variants raised after the remote session exists carry its upload id.
/// Variants that triggered cleanup carry the abort failure, if any, in
/// `abort`; it never replaces the original cause.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to create multipart upload for {key}: {source}")]
    Create {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to read source for {key} (upload {upload_id}): {source}{}", abort_note(.abort))]
    StreamRead {
        key: String,
        upload_id: String,
        #[source]
        source: std::io::Error,
        abort: Option<StoreError>,
    },
    #[error("part {part_number} of {key} failed (upload {upload_id}): {source}{}", abort_note(.abort))]
    PartUpload {
        key: String,
        upload_id: String,
        part_number: u32,
        #[source]
        source: StoreError,
        abort: Option<StoreError>,
    },
    #[error("upload of {key} was cancelled (upload {upload_id}){}", abort_note(.abort))]
    Cancelled {
        key: String,
        upload_id: String,
        abort: Option<StoreError>,
    },
    #[error("upload of {key} timed out after {timeout:?} (upload {upload_id}){}", abort_note(.abort))]
    TimedOut {
        key: String,
        upload_id: String,
        timeout: Duration,
        abort: Option<StoreError>,
    },
    #[error("collected {collected} of {expected} parts for {key} (upload {upload_id}){}", abort_note(.abort))]
    IncompleteParts {
        key: String,
        upload_id: String,
        expected: u32,
        collected: usize,
        abort: Option<StoreError>,
    },
    #[error("failed to complete multipart upload {upload_id} for {key}: {source}")]
    Completion {
        key: String,
        upload_id: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to store {key} with a single put (upload {upload_id}): {source}{}", abort_note(.abort))]
    SinglePut {
        key: String,
        upload_id: String,
        #[source]
        source: StoreError,
        abort: Option<StoreError>,
    },
    #[error("upload session for {key} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        key: String,
        from: SessionState,
        to: SessionState,
    },
}

fn abort_note(abort: &Option<StoreError>) -> String {
    match abort {
        Some(err) => format!("; abort also failed: {err}"),
        None => String::new(),
    }
}

impl UploadError {
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            Self::Create { .. } => UploadErrorKind::CreateFailure,
            Self::StreamRead { .. } => UploadErrorKind::StreamReadFailure,
            Self::PartUpload { .. } => UploadErrorKind::PartUploadFailure,
            Self::Cancelled { .. } | Self::TimedOut { .. } => UploadErrorKind::CancellationFailure,
            Self::Completion { .. } | Self::SinglePut { .. } => UploadErrorKind::CompletionFailure,
            Self::IncompleteParts { .. } | Self::InvalidTransition { .. } => UploadErrorKind::Internal,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Create { key, .. }
            | Self::StreamRead { key, .. }
            | Self::PartUpload { key, .. }
            | Self::Cancelled { key, .. }
            | Self::TimedOut { key, .. }
            | Self::IncompleteParts { key, .. }
            | Self::Completion { key, .. }
            | Self::SinglePut { key, .. }
            | Self::InvalidTransition { key, .. } => key,
        }
    }

    pub fn upload_id(&self) -> Option<&str> {
        match self {
            Self::StreamRead { upload_id, .. }
            | Self::PartUpload { upload_id, .. }
            | Self::Cancelled { upload_id, .. }
            | Self::TimedOut { upload_id, .. }
            | Self::IncompleteParts { upload_id, .. }
            | Self::Completion { upload_id, .. }
            | Self::SinglePut { upload_id, .. } => Some(upload_id),
            Self::Create { .. } | Self::InvalidTransition { .. } => None,
        }
    }

    pub fn part_number(&self) -> Option<u32> {
        match self {
            Self::PartUpload { part_number, .. } => Some(*part_number),
            _ => None,
        }
    }

    /// Secondary failure of the cleanup abort, if cleanup ran and failed.
    pub fn abort_error(&self) -> Option<&StoreError> {
        match self {
            Self::StreamRead { abort, .. }
            | Self::PartUpload { abort, .. }
            | Self::Cancelled { abort, .. }
            | Self::TimedOut { abort, .. }
            | Self::IncompleteParts { abort, .. }
            | Self::SinglePut { abort, .. } => abort.as_ref(),
            _ => None,
        }
    }

    /// Whether repeating the whole upload call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Create { source, .. }
            | Self::PartUpload { source, .. }
            | Self::Completion { source, .. }
            | Self::SinglePut { source, .. } => source.is_transient(),
            Self::TimedOut { .. } => true,
            _ => false,
        }
    }
}
