use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    ObjectNotFound { key: String },
    #[error("object already exists: {key}")]
    AlreadyExists { key: String },
    #[error("no such upload: {key} (upload {upload_id})")]
    NoSuchUpload { key: String, upload_id: String },
    #[error("invalid object name: {0}")]
    InvalidObjectName(String),
    #[error("invalid part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ObjectNotFound { .. } => "NoSuchKey",
            Self::AlreadyExists { .. } => "PreconditionFailed",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::InvalidObjectName(_) => "InvalidObjectName",
            Self::InvalidPart { .. } => "InvalidPart",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Unavailable(_) => "ServiceUnavailable",
            Self::InternalError(_) | Self::Io(_) => "InternalError",
        }
    }

    /// Transient failures the store may succeed on if the whole call is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::StoreError;

    #[test]
    fn codes_follow_s3_naming() {
        let err = StoreError::NoSuchUpload {
            key: "a/b".to_string(),
            upload_id: "u1".to_string(),
        };
        assert_eq!(err.error_code(), "NoSuchUpload");
        assert!(err.to_string().contains("u1"));

        let io = StoreError::from(std::io::Error::other("disk gone"));
        assert_eq!(io.error_code(), "InternalError");
        assert!(io.is_transient());
        assert!(!StoreError::InvalidArgument("x".to_string()).is_transient());

        let conflict = StoreError::AlreadyExists {
            key: "a".to_string(),
        };
        assert_eq!(conflict.error_code(), "PreconditionFailed");
        assert!(!conflict.is_transient());
    }
}
