//! Error types for OMM
//!
//! Every failure surfaced by the metadata manager maps onto a stable
//! [`ResultCode`]. Callers branch on the code, never on the message.

use crate::types::NameError;
use derive_more::Display;
use thiserror::Error;

/// Common result type for OMM operations
pub type OmResult<T> = std::result::Result<T, OmError>;

/// How a caller should treat a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ErrorCategory {
    /// The request itself was wrong or conflicts with current state
    Client,
    /// Retrying later may succeed
    Transient,
    /// Storage or logic fault; the affected range is marked degraded
    Fatal,
}

/// Stable result enumeration reported to clients
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum ResultCode {
    #[display("INVALID_ARGUMENT")]
    InvalidArgument,
    #[display("VOLUME_NOT_FOUND")]
    VolumeNotFound,
    #[display("BUCKET_NOT_FOUND")]
    BucketNotFound,
    #[display("KEY_NOT_FOUND")]
    KeyNotFound,
    #[display("VOLUME_ALREADY_EXISTS")]
    VolumeAlreadyExists,
    #[display("BUCKET_ALREADY_EXISTS")]
    BucketAlreadyExists,
    #[display("KEY_ALREADY_EXISTS")]
    KeyAlreadyExists,
    #[display("VOLUME_NOT_EMPTY")]
    VolumeNotEmpty,
    #[display("BUCKET_NOT_EMPTY")]
    BucketNotEmpty,
    #[display("INVALID_PART")]
    InvalidPart,
    #[display("NO_SUCH_MULTIPART_UPLOAD")]
    NoSuchMultipartUpload,
    #[display("QUOTA_EXCEEDED")]
    QuotaExceeded,
    #[display("PERMISSION_DENIED")]
    PermissionDenied,
    #[display("TIMEOUT")]
    Timeout,
    #[display("CANCELLED")]
    Cancelled,
    #[display("BLOCK_ALLOCATION_FAILURE")]
    BlockAllocationFailure,
    #[display("KV_UNAVAILABLE")]
    KvUnavailable,
    #[display("KV_CORRUPT")]
    KvCorrupt,
    #[display("INTERNAL")]
    Internal,
}

impl ResultCode {
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::Timeout
            | Self::Cancelled
            | Self::BlockAllocationFailure
            | Self::KvUnavailable => ErrorCategory::Transient,
            Self::KvCorrupt | Self::Internal => ErrorCategory::Fatal,
            _ => ErrorCategory::Client,
        }
    }
}

/// Error type returned by every metadata operation
#[derive(Debug, Error)]
pub enum OmError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("volume not found: {0}")]
    VolumeNotFound(String),

    #[error("bucket not found: {volume}/{bucket}")]
    BucketNotFound { volume: String, bucket: String },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("volume already exists: {0}")]
    VolumeAlreadyExists(String),

    #[error("bucket already exists: {volume}/{bucket}")]
    BucketAlreadyExists { volume: String, bucket: String },

    #[error("key already exists: {0}")]
    KeyAlreadyExists(String),

    #[error("volume not empty: {0}")]
    VolumeNotEmpty(String),

    #[error("bucket not empty: {volume}/{bucket}")]
    BucketNotEmpty { volume: String, bucket: String },

    #[error("invalid part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },

    #[error("no such multipart upload: {upload_id}")]
    NoSuchUpload { upload_id: String },

    #[error("quota exceeded on volume {volume}: {requested} bytes requested, quota {quota}")]
    QuotaExceeded {
        volume: String,
        quota: u64,
        requested: u64,
    },

    #[error("permission denied: {user} on {resource}")]
    PermissionDenied { user: String, resource: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("block allocation failed: {0}")]
    BlockAllocation(String),

    #[error("kv store unavailable: {0}")]
    KvUnavailable(String),

    #[error("corrupt row {key}: {reason}")]
    KvCorrupt { key: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl OmError {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn bucket_not_found(volume: &str, bucket: &str) -> Self {
        Self::BucketNotFound {
            volume: volume.to_string(),
            bucket: bucket.to_string(),
        }
    }

    /// Stable code reported to clients
    #[must_use]
    pub const fn code(&self) -> ResultCode {
        match self {
            Self::InvalidArgument(_) | Self::InvalidName(_) => ResultCode::InvalidArgument,
            Self::VolumeNotFound(_) => ResultCode::VolumeNotFound,
            Self::BucketNotFound { .. } => ResultCode::BucketNotFound,
            Self::KeyNotFound(_) => ResultCode::KeyNotFound,
            Self::VolumeAlreadyExists(_) => ResultCode::VolumeAlreadyExists,
            Self::BucketAlreadyExists { .. } => ResultCode::BucketAlreadyExists,
            Self::KeyAlreadyExists(_) => ResultCode::KeyAlreadyExists,
            Self::VolumeNotEmpty(_) => ResultCode::VolumeNotEmpty,
            Self::BucketNotEmpty { .. } => ResultCode::BucketNotEmpty,
            Self::InvalidPart { .. } => ResultCode::InvalidPart,
            Self::NoSuchUpload { .. } => ResultCode::NoSuchMultipartUpload,
            Self::QuotaExceeded { .. } => ResultCode::QuotaExceeded,
            Self::PermissionDenied { .. } => ResultCode::PermissionDenied,
            Self::Timeout(_) => ResultCode::Timeout,
            Self::Cancelled => ResultCode::Cancelled,
            Self::BlockAllocation(_) => ResultCode::BlockAllocationFailure,
            Self::KvUnavailable(_) => ResultCode::KvUnavailable,
            Self::KvCorrupt { .. } => ResultCode::KvCorrupt,
            Self::Internal(_) => ResultCode::Internal,
        }
    }

    /// Check if retrying later may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.code().category(), ErrorCategory::Transient)
    }

    /// Check if this error marks the affected range as degraded
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.code().category(), ErrorCategory::Fatal)
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::VolumeNotFound(_)
                | Self::BucketNotFound { .. }
                | Self::KeyNotFound(_)
                | Self::NoSuchUpload { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NameKind;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            OmError::bucket_not_found("v", "b").code().to_string(),
            "BUCKET_NOT_FOUND"
        );
        assert_eq!(
            OmError::BlockAllocation("x".into()).code().to_string(),
            "BLOCK_ALLOCATION_FAILURE"
        );
        assert_eq!(ResultCode::KvCorrupt.to_string(), "KV_CORRUPT");
    }

    #[test]
    fn test_name_error_is_invalid_argument() {
        let err: OmError = NameError::Empty {
            kind: NameKind::Key,
        }
        .into();
        assert_eq!(err.code(), ResultCode::InvalidArgument);
    }

    #[test]
    fn test_error_categories() {
        assert!(OmError::Timeout("lock".into()).is_retryable());
        assert!(OmError::KvUnavailable("down".into()).is_retryable());
        assert!(!OmError::VolumeNotFound("v".into()).is_retryable());
        assert!(OmError::internal("bug").is_fatal());
        assert!(
            OmError::KvCorrupt {
                key: "/vol/a".into(),
                reason: "bad header".into()
            }
            .is_fatal()
        );
        assert!(!OmError::Cancelled.is_fatal());
    }

    #[test]
    fn test_error_not_found() {
        assert!(OmError::KeyNotFound("v/b/k".into()).is_not_found());
        assert!(
            OmError::NoSuchUpload {
                upload_id: "u".into()
            }
            .is_not_found()
        );
        assert!(!OmError::Cancelled.is_not_found());
    }
}
