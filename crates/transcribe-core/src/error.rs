use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by a `JobRepository` implementation.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Why an object-store download failed, classifying it for the worker's
/// retry decision.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {object_key}")]
    NotFound { object_key: String },

    #[error("timed out downloading {object_key} after {timeout_secs}s")]
    Timeout { object_key: String, timeout_secs: u64 },

    #[error("storage error for {object_key}: {reason}")]
    Other { object_key: String, reason: String },
}

impl ObjectStoreError {
    /// Download failures are retryable unless the object is simply absent,
    /// which will never resolve on its own.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ObjectStoreError::NotFound { .. })
    }
}

/// Errors surfaced by the Transcription Engine seam.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("media file not found or unreadable: {0}")]
    InvalidMedia(String),

    #[error("transcription failed (retryable): {0}")]
    Retryable(String),

    #[error("transcription failed (not retryable): {0}")]
    Permanent(String),
}

impl TranscriptionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TranscriptionError::Retryable(_))
    }
}

/// Why an object key failed validation. Always a permanent job failure.
#[derive(Debug, Error)]
pub enum ObjectKeyError {
    #[error("object key cannot be empty")]
    Empty,

    #[error("object key has no filename component: {0}")]
    NoFilename(String),

    #[error("object key filename cannot start with '.': {0}")]
    DotFile(String),

    #[error("object key cannot contain path traversal ('..'): {0}")]
    PathTraversal(String),

    #[error("object key must begin with the owner's prefix users/{expected_user}/: {object_key}")]
    WrongPrefix { object_key: String, expected_user: Uuid },
}

/// The complete set of classified failures a worker can encounter while
/// driving one job through the pipeline. Every caught error funnels into
/// exactly one variant here before being dispatched to `mark_failed`.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("invalid object key: {0}")]
    InvalidObjectKey(#[from] ObjectKeyError),

    #[error(transparent)]
    InvalidMedia(#[from] TranscriptionErrorWrapper),

    #[error("download failed: {0}")]
    Download(#[from] ObjectStoreError),

    #[error("store unavailable: {0}")]
    Repository(#[from] RepositoryError),
}

/// Newtype so `TranscriptionError` (which is not permanent-vs-retryable at
/// the type level for its `InvalidMedia` variant) can participate in the
/// `#[from]` conversion above while still being classified explicitly.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct TranscriptionErrorWrapper(#[from] pub TranscriptionError);

impl JobFailure {
    /// Classifies this failure per the disposition table in the design
    /// document: permanent failures exhaust the job immediately regardless
    /// of remaining retry budget; retryable failures still consume budget
    /// through the normal `mark_failed` retry-count check.
    pub fn kind(&self) -> FailureDisposition {
        match self {
            JobFailure::InvalidObjectKey(_) => FailureDisposition::Permanent,
            JobFailure::InvalidMedia(TranscriptionErrorWrapper(inner)) => match inner {
                TranscriptionError::InvalidMedia(_) => FailureDisposition::Permanent,
                TranscriptionError::Permanent(_) => FailureDisposition::Permanent,
                TranscriptionError::Retryable(_) => FailureDisposition::Retryable,
            },
            JobFailure::Download(e) if e.is_retryable() => FailureDisposition::Retryable,
            JobFailure::Download(_) => FailureDisposition::Permanent,
            JobFailure::Repository(_) => FailureDisposition::Retryable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Permanent,
    Retryable,
}

/// Errors surfaced by the Submitter (F) contracts.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("object_key does not belong to the authenticated user")]
    Forbidden,

    #[error("estimated_duration_sec out of range [1, 7200]: {0}")]
    InvalidDuration(i64),

    #[error("priority out of range [0, 10]: {0}")]
    InvalidPriority(i32),

    #[error("daily quota exceeded, {minutes_remaining} minutes remaining")]
    QuotaExceeded { minutes_remaining: i64 },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_store_not_found_is_not_retryable() {
        let err = ObjectStoreError::NotFound { object_key: "x".into() };
        assert!(!err.is_retryable());
    }

    #[test]
    fn object_store_timeout_is_retryable() {
        let err = ObjectStoreError::Timeout { object_key: "x".into(), timeout_secs: 30 };
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_object_key_is_permanent() {
        let failure = JobFailure::InvalidObjectKey(ObjectKeyError::Empty);
        assert_eq!(failure.kind(), FailureDisposition::Permanent);
    }

    #[test]
    fn retryable_engine_error_stays_retryable() {
        let failure = JobFailure::InvalidMedia(TranscriptionErrorWrapper(
            TranscriptionError::Retryable("timeout".into()),
        ));
        assert_eq!(failure.kind(), FailureDisposition::Retryable);
    }

    #[test]
    fn permanent_engine_error_is_permanent() {
        let failure = JobFailure::InvalidMedia(TranscriptionErrorWrapper(
            TranscriptionError::Permanent("unsupported codec".into()),
        ));
        assert_eq!(failure.kind(), FailureDisposition::Permanent);
    }

    #[test]
    fn download_timeout_is_retryable_failure() {
        let failure = JobFailure::Download(ObjectStoreError::Timeout {
            object_key: "x".into(),
            timeout_secs: 30,
        });
        assert_eq!(failure.kind(), FailureDisposition::Retryable);
    }

    #[test]
    fn download_not_found_is_permanent_failure() {
        let failure = JobFailure::Download(ObjectStoreError::NotFound { object_key: "x".into() });
        assert_eq!(failure.kind(), FailureDisposition::Permanent);
    }
}
