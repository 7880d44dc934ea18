//! # transcribe-core
//!
//! Domain model and trait seams for the transcription job queue.
//!
//! This crate has no IO and no async runtime dependency beyond the trait
//! signatures themselves: it defines what a `Job` is, what can go wrong, and
//! the four boundaries an implementation must satisfy —
//! [`JobRepository`] (component E), [`QuotaStore`] (component D),
//! [`ObjectStore`] (component B) and [`TranscriptionEngine`] (component C).
//!
//! Concrete Postgres-backed implementations of `JobRepository` and
//! `QuotaStore` live in `transcribe-postgres`; an S3-compatible
//! `ObjectStore` lives in `transcribe-object-store`; in-memory fakes of all
//! four live in `transcribe-testing`.

mod error;
mod job;
mod traits;
mod view;

pub use error::{
    FailureDisposition, JobFailure, ObjectKeyError, ObjectStoreError, RepositoryError,
    SubmitError, TranscriptionError, TranscriptionErrorWrapper,
};
pub use job::{
    backoff_minutes, DailyUsage, Job, JobStatus, QuotaCheck, Stage, TranscriptSegment,
    TranscriptionOutcome,
};
pub use traits::{
    EnqueueRequest, JobRepository, ObjectMetadata, ObjectStore, ProgressUpdate, QueueStats,
    QuotaStore, SegmentProgress, TranscriptionEngine,
};
pub use view::{JobResultView, JobView};

pub use async_trait::async_trait;
