use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{ObjectStoreError, RepositoryError, TranscriptionError};
use crate::job::{DailyUsage, Job, QuotaCheck, Stage, TranscriptionOutcome};

/// Input to `JobRepository::enqueue`. Carried as a struct rather than a long
/// positional argument list once priority and the optional recipe hint
/// joined `estimated_duration_sec` as required fields.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub user_id: Uuid,
    pub object_key: String,
    pub recipe_id: Option<Uuid>,
    pub estimated_duration_sec: i64,
    pub priority: i32,
}

/// Partial update applied by `JobRepository::update_progress`. Only `Some`
/// fields are written; this is not a full row replace.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub stage: Option<Stage>,
    pub progress: Option<f64>,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

/// Unscoped queue-health counters, one entry per `JobStatus` variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// The durable job-queue contract (component E). Every method is a single
/// round trip to the Store and either fully succeeds or leaves state
/// unchanged — no method here partially applies an update.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn enqueue(&self, req: EnqueueRequest) -> Result<Job, RepositoryError>;

    /// Atomically selects and locks the single highest-priority eligible
    /// row (`priority` desc, `created_at` asc, ties by id) using a
    /// skip-locking read, or returns `None` if nothing is eligible. Never
    /// blocks on a row another worker currently holds.
    async fn lease_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>, RepositoryError>;

    /// Unconditional on the job id — last-writer-wins for terminal results,
    /// per the resolved open question in DESIGN.md. Idempotent: re-applying
    /// the same outcome does not change any observable field.
    async fn mark_done(&self, job_id: Uuid, outcome: TranscriptionOutcome) -> Result<(), RepositoryError>;

    /// `permanent = true`, or the retry budget already exhausted, moves the
    /// row to `Failed`; otherwise it is requeued with
    /// `next_attempt_at = now + backoff(attempt_count)`.
    async fn mark_failed(&self, job_id: Uuid, message: &str, permanent: bool) -> Result<(), RepositoryError>;

    async fn update_progress(&self, job_id: Uuid, update: ProgressUpdate) -> Result<(), RepositoryError>;

    /// `Queued -> Cancelled` only when owned by `user_id`; a no-op
    /// (`Ok(false)`) for any other status, including an already-cancelled
    /// row.
    async fn cancel(&self, job_id: Uuid, user_id: Uuid) -> Result<bool, RepositoryError>;

    /// Applies `mark_failed`'s policy to every `Running` row whose
    /// `locked_at` is older than `ttl_minutes`. Returns the count released.
    /// Idempotent across back-to-back calls: the second call always
    /// observes zero eligible rows left by the first.
    async fn release_stale_locks(&self, ttl_minutes: i64) -> Result<u64, RepositoryError>;

    async fn get_by_id(&self, job_id: Uuid, user_id: Option<Uuid>) -> Result<Option<Job>, RepositoryError>;

    async fn list_by_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Job>, RepositoryError>;

    async fn queue_stats(&self) -> Result<QueueStats, RepositoryError>;
}

/// The per-user minute-budget contract (component D).
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomic compare-and-increment. MUST never let two concurrent callers
    /// both push `minutes_used` past `daily_limit`. Implementations that
    /// cannot reach the Store MUST NOT propagate the error here — they
    /// degrade to an allowed `QuotaCheck` carrying a `reason`, trading
    /// over-grant on outage for availability (an explicit design decision,
    /// not an oversight).
    async fn reserve(&self, user_id: Uuid, minutes: i64, daily_limit: i64) -> Result<QuotaCheck, RepositoryError>;

    /// Adds `actual - estimated` to today's `minutes_used`. A zero delta is
    /// still a completed reconciliation, not a skippable no-op from the
    /// caller's perspective.
    async fn reconcile(&self, user_id: Uuid, estimated_minutes: i64, actual_minutes: i64) -> Result<(), RepositoryError>;

    async fn get_usage(&self, user_id: Uuid) -> Result<DailyUsage, RepositoryError>;

    /// Clamped at zero: an outage-allowed over-spend never reports a
    /// negative balance.
    async fn remaining_minutes(&self, user_id: Uuid, daily_limit: i64) -> Result<i64, RepositoryError> {
        let usage = self.get_usage(user_id).await?;
        Ok((daily_limit - usage.minutes_used).max(0))
    }
}

/// Size/type metadata about a stored object, used to estimate minutes when
/// the caller did not declare a duration up front.
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub content_length: u64,
    pub content_type: Option<String>,
}

/// The media object store contract (component B). Modelled only by the
/// download/metadata/presign surface the worker and submitter actually
/// depend on — the object store's own replication and lifecycle policy are
/// out of scope.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copies the object to `target_path`, creating parent directories.
    async fn download_to_path(&self, object_key: &str, target_path: &Path) -> Result<(), ObjectStoreError>;

    async fn object_exists(&self, object_key: &str) -> Result<bool, ObjectStoreError>;

    async fn object_metadata(&self, object_key: &str) -> Result<ObjectMetadata, ObjectStoreError>;

    async fn generate_signed_put_url(
        &self,
        object_key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<(String, DateTime<Utc>), ObjectStoreError>;

    async fn generate_signed_get_url(&self, object_key: &str, expires_in: Duration) -> Result<String, ObjectStoreError>;
}

/// One transcribed-segment progress tick, handed to the worker's callback
/// as the engine streams results. `total_duration_sec` is `None` until the
/// engine has determined it (typically after the first chunk).
#[derive(Debug, Clone, Copy)]
pub struct SegmentProgress {
    pub end_sec: f64,
    pub total_duration_sec: Option<f64>,
}

/// The transcription engine contract (component C): a pure function from a
/// local media path to a full result, streaming per-segment progress as it
/// goes. Implementations own whatever expensive model state they need;
/// loading it is this trait object's constructor's responsibility, not a
/// per-call cost.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(
        &self,
        media_path: &Path,
        language: &str,
        on_segment: &mut (dyn FnMut(SegmentProgress) + Send),
    ) -> Result<TranscriptionOutcome, TranscriptionError>;
}
