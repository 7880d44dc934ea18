//! Submitter (component F): the only gate a new job passes through before it
//! is durable. Validates ownership of the target object key and the
//! declared duration/priority, reserves quota, then enqueues.
//!
//! Deliberately a plain library with no HTTP framework dependency — the
//! router that calls `Submitter::submit` is out of scope here.

use std::sync::Arc;

use transcribe_core::{EnqueueRequest, Job, JobRepository, QuotaStore, SubmitError};
use uuid::Uuid;

const MIN_DURATION_SEC: i64 = 1;
const MAX_DURATION_SEC: i64 = 7200;
const MIN_PRIORITY: i32 = 0;
const MAX_PRIORITY: i32 = 10;

/// A validated submission request, ready to reserve quota and enqueue.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub user_id: Uuid,
    pub object_key: String,
    pub recipe_id: Option<Uuid>,
    pub estimated_duration_sec: i64,
    pub priority: i32,
}

/// Wires the job repository and quota store together behind the single
/// `submit` entry point the out-of-scope HTTP layer calls into.
pub struct Submitter {
    jobs: Arc<dyn JobRepository>,
    quota: Arc<dyn QuotaStore>,
    daily_limit_minutes: i64,
}

impl Submitter {
    pub fn new(jobs: Arc<dyn JobRepository>, quota: Arc<dyn QuotaStore>, daily_limit_minutes: i64) -> Self {
        Self { jobs, quota, daily_limit_minutes }
    }

    /// Validates, reserves quota, and enqueues. Returns the created job on
    /// success. Quota is reserved before the row is created — a job never
    /// exists without minutes already set aside for it.
    pub async fn submit(&self, req: SubmitRequest) -> Result<Job, SubmitError> {
        if !req.object_key.starts_with(&format!("users/{}/", req.user_id)) {
            return Err(SubmitError::Forbidden);
        }

        if req.estimated_duration_sec < MIN_DURATION_SEC || req.estimated_duration_sec > MAX_DURATION_SEC {
            return Err(SubmitError::InvalidDuration(req.estimated_duration_sec));
        }

        if req.priority < MIN_PRIORITY || req.priority > MAX_PRIORITY {
            return Err(SubmitError::InvalidPriority(req.priority));
        }

        let minutes = (req.estimated_duration_sec / 60).max(1);

        let quota_check = self.quota.reserve(req.user_id, minutes, self.daily_limit_minutes).await?;
        if !quota_check.allowed {
            return Err(SubmitError::QuotaExceeded { minutes_remaining: quota_check.minutes_remaining });
        }

        let job = self
            .jobs
            .enqueue(EnqueueRequest {
                user_id: req.user_id,
                object_key: req.object_key,
                recipe_id: req.recipe_id,
                estimated_duration_sec: req.estimated_duration_sec,
                priority: req.priority,
            })
            .await?;

        tracing::info!(job_id = %job.id, user_id = %req.user_id, minutes, "job submitted");
        Ok(job)
    }
}
