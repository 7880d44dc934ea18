use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use transcribe_core::{
    backoff_minutes, EnqueueRequest, Job, JobRepository, JobStatus, ProgressUpdate, QueueStats, RepositoryError, Stage,
    TranscriptionOutcome,
};
use uuid::Uuid;

/// In-memory stand-in for `PgJobRepository`, used by tests across the
/// workspace that need a `JobRepository` without a live Postgres instance.
/// Mirrors the same transition rules (last-writer-wins `mark_done`,
/// retry-budget-gated `mark_failed`, skip-lock-equivalent `lease_next`
/// ordering) so a test written against this fake is exercising the same
/// contract a real Postgres-backed test would.
pub struct FakeJobRepository {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl FakeJobRepository {
    pub fn new() -> Self {
        Self { jobs: Mutex::new(HashMap::new()) }
    }

    /// Test-only accessor for asserting directly on a row's state.
    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&job_id).cloned()
    }

    fn requeue_or_fail(job: &mut Job, now: DateTime<Utc>, message: &str, permanent: bool) {
        let should_retry = !permanent && job.attempt_count < job.max_attempts;
        job.locked_at = None;
        job.locked_by = None;
        job.error_message = Some(message.to_string());

        if should_retry {
            job.status = JobStatus::Queued;
            job.stage = Stage::Queued;
            job.next_attempt_at = Some(now + chrono::Duration::minutes(backoff_minutes(job.attempt_count)));
        } else {
            job.status = JobStatus::Failed;
            job.stage = Stage::Failed;
            job.finished_at = Some(now);
        }
    }
}

impl Default for FakeJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRepository for FakeJobRepository {
    async fn enqueue(&self, req: EnqueueRequest) -> Result<Job, RepositoryError> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            object_key: req.object_key,
            recipe_id: req.recipe_id,
            status: JobStatus::Queued,
            priority: req.priority,
            attempt_count: 0,
            max_attempts: 3,
            next_attempt_at: None,
            locked_at: None,
            locked_by: None,
            stage: Stage::Queued,
            progress: 0.0,
            last_heartbeat_at: None,
            estimated_duration_sec: Some(req.estimated_duration_sec),
            duration_sec: None,
            transcript_text: None,
            segments: None,
            language: None,
            model_version: None,
            error_message: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        };

        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn lease_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>, RepositoryError> {
        let mut jobs = self.jobs.lock().unwrap();

        let eligible_id = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && j.next_attempt_at.map(|t| t <= now).unwrap_or(true))
            .min_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)).then(a.id.cmp(&b.id)))
            .map(|j| j.id);

        let Some(id) = eligible_id else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).unwrap();
        job.status = JobStatus::Running;
        job.stage = Stage::Downloading;
        job.attempt_count += 1;
        job.locked_at = Some(now);
        job.locked_by = Some(worker_id.to_string());
        job.last_heartbeat_at = Some(now);
        job.started_at.get_or_insert(now);

        Ok(Some(job.clone()))
    }

    async fn mark_done(&self, job_id: Uuid, outcome: TranscriptionOutcome) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(RepositoryError::NotFound(job_id))?;

        job.status = JobStatus::Done;
        job.stage = Stage::Done;
        job.progress = 100.0;
        job.locked_at = None;
        job.locked_by = None;
        job.error_message = None;
        job.transcript_text = Some(outcome.text);
        job.segments = Some(outcome.segments);
        job.language = Some(outcome.language);
        job.duration_sec = Some(outcome.duration_sec);
        job.model_version = Some(outcome.model_version);
        job.finished_at.get_or_insert(Utc::now());

        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, message: &str, permanent: bool) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(RepositoryError::NotFound(job_id))?;
        Self::requeue_or_fail(job, Utc::now(), message, permanent);
        Ok(())
    }

    async fn update_progress(&self, job_id: Uuid, update: ProgressUpdate) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(RepositoryError::NotFound(job_id))?;

        if let Some(stage) = update.stage {
            job.stage = stage;
        }
        if let Some(progress) = update.progress {
            job.progress = progress;
        }
        if let Some(heartbeat_at) = update.heartbeat_at {
            job.last_heartbeat_at = Some(heartbeat_at);
        }

        Ok(())
    }

    async fn cancel(&self, job_id: Uuid, user_id: Uuid) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };

        if job.user_id != user_id || job.status != JobStatus::Queued {
            return Ok(false);
        }

        job.status = JobStatus::Cancelled;
        job.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn release_stale_locks(&self, ttl_minutes: i64) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::minutes(ttl_minutes);
        let mut jobs = self.jobs.lock().unwrap();
        let mut released = 0u64;

        for job in jobs.values_mut() {
            if job.status == JobStatus::Running && job.locked_at.map(|t| t < cutoff).unwrap_or(false) {
                Self::requeue_or_fail(job, now, "lock timed out", false);
                released += 1;
            }
        }

        Ok(released)
    }

    async fn get_by_id(&self, job_id: Uuid, user_id: Option<Uuid>) -> Result<Option<Job>, RepositoryError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.get(&job_id).filter(|j| user_id.map(|u| u == j.user_id).unwrap_or(true)).cloned())
    }

    async fn list_by_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.user_id == user_id).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn queue_stats(&self) -> Result<QueueStats, RepositoryError> {
        let jobs = self.jobs.lock().unwrap();
        let mut stats = QueueStats::default();

        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Done => stats.done += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }

        Ok(stats)
    }
}
