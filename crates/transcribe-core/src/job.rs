use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a transcription job row.
///
/// A closed sum type: every transition is exhaustively matched rather than
/// compared against a string constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses are never processed again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Coarse progress label surfaced alongside `progress` for UI consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Queued,
    Downloading,
    Transcribing,
    Finalizing,
    Done,
    Failed,
}

/// A single timed transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// The central job record.
///
/// Invariants (enforced by the `JobRepository` implementations, not by this
/// struct's constructor, since the row is owned by the Store, not by any
/// in-memory component — see the crate-level docs):
///
/// 1. `status == Running` implies `locked_at` and `locked_by` are both set.
/// 2. Any other status implies both are `None`.
/// 3. `status == Done` implies every terminal result field is set and
///    `finished_at` is set.
/// 4. `attempt_count <= max_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub object_key: String,
    pub recipe_id: Option<Uuid>,
    pub status: JobStatus,
    pub priority: i32,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub stage: Stage,
    pub progress: f64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub estimated_duration_sec: Option<i64>,
    pub duration_sec: Option<i64>,
    pub transcript_text: Option<String>,
    pub segments: Option<Vec<TranscriptSegment>>,
    pub language: Option<String>,
    pub model_version: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

/// The result of a completed transcription attempt, handed to
/// `JobRepository::mark_done` by the worker once the engine returns.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOutcome {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    pub duration_sec: i64,
    pub model_version: String,
}

/// `(user_id, date)` row tracking minutes consumed toward the daily quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub user_id: Uuid,
    pub date: chrono::NaiveDate,
    pub minutes_used: i64,
    pub jobs_count: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Outcome of an atomic quota reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub minutes_remaining: i64,
    pub daily_limit: i64,
    pub reason: Option<String>,
}

/// `backoff(n) = 2^n minutes`, the exponential retry delay used both by
/// `mark_failed` and `release_stale_locks`.
pub fn backoff_minutes(attempt_count: i32) -> i64 {
    2i64.saturating_pow(attempt_count.max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_minutes(0), 1);
        assert_eq!(backoff_minutes(1), 2);
        assert_eq!(backoff_minutes(2), 4);
        assert_eq!(backoff_minutes(3), 8);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn can_retry_respects_attempt_budget() {
        let mut job = sample_job();
        job.attempt_count = 2;
        job.max_attempts = 3;
        assert!(job.can_retry());
        job.attempt_count = 3;
        assert!(!job.can_retry());
    }

    fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            object_key: "users/u1/media/a.mp3".to_string(),
            recipe_id: None,
            status: JobStatus::Queued,
            priority: 0,
            attempt_count: 0,
            max_attempts: 3,
            next_attempt_at: None,
            locked_at: None,
            locked_by: None,
            stage: Stage::Queued,
            progress: 0.0,
            last_heartbeat_at: None,
            estimated_duration_sec: None,
            duration_sec: None,
            transcript_text: None,
            segments: None,
            language: None,
            model_version: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}
