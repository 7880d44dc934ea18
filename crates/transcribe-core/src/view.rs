use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{Job, JobStatus, Stage, TranscriptSegment};

/// Read model returned by the job query endpoint (out of scope here, but
/// this is the shape it serialises): everything needed to show progress,
/// plus the terminal result fields only once `status = Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    pub status: JobStatus,
    pub stage: Stage,
    pub progress: f64,
    pub attempt_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<JobResultView>,
}

/// Terminal result fields, present only when `status = Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultView {
    pub transcript_text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    pub duration_sec: i64,
    pub model_version: String,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        let result = (job.status == JobStatus::Done)
            .then(|| {
                Some(JobResultView {
                    transcript_text: job.transcript_text.clone()?,
                    segments: job.segments.clone()?,
                    language: job.language.clone()?,
                    duration_sec: job.duration_sec?,
                    model_version: job.model_version.clone()?,
                })
            })
            .flatten();

        Self {
            id: job.id,
            status: job.status,
            stage: job.stage,
            progress: job.progress,
            attempt_count: job.attempt_count,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            result,
        }
    }
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        JobView::from(&job)
    }
}
