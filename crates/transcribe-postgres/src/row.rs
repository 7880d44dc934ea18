use chrono::{DateTime, Utc};
use sqlx::FromRow;
use transcribe_core::{Job, JobStatus, RepositoryError, Stage, TranscriptSegment};
use uuid::Uuid;

/// Mirrors the `job_status` Postgres enum so `sqlx` can decode the column
/// natively (via its own `Type`/`Decode` impls) rather than failing the
/// "Rust type String is not compatible with SQL type job_status" check that
/// a plain `String` field would hit on `SELECT status FROM jobs`.
#[derive(Debug, Clone, Copy, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "UPPERCASE")]
enum RawStatus {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl From<RawStatus> for JobStatus {
    fn from(raw: RawStatus) -> Self {
        match raw {
            RawStatus::Queued => JobStatus::Queued,
            RawStatus::Running => JobStatus::Running,
            RawStatus::Done => JobStatus::Done,
            RawStatus::Failed => JobStatus::Failed,
            RawStatus::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// Mirrors the `job_stage` Postgres enum; see [`RawStatus`].
#[derive(Debug, Clone, Copy, sqlx::Type)]
#[sqlx(type_name = "job_stage", rename_all = "UPPERCASE")]
enum RawStage {
    Queued,
    Downloading,
    Transcribing,
    Finalizing,
    Done,
    Failed,
}

impl From<RawStage> for Stage {
    fn from(raw: RawStage) -> Self {
        match raw {
            RawStage::Queued => Stage::Queued,
            RawStage::Downloading => Stage::Downloading,
            RawStage::Transcribing => Stage::Transcribing,
            RawStage::Finalizing => Stage::Finalizing,
            RawStage::Done => Stage::Done,
            RawStage::Failed => Stage::Failed,
        }
    }
}

/// 1:1 mapping of the `jobs` table, decoded via `sqlx::FromRow`. Kept
/// separate from `transcribe_core::Job` because the column-level enum
/// wrappers (`RawStatus`/`RawStage`) exist only to satisfy `sqlx`'s type
/// checker; the domain type carries the real `JobStatus`/`Stage`.
#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub object_key: String,
    pub recipe_id: Option<Uuid>,
    status: RawStatus,
    pub priority: i32,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    stage: RawStage,
    pub progress: f64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub estimated_duration_sec: Option<i64>,
    pub duration_sec: Option<i64>,
    pub transcript_text: Option<String>,
    pub segments_json: Option<serde_json::Value>,
    pub language: Option<String>,
    pub model_version: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = RepositoryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let segments = match row.segments_json {
            Some(value) => Some(
                serde_json::from_value::<Vec<TranscriptSegment>>(value).map_err(|e| {
                    RepositoryError::StoreUnavailable(format!("malformed segments_json: {e}"))
                })?,
            ),
            None => None,
        };

        Ok(Job {
            id: row.id,
            user_id: row.user_id,
            object_key: row.object_key,
            recipe_id: row.recipe_id,
            status: row.status.into(),
            priority: row.priority,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            next_attempt_at: row.next_attempt_at,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
            stage: row.stage.into(),
            progress: row.progress,
            last_heartbeat_at: row.last_heartbeat_at,
            estimated_duration_sec: row.estimated_duration_sec,
            duration_sec: row.duration_sec,
            transcript_text: row.transcript_text,
            segments,
            language: row.language,
            model_version: row.model_version,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

pub(crate) fn stage_str(stage: Stage) -> &'static str {
    match stage {
        Stage::Queued => "QUEUED",
        Stage::Downloading => "DOWNLOADING",
        Stage::Transcribing => "TRANSCRIBING",
        Stage::Finalizing => "FINALIZING",
        Stage::Done => "DONE",
        Stage::Failed => "FAILED",
    }
}
