use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use transcribe_core::{
    backoff_minutes, EnqueueRequest, Job, JobRepository, ProgressUpdate, QueueStats,
    RepositoryError, Stage, TranscriptionOutcome,
};
use uuid::Uuid;

use crate::row::{stage_str, JobRow};

/// PostgreSQL-backed job repository (component E).
///
/// Uses `FOR UPDATE SKIP LOCKED` (via the `lease_next` database function,
/// see `migrations/0002_functions.sql`) so that any number of workers can
/// poll concurrently without ever double-leasing a row or blocking on one
/// another.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_store_error(context: &str, err: sqlx::Error) -> RepositoryError {
        RepositoryError::StoreUnavailable(format!("{context}: {err}"))
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn enqueue(&self, req: EnqueueRequest) -> Result<Job, RepositoryError> {
        let id = Uuid::new_v4();

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (
                id, user_id, object_key, recipe_id, status, priority,
                attempt_count, max_attempts, stage, progress,
                estimated_duration_sec, created_at
            )
            VALUES (
                $1, $2, $3, $4, 'QUEUED', $5,
                0, 3, 'QUEUED', 0,
                $6, NOW()
            )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(req.user_id)
        .bind(&req.object_key)
        .bind(req.recipe_id)
        .bind(req.priority)
        .bind(req.estimated_duration_sec)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::map_store_error("enqueue", e))?;

        let job = Job::try_from(row)?;
        tracing::info!(job_id = %job.id, user_id = %job.user_id, object_key = %job.object_key, "job enqueued");
        Ok(job)
    }

    async fn lease_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM lease_next($1, $2)")
            .bind(worker_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::map_store_error("lease_next", e))?;

        match row {
            Some(row) => {
                let job = Job::try_from(row)?;
                tracing::info!(job_id = %job.id, worker_id, attempt = job.attempt_count, "job leased");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn mark_done(&self, job_id: Uuid, outcome: TranscriptionOutcome) -> Result<(), RepositoryError> {
        let segments_json = serde_json::to_value(&outcome.segments)
            .map_err(|e| RepositoryError::StoreUnavailable(format!("serialize segments: {e}")))?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'DONE',
                stage = 'DONE',
                progress = 100,
                finished_at = COALESCE(jobs.finished_at, NOW()),
                locked_at = NULL,
                locked_by = NULL,
                error_message = NULL,
                transcript_text = $2,
                segments_json = $3,
                language = $4,
                duration_sec = $5,
                model_version = $6
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(&outcome.text)
        .bind(segments_json)
        .bind(&outcome.language)
        .bind(outcome.duration_sec)
        .bind(&outcome.model_version)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_store_error("mark_done", e))?;

        tracing::info!(job_id = %job_id, duration_sec = outcome.duration_sec, "job marked done");
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, message: &str, permanent: bool) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Self::map_store_error("mark_failed/begin", e))?;

        let counts = sqlx::query("SELECT attempt_count, max_attempts FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Self::map_store_error("mark_failed/select", e))?;

        let Some(counts) = counts else {
            return Err(RepositoryError::NotFound(job_id));
        };

        let attempt_count: i32 = counts.get("attempt_count");
        let max_attempts: i32 = counts.get("max_attempts");
        let should_retry = !permanent && attempt_count < max_attempts;

        if should_retry {
            let retry_at = Utc::now() + chrono::Duration::minutes(backoff_minutes(attempt_count));

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'QUEUED',
                    stage = 'QUEUED',
                    progress = 0,
                    locked_at = NULL,
                    locked_by = NULL,
                    next_attempt_at = $2,
                    error_message = $3
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(retry_at)
            .bind(message)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::map_store_error("mark_failed/requeue", e))?;

            tracing::warn!(job_id = %job_id, attempt_count, max_attempts, next_attempt_at = %retry_at, "job failed, will retry");
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'FAILED',
                    stage = 'FAILED',
                    locked_at = NULL,
                    locked_by = NULL,
                    finished_at = NOW(),
                    error_message = $2
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(message)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::map_store_error("mark_failed/terminal", e))?;

            tracing::error!(job_id = %job_id, attempt_count, permanent, "job permanently failed");
        }

        tx.commit()
            .await
            .map_err(|e| Self::map_store_error("mark_failed/commit", e))?;

        Ok(())
    }

    async fn update_progress(&self, job_id: Uuid, update: ProgressUpdate) -> Result<(), RepositoryError> {
        if update.stage.is_none() && update.progress.is_none() && update.heartbeat_at.is_none() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET stage = COALESCE($2::job_stage, stage),
                progress = COALESCE($3, progress),
                last_heartbeat_at = COALESCE($4, last_heartbeat_at)
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(update.stage.map(stage_str))
        .bind(update.progress)
        .bind(update.heartbeat_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_store_error("update_progress", e))?;

        Ok(())
    }

    async fn cancel(&self, job_id: Uuid, user_id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'CANCELLED',
                finished_at = NOW()
            WHERE id = $1 AND user_id = $2 AND status = 'QUEUED'
            "#,
        )
        .bind(job_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_store_error("cancel", e))?;

        let cancelled = result.rows_affected() > 0;
        if cancelled {
            tracing::info!(job_id = %job_id, user_id = %user_id, "job cancelled");
        }
        Ok(cancelled)
    }

    async fn release_stale_locks(&self, ttl_minutes: i64) -> Result<u64, RepositoryError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(ttl_minutes);

        let stale_ids: Vec<Uuid> = sqlx::query("SELECT id FROM jobs WHERE status = 'RUNNING' AND locked_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::map_store_error("release_stale_locks/scan", e))?
            .into_iter()
            .map(|row| row.get("id"))
            .collect();

        let mut released = 0u64;
        for job_id in stale_ids {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| Self::map_store_error("release_stale_locks/begin", e))?;

            let counts = sqlx::query(
                "SELECT attempt_count, max_attempts FROM jobs WHERE id = $1 AND status = 'RUNNING' AND locked_at < $2 FOR UPDATE",
            )
            .bind(job_id)
            .bind(cutoff)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Self::map_store_error("release_stale_locks/select", e))?;

            // Another sweep (or the original worker finishing late) may have
            // already cleared this row between the scan and the lock.
            let Some(counts) = counts else {
                continue;
            };

            let attempt_count: i32 = counts.get("attempt_count");
            let max_attempts: i32 = counts.get("max_attempts");
            let should_retry = attempt_count < max_attempts;

            if should_retry {
                let retry_at = Utc::now() + chrono::Duration::minutes(backoff_minutes(attempt_count));
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'QUEUED',
                        stage = 'QUEUED',
                        progress = 0,
                        locked_at = NULL,
                        locked_by = NULL,
                        next_attempt_at = $2,
                        error_message = 'lock timed out'
                    WHERE id = $1
                    "#,
                )
                .bind(job_id)
                .bind(retry_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| Self::map_store_error("release_stale_locks/requeue", e))?;
            } else {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'FAILED',
                        stage = 'FAILED',
                        locked_at = NULL,
                        locked_by = NULL,
                        finished_at = NOW(),
                        error_message = 'lock timed out'
                    WHERE id = $1
                    "#,
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| Self::map_store_error("release_stale_locks/terminal", e))?;
            }

            tx.commit()
                .await
                .map_err(|e| Self::map_store_error("release_stale_locks/commit", e))?;

            released += 1;
        }

        if released > 0 {
            tracing::warn!(released, ttl_minutes, "released stale locks");
        }

        Ok(released)
    }

    async fn get_by_id(&self, job_id: Uuid, user_id: Option<Uuid>) -> Result<Option<Job>, RepositoryError> {
        let row = if let Some(user_id) = user_id {
            sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1 AND user_id = $2")
                .bind(job_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
        } else {
            sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
        }
        .map_err(|e| Self::map_store_error("get_by_id", e))?;

        row.map(Job::try_from).transpose()
    }

    async fn list_by_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::map_store_error("list_by_user", e))?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn queue_stats(&self) -> Result<QueueStats, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'QUEUED') AS queued,
                COUNT(*) FILTER (WHERE status = 'RUNNING') AS running,
                COUNT(*) FILTER (WHERE status = 'DONE') AS done,
                COUNT(*) FILTER (WHERE status = 'FAILED') AS failed,
                COUNT(*) FILTER (WHERE status = 'CANCELLED') AS cancelled
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::map_store_error("queue_stats", e))?;

        Ok(QueueStats {
            queued: row.get("queued"),
            running: row.get("running"),
            done: row.get("done"),
            failed: row.get("failed"),
            cancelled: row.get("cancelled"),
        })
    }
}
