//! Integration tests against a real Postgres instance, run via `sqlx::test`
//! (each test gets its own throwaway database with migrations applied).

use chrono::Utc;
use sqlx::PgPool;
use transcribe_core::{EnqueueRequest, JobRepository, JobStatus, QuotaStore, Stage, TranscriptSegment, TranscriptionOutcome};
use uuid::Uuid;

use crate::{PgJobRepository, PgQuotaStore};

fn sample_request(user_id: Uuid) -> EnqueueRequest {
    EnqueueRequest {
        user_id,
        object_key: format!("users/{user_id}/media/a.mp3"),
        recipe_id: None,
        estimated_duration_sec: 300,
        priority: 0,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn enqueue_creates_queued_row(pool: PgPool) {
    let repo = PgJobRepository::new(pool);
    let user_id = Uuid::new_v4();

    let job = repo.enqueue(sample_request(user_id)).await.unwrap();

    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.stage, Stage::Queued);
    assert_eq!(job.attempt_count, 0);
    assert_eq!(job.max_attempts, 3);
    assert_eq!(job.progress, 0.0);
}

#[sqlx::test(migrations = "./migrations")]
async fn lease_next_locks_exactly_one_row_and_increments_attempt(pool: PgPool) {
    let repo = PgJobRepository::new(pool);
    let user_id = Uuid::new_v4();
    let job = repo.enqueue(sample_request(user_id)).await.unwrap();

    let leased = repo.lease_next("worker-1", Utc::now()).await.unwrap().unwrap();

    assert_eq!(leased.id, job.id);
    assert_eq!(leased.status, JobStatus::Running);
    assert_eq!(leased.stage, Stage::Downloading);
    assert_eq!(leased.attempt_count, 1);
    assert_eq!(leased.locked_by.as_deref(), Some("worker-1"));
    assert!(leased.locked_at.is_some());

    // Nothing left to lease.
    let none = repo.lease_next("worker-2", Utc::now()).await.unwrap();
    assert!(none.is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn lease_next_orders_by_priority_then_age(pool: PgPool) {
    let repo = PgJobRepository::new(pool);
    let user_id = Uuid::new_v4();

    let mut low = sample_request(user_id);
    low.priority = 0;
    let low_job = repo.enqueue(low).await.unwrap();

    let mut high = sample_request(user_id);
    high.priority = 5;
    let high_job = repo.enqueue(high).await.unwrap();

    let first = repo.lease_next("w", Utc::now()).await.unwrap().unwrap();
    assert_eq!(first.id, high_job.id);

    let second = repo.lease_next("w", Utc::now()).await.unwrap().unwrap();
    assert_eq!(second.id, low_job.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn mark_done_sets_terminal_fields_and_is_idempotent(pool: PgPool) {
    let repo = PgJobRepository::new(pool);
    let user_id = Uuid::new_v4();
    let job = repo.enqueue(sample_request(user_id)).await.unwrap();
    repo.lease_next("w", Utc::now()).await.unwrap();

    let outcome = TranscriptionOutcome {
        text: "hello world".to_string(),
        segments: vec![TranscriptSegment { start: 0.0, end: 1.0, text: "hello".into() }],
        language: "en".to_string(),
        duration_sec: 248,
        model_version: "whisper-medium".to_string(),
    };

    repo.mark_done(job.id, outcome.clone()).await.unwrap();

    let after = repo.get_by_id(job.id, None).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Done);
    assert_eq!(after.stage, Stage::Done);
    assert_eq!(after.progress, 100.0);
    assert!(after.locked_at.is_none());
    assert!(after.locked_by.is_none());
    assert_eq!(after.transcript_text.as_deref(), Some("hello world"));
    assert_eq!(after.duration_sec, Some(248));
    assert!(after.finished_at.is_some());

    // Re-applying the same outcome does not change observable fields,
    // including `finished_at`: a later `mark_done` must not push the
    // completion timestamp forward.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    repo.mark_done(job.id, outcome).await.unwrap();
    let again = repo.get_by_id(job.id, None).await.unwrap().unwrap();
    assert_eq!(again.transcript_text, after.transcript_text);
    assert_eq!(again.duration_sec, after.duration_sec);
    assert_eq!(again.status, JobStatus::Done);
    assert_eq!(again.finished_at, after.finished_at);
}

#[sqlx::test(migrations = "./migrations")]
async fn mark_failed_requeues_with_backoff_until_attempts_exhausted(pool: PgPool) {
    let repo = PgJobRepository::new(pool);
    let user_id = Uuid::new_v4();
    let job = repo.enqueue(sample_request(user_id)).await.unwrap();

    for expected_attempt in 1..=3 {
        repo.lease_next("w", Utc::now()).await.unwrap();
        let before = repo.get_by_id(job.id, None).await.unwrap().unwrap();
        assert_eq!(before.attempt_count, expected_attempt);

        repo.mark_failed(job.id, "boom", false).await.unwrap();

        let after = repo.get_by_id(job.id, None).await.unwrap().unwrap();
        if expected_attempt < 3 {
            assert_eq!(after.status, JobStatus::Queued);
            assert!(after.next_attempt_at.is_some());
        } else {
            assert_eq!(after.status, JobStatus::Failed);
            assert!(after.finished_at.is_some());
        }
        assert_eq!(after.error_message.as_deref(), Some("boom"));
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn mark_failed_permanent_skips_retry_budget(pool: PgPool) {
    let repo = PgJobRepository::new(pool);
    let user_id = Uuid::new_v4();
    let job = repo.enqueue(sample_request(user_id)).await.unwrap();
    repo.lease_next("w", Utc::now()).await.unwrap();

    repo.mark_failed(job.id, "invalid object key", true).await.unwrap();

    let after = repo.get_by_id(job.id, None).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Failed);
    assert_eq!(after.attempt_count, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn cancel_only_transitions_queued_rows(pool: PgPool) {
    let repo = PgJobRepository::new(pool);
    let user_id = Uuid::new_v4();
    let other_user = Uuid::new_v4();
    let job = repo.enqueue(sample_request(user_id)).await.unwrap();

    // Wrong owner: no-op.
    assert!(!repo.cancel(job.id, other_user).await.unwrap());

    assert!(repo.cancel(job.id, user_id).await.unwrap());
    let after = repo.get_by_id(job.id, None).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);

    // Second cancel on an already-cancelled row is a no-op.
    assert!(!repo.cancel(job.id, user_id).await.unwrap());

    // Once running, cancel no longer applies.
    let job2 = repo.enqueue(sample_request(user_id)).await.unwrap();
    repo.lease_next("w", Utc::now()).await.unwrap();
    assert!(!repo.cancel(job2.id, user_id).await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
async fn release_stale_locks_is_idempotent(pool: PgPool) {
    let repo = PgJobRepository::new(pool);
    let user_id = Uuid::new_v4();
    let job = repo.enqueue(sample_request(user_id)).await.unwrap();
    repo.lease_next("worker-1", Utc::now() - chrono::Duration::minutes(60)).await.unwrap();

    let released_first = repo.release_stale_locks(30).await.unwrap();
    assert_eq!(released_first, 1);

    let after = repo.get_by_id(job.id, None).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Queued);
    assert!(after.locked_at.is_none());

    let released_second = repo.release_stale_locks(30).await.unwrap();
    assert_eq!(released_second, 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn release_stale_locks_fails_job_once_attempts_exhausted(pool: PgPool) {
    let repo = PgJobRepository::new(pool);
    let user_id = Uuid::new_v4();
    let job = repo.enqueue(sample_request(user_id)).await.unwrap();

    for _ in 0..3 {
        repo.lease_next("w", Utc::now() - chrono::Duration::minutes(60)).await.unwrap();
        repo.release_stale_locks(30).await.unwrap();
    }

    let after = repo.get_by_id(job.id, None).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Failed);
}

#[sqlx::test(migrations = "./migrations")]
async fn quota_reserve_never_exceeds_limit_under_concurrent_calls(pool: PgPool) {
    let quota = PgQuotaStore::new(pool);
    let user_id = Uuid::new_v4();

    let first = quota.reserve(user_id, 58, 60).await.unwrap();
    assert!(first.allowed);

    let second = quota.reserve(user_id, 3, 60).await.unwrap();
    assert!(!second.allowed);

    let usage = quota.get_usage(user_id).await.unwrap();
    assert_eq!(usage.minutes_used, 58);
}

#[sqlx::test(migrations = "./migrations")]
async fn quota_reconcile_adjusts_usage_by_delta(pool: PgPool) {
    let quota = PgQuotaStore::new(pool);
    let user_id = Uuid::new_v4();

    quota.reserve(user_id, 5, 60).await.unwrap();
    quota.reconcile(user_id, 5, 3).await.unwrap();

    let usage = quota.get_usage(user_id).await.unwrap();
    assert_eq!(usage.minutes_used, 3);
}
