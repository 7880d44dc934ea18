use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use transcribe_core::{
    Job, JobFailure, JobRepository, ObjectKeyError, ObjectStore, ProgressUpdate, QuotaStore, SegmentProgress, Stage,
    TranscriptionEngine, TranscriptionErrorWrapper,
};
use uuid::Uuid;

const DEFAULT_ESTIMATED_MINUTES: i64 = 5;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Drives one leased job through download → transcribe → persist →
/// reconcile. Owns no state of its own beyond its collaborators; every
/// call is self-contained so the worker loop can hand it one job at a time.
pub struct JobPipeline {
    jobs: Arc<dyn JobRepository>,
    quota: Arc<dyn QuotaStore>,
    store: Arc<dyn ObjectStore>,
    engine: Arc<dyn TranscriptionEngine>,
    temp_dir: PathBuf,
    default_language: String,
    heartbeat_interval: Duration,
    progress_write_interval: Duration,
}

impl JobPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        quota: Arc<dyn QuotaStore>,
        store: Arc<dyn ObjectStore>,
        engine: Arc<dyn TranscriptionEngine>,
        temp_dir: PathBuf,
        default_language: String,
        heartbeat_interval: Duration,
        progress_write_interval: Duration,
    ) -> Self {
        Self {
            jobs,
            quota,
            store,
            engine,
            temp_dir,
            default_language,
            heartbeat_interval,
            progress_write_interval,
        }
    }

    /// Runs the full pipeline for one leased job. Never propagates an
    /// error: every failure is classified and resolved against the job
    /// repository before this returns.
    pub async fn process(&self, job: Job) {
        let temp_path = self.temp_path_for(&job);

        let outcome = self.run(&job, &temp_path).await;

        if let Err(err) = Self::cleanup_temp_file(&temp_path).await {
            tracing::warn!(job_id = %job.id, error = %err, "failed to remove temp file");
        }

        if let Err(failure) = outcome {
            self.resolve_failure(job.id, failure).await;
        }
    }

    async fn run(&self, job: &Job, temp_path: &Path) -> Result<(), JobFailure> {
        tracing::info!(
            job_id = %job.id, user_id = %job.user_id, object_key = %job.object_key,
            attempt = job.attempt_count, max_attempts = job.max_attempts,
            "processing job",
        );

        validate_object_key(&job.object_key, job.user_id)?;

        self.jobs
            .update_progress(job.id, ProgressUpdate { stage: Some(Stage::Downloading), ..Default::default() })
            .await?;
        self.store.download_to_path(&job.object_key, temp_path).await.map_err(JobFailure::Download)?;

        let estimated_minutes = self.estimate_minutes(job, temp_path).await;

        self.jobs
            .update_progress(job.id, ProgressUpdate { stage: Some(Stage::Transcribing), progress: Some(0.0) })
            .await?;

        let heartbeat = crate::heartbeat::Heartbeat::start(self.jobs.clone(), job.id, self.heartbeat_interval);
        let language = job.language.clone().unwrap_or_else(|| self.default_language.clone());
        let transcription = self.transcribe_with_progress(job.id, temp_path, &language).await;
        heartbeat.stop().await;

        let outcome = transcription.map_err(|e| JobFailure::InvalidMedia(TranscriptionErrorWrapper(e)))?;

        self.jobs
            .update_progress(job.id, ProgressUpdate { stage: Some(Stage::Finalizing), progress: Some(99.0) })
            .await?;

        let actual_minutes = ((outcome.duration_sec as f64) / 60.0).ceil().max(1.0) as i64;
        self.jobs.mark_done(job.id, outcome).await?;

        if let Err(err) = self.quota.reconcile(job.user_id, estimated_minutes, actual_minutes).await {
            tracing::error!(job_id = %job.id, error = %err, "quota reconciliation failed after successful transcription");
        }

        tracing::info!(job_id = %job.id, actual_minutes, "job completed successfully");
        Ok(())
    }

    async fn transcribe_with_progress(
        &self,
        job_id: Uuid,
        media_path: &Path,
        language: &str,
    ) -> Result<transcribe_core::TranscriptionOutcome, transcribe_core::TranscriptionError> {
        let jobs = self.jobs.clone();
        let write_interval = self.progress_write_interval;
        let last_write = std::sync::Mutex::new(Instant::now() - write_interval);

        let mut on_segment = move |tick: SegmentProgress| {
            let Some(total) = tick.total_duration_sec else { return };
            if total <= 0.0 {
                return;
            }

            let mut last = last_write.lock().unwrap();
            if last.elapsed() < write_interval {
                return;
            }
            *last = Instant::now();

            let progress = (tick.end_sec / total * 100.0).min(99.0).max(0.0);
            let jobs = jobs.clone();
            tokio::spawn(async move {
                let update = ProgressUpdate { progress: Some(progress), ..Default::default() };
                if let Err(err) = jobs.update_progress(job_id, update).await {
                    tracing::warn!(job_id = %job_id, error = %err, "progress write failed");
                }
            });
        };

        self.engine.transcribe(media_path, language, &mut on_segment).await
    }

    async fn estimate_minutes(&self, job: &Job, temp_path: &Path) -> i64 {
        if let Some(declared) = job.estimated_duration_sec {
            if declared > 0 {
                return (declared as f64 / 60.0).ceil().max(1.0) as i64;
            }
        }

        match self.store.object_metadata(&job.object_key).await {
            Ok(metadata) if metadata.content_length > 0 => {
                let size_mb = metadata.content_length as f64 / BYTES_PER_MB as f64;
                size_mb.max(1.0) as i64
            }
            _ => match tokio::fs::metadata(temp_path).await {
                Ok(meta) if meta.len() > 0 => (meta.len() / BYTES_PER_MB).max(1) as i64,
                _ => DEFAULT_ESTIMATED_MINUTES,
            },
        }
    }

    async fn resolve_failure(&self, job_id: Uuid, failure: JobFailure) {
        if let JobFailure::Repository(ref err) = failure {
            tracing::error!(job_id = %job_id, error = %err, "store unavailable mid-pipeline, skipping resolution");
            return;
        }

        let permanent = failure.kind() == transcribe_core::FailureDisposition::Permanent;
        let message = failure.to_string();

        if permanent {
            tracing::error!(job_id = %job_id, error = %message, "job permanently failed");
        } else {
            tracing::warn!(job_id = %job_id, error = %message, "job failed, will retry");
        }

        if let Err(err) = self.jobs.mark_failed(job_id, &message, permanent).await {
            tracing::error!(job_id = %job_id, error = %err, "failed to record job failure");
        }
    }

    fn temp_path_for(&self, job: &Job) -> PathBuf {
        let extension = Path::new(&job.object_key).extension().and_then(|e| e.to_str()).unwrap_or("mp3");
        self.temp_dir.join(format!("{}.{}", job.id, extension))
    }

    async fn cleanup_temp_file(path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Non-empty, no dot-file filename, no path traversal, must live under the
/// owning user's prefix. Any violation is a permanent failure — retrying
/// can never fix a key that was wrong to begin with.
fn validate_object_key(object_key: &str, user_id: Uuid) -> Result<(), ObjectKeyError> {
    if object_key.trim().is_empty() {
        return Err(ObjectKeyError::Empty);
    }

    let filename = object_key.rsplit('/').next().unwrap_or("");
    if filename.is_empty() {
        return Err(ObjectKeyError::NoFilename(object_key.to_string()));
    }
    if filename.starts_with('.') {
        return Err(ObjectKeyError::DotFile(object_key.to_string()));
    }
    if object_key.contains("..") {
        return Err(ObjectKeyError::PathTraversal(object_key.to_string()));
    }

    let expected_prefix = format!("users/{user_id}/");
    if !object_key.starts_with(&expected_prefix) {
        return Err(ObjectKeyError::WrongPrefix { object_key: object_key.to_string(), expected_user: user_id });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_key() {
        let user_id = Uuid::new_v4();
        assert!(validate_object_key(&format!("users/{user_id}/media/clip.mp3"), user_id).is_ok());
    }

    #[test]
    fn rejects_empty_key() {
        let user_id = Uuid::new_v4();
        assert!(matches!(validate_object_key("", user_id), Err(ObjectKeyError::Empty)));
    }

    #[test]
    fn rejects_dot_file() {
        let user_id = Uuid::new_v4();
        assert!(matches!(
            validate_object_key(&format!("users/{user_id}/media/.hidden"), user_id),
            Err(ObjectKeyError::DotFile(_))
        ));
    }

    #[test]
    fn rejects_path_traversal() {
        let user_id = Uuid::new_v4();
        assert!(matches!(
            validate_object_key(&format!("users/{user_id}/../secret/clip.mp3"), user_id),
            Err(ObjectKeyError::PathTraversal(_))
        ));
    }

    #[test]
    fn rejects_wrong_user_prefix() {
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(matches!(
            validate_object_key(&format!("users/{other}/media/clip.mp3"), user_id),
            Err(ObjectKeyError::WrongPrefix { .. })
        ));
    }

    mod end_to_end {
        use super::*;
        use transcribe_core::{
            EnqueueRequest, JobRepository, JobStatus, ObjectStoreError, TranscriptSegment, TranscriptionOutcome,
        };
        use transcribe_testing::{FakeJobRepository, FakeObjectStore, FakeQuotaStore, FakeTranscriptionEngine};

        fn make_pipeline(
            jobs: Arc<FakeJobRepository>,
            quota: Arc<FakeQuotaStore>,
            store: Arc<FakeObjectStore>,
            engine: Arc<FakeTranscriptionEngine>,
            temp_dir: &Path,
        ) -> JobPipeline {
            JobPipeline::new(
                jobs,
                quota,
                store,
                engine,
                temp_dir.to_path_buf(),
                "en".to_string(),
                Duration::from_secs(30),
                Duration::from_millis(1),
            )
        }

        async fn leased_job(jobs: &FakeJobRepository, user_id: Uuid, estimated_duration_sec: i64) -> Job {
            let object_key = format!("users/{user_id}/media/clip.mp3");
            jobs.enqueue(EnqueueRequest {
                user_id,
                object_key,
                recipe_id: None,
                estimated_duration_sec,
                priority: 0,
            })
            .await
            .unwrap();
            jobs.lease_next("worker-1", Utc::now()).await.unwrap().unwrap()
        }

        #[tokio::test]
        async fn happy_path_marks_done_and_reconciles_quota() {
            let jobs = Arc::new(FakeJobRepository::new());
            let quota = Arc::new(FakeQuotaStore::new());
            let store = Arc::new(FakeObjectStore::new());
            let user_id = Uuid::new_v4();
            let job = leased_job(&jobs, user_id, 300).await;
            store.put(&job.object_key, b"fake audio bytes".to_vec());
            quota.reserve(user_id, 5, 60).await.unwrap();

            let outcome = TranscriptionOutcome {
                text: "hello world".to_string(),
                segments: vec![TranscriptSegment { start: 0.0, end: 248.0, text: "hello world".into() }],
                language: "en".to_string(),
                duration_sec: 248,
                model_version: "test-engine".to_string(),
            };
            let engine = Arc::new(FakeTranscriptionEngine::succeeding(outcome));
            let temp_dir = tempfile::tempdir().unwrap();

            let pipeline = make_pipeline(jobs.clone(), quota.clone(), store, engine, temp_dir.path());
            pipeline.process(job.clone()).await;

            let after = jobs.get(job.id).unwrap();
            assert_eq!(after.status, JobStatus::Done);
            assert_eq!(after.progress, 100.0);
            assert_eq!(after.duration_sec, Some(248));
            assert_eq!(after.transcript_text.as_deref(), Some("hello world"));

            // estimated 5 min reserved up front, actual ceil(248/60) = 5: no net change.
            let usage = quota.get_usage(user_id).await.unwrap();
            assert_eq!(usage.minutes_used, 5);

            assert!(!temp_dir.path().join(format!("{}.mp3", job.id)).exists());
        }

        #[tokio::test]
        async fn retryable_engine_failure_requeues_with_backoff() {
            let jobs = Arc::new(FakeJobRepository::new());
            let quota = Arc::new(FakeQuotaStore::new());
            let store = Arc::new(FakeObjectStore::new());
            let user_id = Uuid::new_v4();
            let job = leased_job(&jobs, user_id, 300).await;
            store.put(&job.object_key, b"fake audio bytes".to_vec());

            let engine = Arc::new(FakeTranscriptionEngine::failing_retryable("model timed out"));
            let temp_dir = tempfile::tempdir().unwrap();

            let pipeline = make_pipeline(jobs.clone(), quota, store, engine, temp_dir.path());
            pipeline.process(job.clone()).await;

            let after = jobs.get(job.id).unwrap();
            assert_eq!(after.status, JobStatus::Queued);
            assert_eq!(after.attempt_count, 1);
            assert!(after.next_attempt_at.is_some());
            assert_eq!(after.error_message.as_deref(), Some("transcription failed (retryable): model timed out"));
        }

        #[tokio::test]
        async fn permanent_engine_failure_fails_immediately() {
            let jobs = Arc::new(FakeJobRepository::new());
            let quota = Arc::new(FakeQuotaStore::new());
            let store = Arc::new(FakeObjectStore::new());
            let user_id = Uuid::new_v4();
            let job = leased_job(&jobs, user_id, 300).await;
            store.put(&job.object_key, b"fake audio bytes".to_vec());

            let engine = Arc::new(FakeTranscriptionEngine::failing_permanent("unsupported codec"));
            let temp_dir = tempfile::tempdir().unwrap();

            let pipeline = make_pipeline(jobs.clone(), quota, store, engine, temp_dir.path());
            pipeline.process(job.clone()).await;

            let after = jobs.get(job.id).unwrap();
            assert_eq!(after.status, JobStatus::Failed);
            assert_eq!(after.attempt_count, 1);
        }

        #[tokio::test]
        async fn missing_object_is_permanent_failure_despite_remaining_budget() {
            let jobs = Arc::new(FakeJobRepository::new());
            let quota = Arc::new(FakeQuotaStore::new());
            let store = Arc::new(FakeObjectStore::new());
            let user_id = Uuid::new_v4();
            let job = leased_job(&jobs, user_id, 300).await;
            // Deliberately never `put` the object: download sees NotFound.

            let engine = Arc::new(FakeTranscriptionEngine::succeeding(TranscriptionOutcome {
                text: String::new(),
                segments: vec![],
                language: "en".to_string(),
                duration_sec: 1,
                model_version: "test-engine".to_string(),
            }));
            let temp_dir = tempfile::tempdir().unwrap();

            let pipeline = make_pipeline(jobs.clone(), quota, store, engine, temp_dir.path());
            pipeline.process(job.clone()).await;

            let after = jobs.get(job.id).unwrap();
            assert_eq!(after.status, JobStatus::Failed);
            assert!(after.max_attempts > after.attempt_count, "a transient NotFound should still be permanent");
        }

        #[tokio::test]
        async fn transient_download_failure_is_retryable() {
            let jobs = Arc::new(FakeJobRepository::new());
            let quota = Arc::new(FakeQuotaStore::new());
            let store = Arc::new(FakeObjectStore::new());
            let user_id = Uuid::new_v4();
            let job = leased_job(&jobs, user_id, 300).await;
            store.fail_with(
                &job.object_key,
                ObjectStoreError::Timeout { object_key: job.object_key.clone(), timeout_secs: 30 },
            );

            let engine = Arc::new(FakeTranscriptionEngine::succeeding(TranscriptionOutcome {
                text: String::new(),
                segments: vec![],
                language: "en".to_string(),
                duration_sec: 1,
                model_version: "test-engine".to_string(),
            }));
            let temp_dir = tempfile::tempdir().unwrap();

            let pipeline = make_pipeline(jobs.clone(), quota, store, engine, temp_dir.path());
            pipeline.process(job.clone()).await;

            let after = jobs.get(job.id).unwrap();
            assert_eq!(after.status, JobStatus::Queued);
            assert!(after.next_attempt_at.is_some());
        }

        #[tokio::test]
        async fn invalid_object_key_never_reaches_the_store() {
            let jobs = Arc::new(FakeJobRepository::new());
            let quota = Arc::new(FakeQuotaStore::new());
            let store = Arc::new(FakeObjectStore::new());
            let user_id = Uuid::new_v4();

            jobs.enqueue(EnqueueRequest {
                user_id,
                object_key: "users/someone-else/media/clip.mp3".to_string(),
                recipe_id: None,
                estimated_duration_sec: 300,
                priority: 0,
            })
            .await
            .unwrap();
            let job = jobs.lease_next("worker-1", Utc::now()).await.unwrap().unwrap();

            let engine = Arc::new(FakeTranscriptionEngine::succeeding(TranscriptionOutcome {
                text: String::new(),
                segments: vec![],
                language: "en".to_string(),
                duration_sec: 1,
                model_version: "test-engine".to_string(),
            }));
            let temp_dir = tempfile::tempdir().unwrap();

            let pipeline = make_pipeline(jobs.clone(), quota, store, engine, temp_dir.path());
            pipeline.process(job.clone()).await;

            let after = jobs.get(job.id).unwrap();
            assert_eq!(after.status, JobStatus::Failed);
        }
    }
}
