//! Binary entrypoint for one worker process (component G). Wires the
//! concrete Postgres-backed `JobRepository`/`QuotaStore`, the S3-compatible
//! `ObjectStore`, and a process-boundary `TranscriptionEngine` together,
//! then hands control to [`transcribe_worker::WorkerLoop`].
//!
//! This binary is a thin composition root: every behavioural decision
//! (retry policy, lease ordering, backoff) lives in the library crates it
//! wires together, not here.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use transcribe_object_store::{S3ObjectStore, S3ObjectStoreConfig};
use transcribe_postgres::{PgJobRepository, PgQuotaStore};
use transcribe_worker::{CliTranscriptionEngine, JobPipeline, WorkerConfig, WorkerLoop, WorkerLoopConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = WorkerConfig::from_env().context("loading worker configuration")?;

    tracing::info!(
        worker_id = %config.worker_id,
        poll_interval_seconds = config.poll_interval_seconds,
        daily_quota_minutes = config.daily_quota_minutes,
        "starting transcription worker",
    );

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("connecting to the job store")?;

    let jobs = Arc::new(PgJobRepository::new(pool.clone()));
    let quota = Arc::new(PgQuotaStore::new(pool));

    let object_store = S3ObjectStore::new(S3ObjectStoreConfig {
        endpoint_url: config.object_store_endpoint.clone(),
        access_key_id: config.object_store_access_key_id.clone(),
        secret_access_key: config.object_store_secret_access_key.clone(),
        bucket: config.object_store_bucket.clone(),
        region: config.object_store_region.clone(),
    })
    .await;
    let object_store = Arc::new(object_store);

    let engine = Arc::new(CliTranscriptionEngine::new(
        config.transcription_engine_command.clone(),
        Vec::new(),
        config.transcription_engine_timeout(),
    ));

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("creating temp directory {}", config.temp_dir))?;

    let pipeline = Arc::new(JobPipeline::new(
        jobs.clone(),
        quota,
        object_store,
        engine,
        PathBuf::from(&config.temp_dir),
        config.default_language.clone(),
        config.heartbeat_interval(),
        std::time::Duration::from_secs(5),
    ));

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_handlers(shutdown.clone());

    let loop_config = WorkerLoopConfig {
        worker_id: config.worker_id.clone(),
        poll_interval: config.poll_interval(),
        max_poll_interval: config.max_poll_interval(),
        max_jobs_per_run: config.max_jobs_per_run,
        shutdown_on_empty: config.shutdown_on_empty,
        empty_queue_shutdown_minutes: config.empty_queue_shutdown_minutes,
        lock_ttl_minutes: config.lock_ttl_minutes,
        stale_lock_check_interval_minutes: config.stale_lock_check_interval_minutes,
    };

    let worker_loop = WorkerLoop::new(jobs, pipeline, loop_config, shutdown);
    worker_loop.run().await;

    tracing::info!(worker_id = %config.worker_id, "worker shutdown complete");
    Ok(())
}

/// Installs SIGTERM/SIGINT handlers that flip `shutdown` and return; the
/// run loop observes the flag between iterations (level-triggered) rather
/// than being interrupted mid-job: a worker finishes its in-flight job
/// before exiting.
fn spawn_signal_handlers(shutdown: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }

            shutdown.store(true, Ordering::SeqCst);
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received shutdown signal");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }
}
