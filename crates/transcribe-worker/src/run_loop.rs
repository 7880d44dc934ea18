use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use transcribe_core::JobRepository;

use crate::pipeline::JobPipeline;

/// The subset of [`crate::WorkerConfig`] the run-loop itself needs, kept
/// separate so tests can drive the loop with tight intervals without
/// touching the process environment.
#[derive(Debug, Clone)]
pub struct WorkerLoopConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub max_jobs_per_run: u64,
    pub shutdown_on_empty: bool,
    pub empty_queue_shutdown_minutes: i64,
    pub lock_ttl_minutes: i64,
    pub stale_lock_check_interval_minutes: i64,
}

/// `poll_interval` grows by this factor on every empty poll, capped at
/// `max_poll_interval`.
const POLL_BACKOFF_FACTOR: f64 = 1.5;

/// Drives [`JobPipeline::process`] against a [`JobRepository`] forever (or
/// until signalled to stop): periodic stale-lock recovery, lease,
/// process-or-backoff.
pub struct WorkerLoop {
    jobs: Arc<dyn JobRepository>,
    pipeline: Arc<JobPipeline>,
    config: WorkerLoopConfig,
    shutdown: Arc<AtomicBool>,
}

impl WorkerLoop {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        pipeline: Arc<JobPipeline>,
        config: WorkerLoopConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self { jobs, pipeline, config, shutdown }
    }

    /// Runs until `shutdown` is observed true between iterations, or the
    /// configured `max_jobs_per_run` is reached. Never returns early on a
    /// transient Store error — a failed `lease_next` or
    /// `release_stale_locks` call is logged and treated the same as an
    /// empty poll, so the loop degrades gracefully during a Store outage
    /// instead of exiting the process.
    pub async fn run(&self) {
        let mut current_sleep = self.config.poll_interval;
        let mut jobs_processed: u64 = 0;
        let mut last_job_at: DateTime<Utc> = Utc::now();
        let mut last_stale_check: DateTime<Utc> = Utc::now() - chrono::Duration::minutes(self.config.stale_lock_check_interval_minutes);

        tracing::info!(worker_id = %self.config.worker_id, "worker loop starting");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                tracing::info!(worker_id = %self.config.worker_id, jobs_processed, "shutdown requested, exiting run loop");
                break;
            }

            let now = Utc::now();
            if now - last_stale_check >= chrono::Duration::minutes(self.config.stale_lock_check_interval_minutes) {
                match self.jobs.release_stale_locks(self.config.lock_ttl_minutes).await {
                    Ok(released) if released > 0 => {
                        tracing::warn!(worker_id = %self.config.worker_id, released, "reclaimed stale locks");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(worker_id = %self.config.worker_id, error = %err, "stale lock sweep failed, store unavailable");
                    }
                }
                last_stale_check = now;
            }

            let leased = match self.jobs.lease_next(&self.config.worker_id, Utc::now()).await {
                Ok(leased) => leased,
                Err(err) => {
                    tracing::error!(worker_id = %self.config.worker_id, error = %err, "lease_next failed, store unavailable");
                    None
                }
            };

            match leased {
                Some(job) => {
                    self.pipeline.process(job).await;

                    jobs_processed += 1;
                    last_job_at = Utc::now();
                    current_sleep = self.config.poll_interval;

                    if self.config.max_jobs_per_run > 0 && jobs_processed >= self.config.max_jobs_per_run {
                        tracing::info!(worker_id = %self.config.worker_id, jobs_processed, "per-run job limit reached, exiting run loop");
                        break;
                    }
                }
                None => {
                    if self.config.shutdown_on_empty {
                        let idle_for = Utc::now() - last_job_at;
                        if idle_for >= chrono::Duration::minutes(self.config.empty_queue_shutdown_minutes) {
                            tracing::info!(
                                worker_id = %self.config.worker_id,
                                idle_minutes = idle_for.num_minutes(),
                                "queue empty past shutdown horizon, exiting run loop",
                            );
                            break;
                        }
                    }

                    tokio::time::sleep(current_sleep).await;
                    current_sleep = next_poll_interval(current_sleep, self.config.max_poll_interval);
                }
            }
        }
    }
}

fn next_poll_interval(current: Duration, cap: Duration) -> Duration {
    let grown = current.mul_f64(POLL_BACKOFF_FACTOR);
    grown.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_grows_multiplicatively_up_to_cap() {
        let cap = Duration::from_secs(30);
        let mut interval = Duration::from_secs(5);

        interval = next_poll_interval(interval, cap);
        assert_eq!(interval, Duration::from_millis(7500));

        for _ in 0..10 {
            interval = next_poll_interval(interval, cap);
        }
        assert_eq!(interval, cap);
    }
}
