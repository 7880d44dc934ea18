use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use transcribe_core::{JobRepository, ProgressUpdate};
use uuid::Uuid;

/// The worker's one permitted concurrent actor: a background tick that
/// touches only `last_heartbeat_at` while a transcription call is in
/// flight, so the main loop's stale-lock sweep never reclaims a lease that
/// is merely slow rather than dead. Started when transcription begins,
/// aborted the moment it returns — never outlives the job it watches.
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn start(jobs: Arc<dyn JobRepository>, job_id: Uuid, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it

            loop {
                ticker.tick().await;

                let update = ProgressUpdate { heartbeat_at: Some(Utc::now()), ..Default::default() };
                if let Err(err) = jobs.update_progress(job_id, update).await {
                    tracing::warn!(job_id = %job_id, error = %err, "heartbeat write failed");
                }
            }
        });

        Self { handle }
    }

    /// Stops the background tick. Dropping the handle without calling this
    /// would leave the task running detached.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
