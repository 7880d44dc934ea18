//! Long-running worker (component G): the only concurrent actor inside a
//! process is its heartbeat task (see [`heartbeat::Heartbeat`]). Everything
//! else here — polling, stale-lock recovery, the per-job pipeline, sleep
//! back-off — runs on one cooperative single-threaded loop; parallelism
//! comes exclusively from running more worker processes against the same
//! Store.
//!
//! Library surface (`run_loop`, `pipeline`, `heartbeat`, `config`) is kept
//! separate from the `main.rs` binary entrypoint so the run-loop can be
//! exercised in tests against `transcribe-testing`'s fakes without a live
//! Postgres instance or S3-compatible bucket.

mod config;
mod engine;
mod heartbeat;
mod pipeline;
mod run_loop;

pub use config::{ConfigError, WorkerConfig};
pub use engine::CliTranscriptionEngine;
pub use pipeline::JobPipeline;
pub use run_loop::{WorkerLoop, WorkerLoopConfig};
