//! PostgreSQL implementation of the transcription job queue.
//!
//! This crate provides `transcribe_core::JobRepository` and
//! `transcribe_core::QuotaStore` implementations backed by Postgres.
//!
//! # Features
//!
//! - Row-level skip-locking (`FOR UPDATE SKIP LOCKED`) for job leasing
//! - Exponential backoff retry scheduling
//! - Atomic per-user daily quota reservation
//! - Stale-lock recovery sweep
//!
//! # Database schema
//!
//! See `migrations/0001_init.sql` for the table definitions and
//! `migrations/0002_functions.sql` for the `lease_next` and `reserve_quota`
//! database functions this crate calls into.
//!
//! # Usage
//!
//! ```rust,ignore
//! use transcribe_postgres::{PgJobRepository, PgQuotaStore};
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/transcription").await?;
//! let jobs = PgJobRepository::new(pool.clone());
//! let quota = PgQuotaStore::new(pool);
//! ```

mod jobs;
mod quota;
mod row;

#[cfg(test)]
mod tests;

pub use jobs::PgJobRepository;
pub use quota::PgQuotaStore;
