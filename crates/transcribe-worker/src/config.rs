use std::env;
use std::time::Duration;

use thiserror::Error;

/// Everything the worker loop, the object store adapter, and the Postgres
/// pool need at startup. Loaded once from the process environment by
/// [`WorkerConfig::from_env`], then validated before the worker is allowed
/// to start — a missing credential fails fast at boot instead of surfacing
/// as a confusing error on the first lease.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval_seconds: u64,
    pub max_poll_interval_seconds: u64,
    pub max_jobs_per_run: u64,
    pub shutdown_on_empty: bool,
    pub empty_queue_shutdown_minutes: i64,
    pub lock_ttl_minutes: i64,
    pub stale_lock_check_interval_minutes: i64,
    pub heartbeat_interval_seconds: u64,
    pub temp_dir: String,
    pub default_language: String,
    pub database_url: String,
    pub object_store_endpoint: String,
    pub object_store_access_key_id: String,
    pub object_store_secret_access_key: String,
    pub object_store_bucket: String,
    pub object_store_region: String,
    pub daily_quota_minutes: i64,
    pub transcription_engine_command: String,
    pub transcription_engine_timeout_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for environment variable {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

impl WorkerConfig {
    /// Every field has a `WORKER_*` (or service-specific) environment
    /// variable with a sensible production default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            worker_id: env_or("WORKER_ID", || format!("worker-{}", std::process::id())),
            poll_interval_seconds: parse_or("WORKER_POLL_INTERVAL", 5)?,
            max_poll_interval_seconds: parse_or("WORKER_MAX_POLL_INTERVAL", 30)?,
            max_jobs_per_run: parse_or("WORKER_MAX_JOBS_PER_RUN", 0)?,
            shutdown_on_empty: parse_or("WORKER_SHUTDOWN_ON_EMPTY", false)?,
            empty_queue_shutdown_minutes: parse_or("WORKER_EMPTY_SHUTDOWN_MINUTES", 10)?,
            lock_ttl_minutes: parse_or("WORKER_LOCK_TTL_MINUTES", 30)?,
            stale_lock_check_interval_minutes: parse_or("WORKER_STALE_CHECK_MINUTES", 5)?,
            heartbeat_interval_seconds: parse_or("WORKER_HEARTBEAT_INTERVAL_SECONDS", 20)?,
            temp_dir: env_or("WORKER_TEMP_DIR", || "/tmp/transcription-worker".to_string()),
            default_language: env_or("TRANSCRIPTION_LANGUAGE", || "pt".to_string()),
            database_url: require_env("DATABASE_URL")?,
            object_store_endpoint: require_env("OBJECT_STORE_ENDPOINT")?,
            object_store_access_key_id: require_env("OBJECT_STORE_ACCESS_KEY_ID")?,
            object_store_secret_access_key: require_env("OBJECT_STORE_SECRET_ACCESS_KEY")?,
            object_store_bucket: require_env("OBJECT_STORE_BUCKET")?,
            object_store_region: env_or("OBJECT_STORE_REGION", || "auto".to_string()),
            daily_quota_minutes: parse_or("WORKER_DAILY_QUOTA_MINUTES", 120)?,
            transcription_engine_command: env_or("TRANSCRIPTION_ENGINE_COMMAND", || "transcription-engine".to_string()),
            transcription_engine_timeout_seconds: parse_or("TRANSCRIPTION_ENGINE_TIMEOUT_SECONDS", 3600)?,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_secs(self.max_poll_interval_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn transcription_engine_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription_engine_timeout_seconds)
    }
}

fn env_or(name: &str, default: impl FnOnce() -> String) -> String {
    env::var(name).unwrap_or_else(|_| default())
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn parse_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes env-mutating tests; `std::env::set_var` is process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn required_vars() -> [(&'static str, &'static str); 4] {
        [
            ("DATABASE_URL", "postgres://localhost/test"),
            ("OBJECT_STORE_ENDPOINT", "https://example.r2.cloudflarestorage.com"),
            ("OBJECT_STORE_ACCESS_KEY_ID", "key"),
            ("OBJECT_STORE_SECRET_ACCESS_KEY", "secret"),
        ]
    }

    #[test]
    fn loads_defaults_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        for (name, value) in required_vars() {
            env::set_var(name, value);
        }
        env::set_var("OBJECT_STORE_BUCKET", "media");
        env::remove_var("WORKER_POLL_INTERVAL");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.poll_interval_seconds, 5);
        assert_eq!(config.max_jobs_per_run, 0);
        assert!(!config.shutdown_on_empty);
    }

    #[test]
    fn fails_fast_on_missing_database_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        for (name, value) in required_vars() {
            env::set_var(name, value);
        }
        env::set_var("OBJECT_STORE_BUCKET", "media");
        env::remove_var("DATABASE_URL");

        let err = WorkerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("DATABASE_URL")));
    }

    #[test]
    fn rejects_unparseable_numeric_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        for (name, value) in required_vars() {
            env::set_var(name, value);
        }
        env::set_var("OBJECT_STORE_BUCKET", "media");
        env::set_var("WORKER_POLL_INTERVAL", "not-a-number");

        let err = WorkerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "WORKER_POLL_INTERVAL", .. }));

        env::remove_var("WORKER_POLL_INTERVAL");
    }
}
