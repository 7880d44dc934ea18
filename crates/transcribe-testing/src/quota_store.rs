use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use transcribe_core::{DailyUsage, QuotaCheck, QuotaStore, RepositoryError};
use uuid::Uuid;

/// In-memory stand-in for `PgQuotaStore`. Same compare-and-increment
/// semantics as `reserve_quota`, minus the need for a row lock since the
/// whole store is behind one mutex.
pub struct FakeQuotaStore {
    usage: Mutex<HashMap<(Uuid, NaiveDate), DailyUsage>>,
}

impl FakeQuotaStore {
    pub fn new() -> Self {
        Self { usage: Mutex::new(HashMap::new()) }
    }
}

impl Default for FakeQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotaStore for FakeQuotaStore {
    async fn reserve(&self, user_id: Uuid, minutes: i64, daily_limit: i64) -> Result<QuotaCheck, RepositoryError> {
        let today = Utc::now().date_naive();
        let mut usage = self.usage.lock().unwrap();
        let entry = usage.entry((user_id, today)).or_insert_with(|| DailyUsage {
            user_id,
            date: today,
            minutes_used: 0,
            jobs_count: 0,
            updated_at: None,
        });

        let projected = entry.minutes_used + minutes;
        if projected > daily_limit {
            return Ok(QuotaCheck {
                allowed: false,
                minutes_remaining: (daily_limit - entry.minutes_used).max(0),
                daily_limit,
                reason: None,
            });
        }

        entry.minutes_used = projected;
        entry.jobs_count += 1;
        entry.updated_at = Some(Utc::now());

        Ok(QuotaCheck { allowed: true, minutes_remaining: daily_limit - projected, daily_limit, reason: None })
    }

    async fn reconcile(&self, user_id: Uuid, estimated_minutes: i64, actual_minutes: i64) -> Result<(), RepositoryError> {
        let today = Utc::now().date_naive();
        let mut usage = self.usage.lock().unwrap();
        let entry = usage.entry((user_id, today)).or_insert_with(|| DailyUsage {
            user_id,
            date: today,
            minutes_used: 0,
            jobs_count: 0,
            updated_at: None,
        });

        let delta = actual_minutes - estimated_minutes;
        entry.minutes_used = (entry.minutes_used + delta).max(0);
        entry.updated_at = Some(Utc::now());

        Ok(())
    }

    async fn get_usage(&self, user_id: Uuid) -> Result<DailyUsage, RepositoryError> {
        let today = Utc::now().date_naive();
        let usage = self.usage.lock().unwrap();

        Ok(usage.get(&(user_id, today)).cloned().unwrap_or(DailyUsage {
            user_id,
            date: today,
            minutes_used: 0,
            jobs_count: 0,
            updated_at: None,
        }))
    }
}
