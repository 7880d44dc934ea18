use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use transcribe_core::{DailyUsage, QuotaCheck, QuotaStore, RepositoryError};
use uuid::Uuid;

/// PostgreSQL-backed daily quota store (component D).
///
/// `reserve` delegates to the `reserve_quota` database function so the
/// insert-if-absent-then-compare-and-increment sequence runs as one
/// statement; no two concurrent reservations can both push a user's
/// `minutes_used` past their daily limit.
#[derive(Clone)]
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn reserve(&self, user_id: Uuid, minutes: i64, daily_limit: i64) -> Result<QuotaCheck, RepositoryError> {
        let today = Utc::now().date_naive();

        let result = sqlx::query("SELECT * FROM reserve_quota($1, $2, $3, $4)")
            .bind(user_id)
            .bind(today)
            .bind(minutes)
            .bind(daily_limit)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => {
                let allowed: bool = row.get("allowed");
                let minutes_remaining: i64 = row.get("minutes_remaining");
                Ok(QuotaCheck {
                    allowed,
                    minutes_remaining,
                    daily_limit,
                    reason: None,
                })
            }
            Err(err) => {
                // Conservatively allow on store outage: over-grant under an
                // outage trades against availability, an explicit design
                // decision rather than an oversight.
                tracing::error!(user_id = %user_id, error = %err, "quota reservation failed, allowing by default");
                Ok(QuotaCheck {
                    allowed: true,
                    minutes_remaining: daily_limit,
                    daily_limit,
                    reason: Some("quota check failed, allowing by default".to_string()),
                })
            }
        }
    }

    async fn reconcile(&self, user_id: Uuid, estimated_minutes: i64, actual_minutes: i64) -> Result<(), RepositoryError> {
        let diff = actual_minutes - estimated_minutes;
        let today = Utc::now().date_naive();

        sqlx::query(
            r#"
            INSERT INTO usage_daily (user_id, usage_date, minutes_used, jobs_count, updated_at)
            VALUES ($1, $2, GREATEST($3, 0), 0, NOW())
            ON CONFLICT (user_id, usage_date)
            DO UPDATE SET
                minutes_used = GREATEST(usage_daily.minutes_used + $3, 0),
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(today)
        .bind(diff)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::StoreUnavailable(format!("reconcile: {e}")))?;

        tracing::debug!(user_id = %user_id, estimated_minutes, actual_minutes, diff, "quota reconciled");
        Ok(())
    }

    async fn get_usage(&self, user_id: Uuid) -> Result<DailyUsage, RepositoryError> {
        let today = Utc::now().date_naive();

        let row = sqlx::query(
            "SELECT minutes_used, jobs_count, updated_at FROM usage_daily WHERE user_id = $1 AND usage_date = $2",
        )
        .bind(user_id)
        .bind(today)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::StoreUnavailable(format!("get_usage: {e}")))?;

        match row {
            Some(row) => Ok(DailyUsage {
                user_id,
                date: today,
                minutes_used: row.get("minutes_used"),
                jobs_count: row.get("jobs_count"),
                updated_at: row.get("updated_at"),
            }),
            None => Ok(DailyUsage {
                user_id,
                date: today,
                minutes_used: 0,
                jobs_count: 0,
                updated_at: None,
            }),
        }
    }
}
