use async_trait::async_trait;
use sqlx::Row;

use warden_core::errors::StoreError;
use warden_core::rate_limit::CounterStore;

use super::{decode_err, RepositoryError};
use crate::DbPool;

/// Fixed-window counters in the `rate_counters` table.
///
/// Expired rows are ignored by reads. Whenever an increment opens a new window the store also
/// deletes every expired row, so bucket keys that are never touched again do not pile up.
pub struct SqlCounterStore {
    pool: DbPool,
}

impl SqlCounterStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn current_at(&self, key: &str, now: u64) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT count FROM rate_counters WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(to_i64(now))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let count: i64 = row.try_get("count").map_err(decode_err)?;
                Ok(u64::try_from(count).unwrap_or(0))
            }
            None => Ok(0),
        }
    }

    pub async fn increment_at(
        &self,
        key: &str,
        ttl_secs: u64,
        now: u64,
    ) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO rate_counters (key, count, expires_at) VALUES (?1, 1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                 count = CASE WHEN rate_counters.expires_at <= ?3
                              THEN 1 ELSE rate_counters.count + 1 END,
                 expires_at = excluded.expires_at
             RETURNING count",
        )
        .bind(key)
        .bind(to_i64(now.saturating_add(ttl_secs)))
        .bind(to_i64(now))
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("count").map_err(decode_err)?;
        if count == 1 {
            self.purge_expired(now).await?;
        }
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Deletes counters whose window has passed; returns the number removed.
    pub async fn purge_expired(&self, now: u64) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM rate_counters WHERE expires_at <= ?")
            .bind(to_i64(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl CounterStore for SqlCounterStore {
    async fn current(&self, key: &str, now: u64) -> Result<u64, StoreError> {
        Ok(self.current_at(key, now).await?)
    }

    async fn increment(&self, key: &str, ttl_secs: u64, now: u64) -> Result<u64, StoreError> {
        Ok(self.increment_at(key, ttl_secs, now).await?)
    }
}
