//! # Download Counter Repository
//!
//! Expiring attempt counters shared by every worker on the database.
//!
//! ## Fixed Window
//! ```text
//!   hit(key, 60s)          count  expires_at
//!   ─────────────────────  ─────  ──────────
//!   t = 0s   (new key)       1     t + 60s
//!   t = 10s                  2     t + 60s   (window unchanged)
//!   t = 61s  (expired)       1     61s + 60s (window restarts)
//! ```
//! Increment-and-read is one upsert statement, so concurrent hits on the
//! same key are counted exactly.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::debug;

use crate::error::DbResult;

/// Repository for shared download attempt counters.
#[derive(Debug, Clone)]
pub struct DownloadCounterRepository {
    pool: SqlitePool,
}

impl DownloadCounterRepository {
    /// Creates a new DownloadCounterRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DownloadCounterRepository { pool }
    }

    /// Counts one attempt against `key` and returns the count in the
    /// current window, including this attempt.
    pub async fn hit(&self, key: &str, window: Duration, now: DateTime<Utc>) -> DbResult<i64> {
        let now_ms = now.timestamp_millis();
        let expires_ms = now_ms + window.as_millis() as i64;

        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO download_counters (key, count, expires_at_ms)
            VALUES (?1, 1, ?3)
            ON CONFLICT (key) DO UPDATE SET
                count = CASE WHEN expires_at_ms <= ?2 THEN 1 ELSE count + 1 END,
                expires_at_ms = CASE WHEN expires_at_ms <= ?2 THEN ?3 ELSE expires_at_ms END
            RETURNING count
            "#,
        )
        .bind(key)
        .bind(now_ms)
        .bind(expires_ms)
        .fetch_one(&self.pool)
        .await?;

        debug!(key = %key, count = count, "Download attempt counted");
        Ok(count)
    }

    /// Count in the current window without recording an attempt.
    pub async fn current(&self, key: &str, now: DateTime<Utc>) -> DbResult<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT count FROM download_counters WHERE key = ? AND expires_at_ms > ?",
        )
        .bind(key)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    /// Deletes expired counters. Returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM download_counters WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_window_counts_and_resets() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let counters = db.downloads();
        let window = Duration::from_secs(60);
        let t0 = Utc::now();

        assert_eq!(counters.hit("k", window, t0).await.unwrap(), 1);
        assert_eq!(counters.hit("k", window, t0 + chrono::Duration::seconds(10)).await.unwrap(), 2);
        assert_eq!(counters.current("k", t0 + chrono::Duration::seconds(20)).await.unwrap(), 2);

        let later = t0 + chrono::Duration::seconds(61);
        assert_eq!(counters.current("k", later).await.unwrap(), 0);
        assert_eq!(counters.hit("k", window, later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent_and_purged() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let counters = db.downloads();
        let t0 = Utc::now();

        counters.hit("a", Duration::from_secs(1), t0).await.unwrap();
        counters.hit("b", Duration::from_secs(600), t0).await.unwrap();
        assert_eq!(counters.current("b", t0).await.unwrap(), 1);

        let removed = counters
            .purge_expired(t0 + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(counters.current("b", t0).await.unwrap(), 1);
    }
}
