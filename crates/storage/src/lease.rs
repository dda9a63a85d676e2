//! The leadership lease row.
//!
//! Every comparison runs against the database clock (`now()`), so a
//! replica with a skewed clock can neither steal an unexpired lease nor
//! keep a lease it has lost.

use crate::map_sqlx;
use arx_api::store::LeaseStore;
use arx_types::cluster::{LeadershipLease, LEADERSHIP_LOCK_ID};
use arx_types::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;

pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn try_acquire(&self, holder_id: &str, ttl: Duration) -> Result<bool, StorageError> {
        // Takeover is legal when the lease is absent or expired. A holder
        // may also retake its own unexpired lease after a missed heartbeat.
        let result = sqlx::query(
            "INSERT INTO leadership (lock_id, holder_id, acquired_at, heartbeat_at, expires_at) \
             VALUES ($1, $2, now(), now(), now() + make_interval(secs => $3)) \
             ON CONFLICT (lock_id) DO UPDATE SET \
                 holder_id = EXCLUDED.holder_id, \
                 acquired_at = EXCLUDED.acquired_at, \
                 heartbeat_at = EXCLUDED.heartbeat_at, \
                 expires_at = EXCLUDED.expires_at \
             WHERE leadership.expires_at < now() OR leadership.holder_id = EXCLUDED.holder_id",
        )
        .bind(LEADERSHIP_LOCK_ID)
        .bind(holder_id)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn heartbeat(&self, holder_id: &str, ttl: Duration) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE leadership SET heartbeat_at = now(), \
             expires_at = now() + make_interval(secs => $3) \
             WHERE lock_id = $1 AND holder_id = $2 AND expires_at > now()",
        )
        .bind(LEADERSHIP_LOCK_ID)
        .bind(holder_id)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, holder_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM leadership WHERE lock_id = $1 AND holder_id = $2")
            .bind(LEADERSHIP_LOCK_ID)
            .bind(holder_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn current(&self) -> Result<Option<LeadershipLease>, StorageError> {
        let row = sqlx::query(
            "SELECT lock_id, holder_id, acquired_at, heartbeat_at, expires_at \
             FROM leadership WHERE lock_id = $1",
        )
        .bind(LEADERSHIP_LOCK_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let lock_id: String = row.try_get("lock_id").map_err(map_sqlx)?;
        let holder_id: String = row.try_get("holder_id").map_err(map_sqlx)?;
        let acquired_at: DateTime<Utc> = row.try_get("acquired_at").map_err(map_sqlx)?;
        let heartbeat_at: DateTime<Utc> = row.try_get("heartbeat_at").map_err(map_sqlx)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(map_sqlx)?;
        Ok(Some(LeadershipLease {
            lock_id,
            holder_id,
            acquired_at,
            heartbeat_at,
            expires_at,
        }))
    }
}
