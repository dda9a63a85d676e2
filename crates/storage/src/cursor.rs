//! Durable change-feed positions, one row per stream id.

use crate::map_sqlx;
use crate::row::{i64_from_u64, u64_from_i64};
use arx_api::store::CursorStore;
use arx_types::error::StorageError;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load(&self, stream_id: &str) -> Result<Option<u64>, StorageError> {
        let row = sqlx::query(
            "SELECT position FROM blockrecords_resumetokens WHERE stream_id = $1",
        )
        .bind(stream_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let position: i64 = row.try_get("position").map_err(map_sqlx)?;
        Ok(Some(u64_from_i64(position, "cursor position")?))
    }

    async fn save(&self, stream_id: &str, position: u64) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO blockrecords_resumetokens (stream_id, position, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (stream_id) DO UPDATE SET \
                 position = EXCLUDED.position, updated_at = now()",
        )
        .bind(stream_id)
        .bind(i64_from_u64(position, "cursor position")?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn clear(&self, stream_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM blockrecords_resumetokens WHERE stream_id = $1")
            .bind(stream_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}
