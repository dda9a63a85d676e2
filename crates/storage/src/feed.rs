//! The block-records change feed tail.
//!
//! A durable tail over the `blockrecords` table. Consumers page events
//! after their cursor; `wait_for_append` parks on the LISTEN channel the
//! block append pulses, falling back to the timeout so a lost notification
//! only costs one poll interval.

use crate::map_sqlx;
use crate::row::{hash_from_bytes, i64_from_u64, u64_from_i64};
use crate::FEED_CHANNEL;
use arx_api::feed::{ChangeFeed, FeedEvent};
use arx_types::commitment::RequestId;
use arx_types::error::StorageError;
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tokio::sync::Mutex;

pub struct PgChangeFeed {
    pool: PgPool,
    listener: Mutex<Option<PgListener>>,
}

impl PgChangeFeed {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            listener: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn poll_after(&self, cursor: u64, limit: u32) -> Result<Vec<FeedEvent>, StorageError> {
        let rows = sqlx::query(
            "SELECT block_number, request_ids FROM blockrecords \
             WHERE block_number > $1 ORDER BY block_number LIMIT $2",
        )
        .bind(i64_from_u64(cursor, "cursor")?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let block_number: i64 = row.try_get("block_number").map_err(map_sqlx)?;
            let raw: Vec<Vec<u8>> = row.try_get("request_ids").map_err(map_sqlx)?;
            let request_ids = raw
                .iter()
                .map(|bytes| hash_from_bytes(bytes, "request_id").map(RequestId))
                .collect::<Result<Vec<_>, _>>()?;
            events.push(FeedEvent {
                block_number: u64_from_i64(block_number, "block_number")?,
                request_ids,
            });
        }
        Ok(events)
    }

    async fn head(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COALESCE(MAX(block_number), 0) AS head FROM blockrecords")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let head: i64 = row.try_get("head").map_err(map_sqlx)?;
        u64_from_i64(head, "feed head")
    }

    async fn wait_for_append(&self, timeout: Duration) -> Result<(), StorageError> {
        let mut guard = self.listener.lock().await;
        if guard.is_none() {
            let mut listener = PgListener::connect_with(&self.pool)
                .await
                .map_err(map_sqlx)?;
            listener.listen(FEED_CHANNEL).await.map_err(map_sqlx)?;
            *guard = Some(listener);
        }
        let Some(listener) = guard.as_mut() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, listener.recv()).await {
            // Signal or timeout: either way the consumer polls next.
            Ok(Ok(_)) | Err(_) => Ok(()),
            Ok(Err(e)) => {
                // Drop the broken listener; the next wait reconnects.
                *guard = None;
                Err(map_sqlx(e))
            }
        }
    }
}
