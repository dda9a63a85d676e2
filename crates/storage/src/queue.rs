//! The pending commitment queue.
//!
//! Entries move PENDING → PROCESSING in one atomic drain and are deleted
//! only once the block that includes them is durable. PROCESSING entries
//! left behind by a crash are flipped back to PENDING on the next leader
//! activation, never silently dropped.

use crate::map_sqlx;
use crate::row::commitment_columns;
use arx_api::store::PendingQueue;
use arx_types::commitment::Commitment;
use arx_types::error::StorageError;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

pub struct PgPendingQueue {
    pool: PgPool,
}

impl PgPendingQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingQueue for PgPendingQueue {
    async fn put(&self, commitment: &Commitment) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO commitments \
             (request_id, transaction_hash, algorithm, public_key, signature, state_hash) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(commitment.request_id.0.imprint())
        .bind(commitment.transaction_hash.imprint())
        .bind(&commitment.authenticator.algorithm)
        .bind(&commitment.authenticator.public_key)
        .bind(&commitment.authenticator.signature)
        .bind(commitment.authenticator.state_hash.imprint())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn drain_for_block(&self) -> Result<Vec<Commitment>, StorageError> {
        let rows = sqlx::query(
            "UPDATE commitments SET state = 'PROCESSING' WHERE state = 'PENDING' \
             RETURNING id, request_id, transaction_hash, algorithm, public_key, \
             signature, state_hash",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        // RETURNING order is unspecified; restore insertion order.
        let mut drained = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id").map_err(map_sqlx)?;
            let (request_id, transaction_hash, authenticator) = commitment_columns(row)?;
            drained.push((
                id,
                Commitment {
                    request_id,
                    transaction_hash,
                    authenticator,
                },
            ));
        }
        drained.sort_by_key(|(id, _)| *id);
        Ok(drained.into_iter().map(|(_, c)| c).collect())
    }

    async fn confirm_block_processed(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM commitments WHERE state = 'PROCESSING'")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn recover_orphaned(&self) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE commitments SET state = 'PENDING' WHERE state = 'PROCESSING'",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}
