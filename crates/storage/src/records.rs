//! The aggregator record store: content-addressed, insert-if-absent.

use crate::row::{commitment_columns, u64_from_i64};
use crate::map_sqlx;
use arx_api::store::RecordStore;
use arx_types::commitment::{AggregatorRecord, RequestId};
use arx_types::error::StorageError;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT: &str = "INSERT INTO aggregatorrecords \
    (request_id, transaction_hash, algorithm, public_key, signature, state_hash) \
    VALUES ($1, $2, $3, $4, $5, $6) \
    ON CONFLICT (request_id) DO NOTHING";

const SELECT: &str = "SELECT request_id, transaction_hash, algorithm, public_key, \
    signature, state_hash, sequence_id FROM aggregatorrecords";

fn decode(row: &sqlx::postgres::PgRow) -> Result<AggregatorRecord, StorageError> {
    let (request_id, transaction_hash, authenticator) = commitment_columns(row)?;
    let sequence_id: i64 = row.try_get("sequence_id").map_err(map_sqlx)?;
    Ok(AggregatorRecord {
        request_id,
        transaction_hash,
        authenticator,
        sequence_id: Some(u64_from_i64(sequence_id, "sequence_id")?),
    })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn put(&self, record: &AggregatorRecord) -> Result<(), StorageError> {
        sqlx::query(INSERT)
            .bind(record.request_id.0.imprint())
            .bind(record.transaction_hash.imprint())
            .bind(&record.authenticator.algorithm)
            .bind(&record.authenticator.public_key)
            .bind(&record.authenticator.signature)
            .bind(record.authenticator.state_hash.imprint())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn put_batch(&self, records: &[AggregatorRecord]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for record in records {
            sqlx::query(INSERT)
                .bind(record.request_id.0.imprint())
                .bind(record.transaction_hash.imprint())
                .bind(&record.authenticator.algorithm)
                .bind(&record.authenticator.public_key)
                .bind(&record.authenticator.signature)
                .bind(record.authenticator.state_hash.imprint())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)
    }

    async fn get(&self, request_id: &RequestId) -> Result<Option<AggregatorRecord>, StorageError> {
        let row = sqlx::query(&format!("{SELECT} WHERE request_id = $1"))
            .bind(request_id.0.imprint())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_by_request_ids(
        &self,
        ids: &[RequestId],
    ) -> Result<Vec<AggregatorRecord>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<Vec<u8>> = ids.iter().map(|id| id.0.imprint()).collect();
        let rows = sqlx::query(&format!("{SELECT} WHERE request_id = ANY($1)"))
            .bind(&keys)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(decode).collect()
    }
}
