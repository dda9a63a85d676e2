//! The SMT leaf store.

use crate::map_sqlx;
use crate::row::{hash_from_bytes, i64_from_u64, path_from_bytes, u64_from_i64};
use arx_api::store::{LeafChunk, LeafStore};
use arx_types::commitment::{LeafPath, SmtLeaf};
use arx_types::error::StorageError;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

pub struct PgLeafStore {
    pool: PgPool,
}

impl PgLeafStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_leaf(row: &sqlx::postgres::PgRow) -> Result<SmtLeaf, StorageError> {
    let path: Vec<u8> = row.try_get("path").map_err(map_sqlx)?;
    let value: Vec<u8> = row.try_get("value").map_err(map_sqlx)?;
    Ok(SmtLeaf {
        path: path_from_bytes(&path)?,
        value: hash_from_bytes(&value, "leaf value")?,
    })
}

#[async_trait]
impl LeafStore for PgLeafStore {
    async fn put_batch(&self, leaves: &[SmtLeaf]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for leaf in leaves {
            sqlx::query(
                "INSERT INTO smtleaves (path, value) VALUES ($1, $2) \
                 ON CONFLICT (path) DO NOTHING",
            )
            .bind(leaf.path.0.to_vec())
            .bind(leaf.value.imprint())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)
    }

    async fn get_by_paths(&self, paths: &[LeafPath]) -> Result<Vec<SmtLeaf>, StorageError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<Vec<u8>> = paths.iter().map(|p| p.0.to_vec()).collect();
        let rows = sqlx::query("SELECT path, value FROM smtleaves WHERE path = ANY($1)")
            .bind(&keys)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(decode_leaf).collect()
    }

    async fn scan_chunk(
        &self,
        after_sequence: u64,
        limit: u32,
    ) -> Result<LeafChunk, StorageError> {
        let rows = sqlx::query(
            "SELECT path, value, sequence_id FROM smtleaves \
             WHERE sequence_id > $1 ORDER BY sequence_id LIMIT $2",
        )
        .bind(i64_from_u64(after_sequence, "sequence")?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut leaves = Vec::with_capacity(rows.len());
        let mut last_sequence = None;
        for row in &rows {
            leaves.push(decode_leaf(row)?);
            let seq: i64 = row.try_get("sequence_id").map_err(map_sqlx)?;
            last_sequence = Some(u64_from_i64(seq, "sequence_id")?);
        }
        Ok(LeafChunk {
            leaves,
            last_sequence,
        })
    }
}
