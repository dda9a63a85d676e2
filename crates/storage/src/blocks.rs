//! Blocks and per-block record lists, appended in one transaction.

use crate::row::{hash_from_bytes, i64_from_u64, u64_from_i64};
use crate::{map_sqlx, FEED_CHANNEL};
use arx_api::store::BlockStore;
use arx_types::block::{Block, BlockQuery, BlockRecords};
use arx_types::commitment::RequestId;
use arx_types::error::StorageError;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

pub struct PgBlockStore {
    pool: PgPool,
}

impl PgBlockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_BLOCK: &str = "SELECT block_number, chain_id, version, fork_id, timestamp_ms, \
    anchor_proof, previous_block_hash, root_hash, no_deletion_proof_hash FROM blocks";

fn decode_block(row: &sqlx::postgres::PgRow) -> Result<Block, StorageError> {
    let block_number: i64 = row.try_get("block_number").map_err(map_sqlx)?;
    let chain_id: i64 = row.try_get("chain_id").map_err(map_sqlx)?;
    let version: i64 = row.try_get("version").map_err(map_sqlx)?;
    let fork_id: i64 = row.try_get("fork_id").map_err(map_sqlx)?;
    let timestamp_ms: i64 = row.try_get("timestamp_ms").map_err(map_sqlx)?;
    let anchor_proof: Vec<u8> = row.try_get("anchor_proof").map_err(map_sqlx)?;
    let previous: Vec<u8> = row.try_get("previous_block_hash").map_err(map_sqlx)?;
    let root: Vec<u8> = row.try_get("root_hash").map_err(map_sqlx)?;
    let no_deletion: Option<Vec<u8>> = row.try_get("no_deletion_proof_hash").map_err(map_sqlx)?;

    Ok(Block {
        index: u64_from_i64(block_number, "block_number")?,
        chain_id: u64_from_i64(chain_id, "chain_id")?,
        version: u64_from_i64(version, "version")?,
        fork_id: u64_from_i64(fork_id, "fork_id")?,
        timestamp: u64_from_i64(timestamp_ms, "timestamp_ms")?,
        anchor_proof,
        previous_block_hash: hash_from_bytes(&previous, "previous_block_hash")?,
        root_hash: hash_from_bytes(&root, "root_hash")?,
        no_deletion_proof_hash: no_deletion
            .as_deref()
            .map(|b| hash_from_bytes(b, "no_deletion_proof_hash"))
            .transpose()?,
    })
}

#[async_trait]
impl BlockStore for PgBlockStore {
    async fn next_block_number(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COALESCE(MAX(block_number), 0) + 1 AS next FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let next: i64 = row.try_get("next").map_err(map_sqlx)?;
        u64_from_i64(next, "next block number")
    }

    async fn append(&self, block: &Block, records: &BlockRecords) -> Result<(), StorageError> {
        if block.index != records.block_number {
            return Err(StorageError::Conflict(format!(
                "block {} carries records for block {}",
                block.index, records.block_number
            )));
        }
        let index = i64_from_u64(block.index, "block_number")?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        // The index must still be the next one at commit time; the primary
        // key turns concurrent-writer races into a Conflict for the loser.
        let row = sqlx::query("SELECT COALESCE(MAX(block_number), 0) + 1 AS next FROM blocks")
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let next: i64 = row.try_get("next").map_err(map_sqlx)?;
        if next != index {
            return Err(StorageError::Conflict(format!(
                "block {} is not the next block (expected {next})",
                block.index
            )));
        }

        sqlx::query(
            "INSERT INTO blocks (block_number, chain_id, version, fork_id, timestamp_ms, \
             anchor_proof, previous_block_hash, root_hash, no_deletion_proof_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(index)
        .bind(i64_from_u64(block.chain_id, "chain_id")?)
        .bind(i64_from_u64(block.version, "version")?)
        .bind(i64_from_u64(block.fork_id, "fork_id")?)
        .bind(i64_from_u64(block.timestamp, "timestamp_ms")?)
        .bind(&block.anchor_proof)
        .bind(block.previous_block_hash.imprint())
        .bind(block.root_hash.imprint())
        .bind(block.no_deletion_proof_hash.as_ref().map(|h| h.imprint()))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let ids: Vec<Vec<u8>> = records.request_ids.iter().map(|id| id.0.imprint()).collect();
        sqlx::query("INSERT INTO blockrecords (block_number, request_ids) VALUES ($1, $2)")
            .bind(index)
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(FEED_CHANNEL)
            .bind(index.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)
    }

    async fn get(&self, query: BlockQuery) -> Result<Option<Block>, StorageError> {
        let row = match query {
            BlockQuery::Number(n) => {
                sqlx::query(&format!("{SELECT_BLOCK} WHERE block_number = $1"))
                    .bind(i64_from_u64(n, "block_number")?)
                    .fetch_optional(&self.pool)
                    .await
            }
            BlockQuery::Latest => {
                sqlx::query(&format!("{SELECT_BLOCK} ORDER BY block_number DESC LIMIT 1"))
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx)?;
        row.as_ref().map(decode_block).transpose()
    }

    async fn get_records(&self, block_number: u64) -> Result<Option<BlockRecords>, StorageError> {
        let row = sqlx::query("SELECT request_ids FROM blockrecords WHERE block_number = $1")
            .bind(i64_from_u64(block_number, "block_number")?)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: Vec<Vec<u8>> = row.try_get("request_ids").map_err(map_sqlx)?;
        let request_ids = raw
            .iter()
            .map(|bytes| hash_from_bytes(bytes, "request_id").map(RequestId))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(BlockRecords {
            block_number,
            request_ids,
        }))
    }
}
