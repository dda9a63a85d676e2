#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]

//! # Arx storage
//!
//! PostgreSQL implementations of the `arx-api` store contracts. One shared
//! database serves every replica; all conditional writes (queue drain,
//! block append, lease operations) lean on the database for atomicity so
//! replica races resolve server-side.

/// The transactional block + block-records store.
pub mod blocks;
/// Durable change-feed positions.
pub mod cursor;
/// The block-records change feed tail.
pub mod feed;
/// The SMT leaf store with insertion-sequence replay.
pub mod leaves;
/// The leadership lease row.
pub mod lease;
/// The pending commitment queue.
pub mod queue;
/// The aggregator record store.
pub mod records;
mod row;

pub use blocks::PgBlockStore;
pub use cursor::PgCursorStore;
pub use feed::PgChangeFeed;
pub use lease::PgLeaseStore;
pub use leaves::PgLeafStore;
pub use queue::PgPendingQueue;
pub use records::PgRecordStore;

use arx_types::error::StorageError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// The NOTIFY channel pulsed after every block-records append.
pub const FEED_CHANNEL: &str = "blockrecords_appended";

pub(crate) fn map_sqlx(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            StorageError::Conflict(db.to_string())
        }
        _ => StorageError::Backend(err.to_string()),
    }
}

/// A connected database with constructors for every store.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects and runs pending migrations.
    pub async fn connect(uri: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(uri)
            .await
            .map_err(map_sqlx)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        tracing::info!(target: "storage", "database connected, migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn records(&self) -> PgRecordStore {
        PgRecordStore::new(self.pool.clone())
    }

    pub fn queue(&self) -> PgPendingQueue {
        PgPendingQueue::new(self.pool.clone())
    }

    pub fn blocks(&self) -> PgBlockStore {
        PgBlockStore::new(self.pool.clone())
    }

    pub fn leaves(&self) -> PgLeafStore {
        PgLeafStore::new(self.pool.clone())
    }

    pub fn lease(&self) -> PgLeaseStore {
        PgLeaseStore::new(self.pool.clone())
    }

    pub fn cursors(&self) -> PgCursorStore {
        PgCursorStore::new(self.pool.clone())
    }

    pub fn feed(&self) -> PgChangeFeed {
        PgChangeFeed::new(self.pool.clone())
    }
}
