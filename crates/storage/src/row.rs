//! Row decoding helpers shared by the stores.

use arx_types::commitment::{Authenticator, LeafPath, RequestId};
use arx_types::error::StorageError;
use arx_types::hash::DataHash;
use sqlx::postgres::PgRow;
use sqlx::Row;

pub(crate) fn hash_from_bytes(bytes: &[u8], what: &str) -> Result<DataHash, StorageError> {
    DataHash::from_imprint(bytes).map_err(|e| StorageError::Decode(format!("{what}: {e}")))
}

pub(crate) fn path_from_bytes(bytes: &[u8]) -> Result<LeafPath, StorageError> {
    LeafPath::from_slice(bytes)
        .ok_or_else(|| StorageError::Decode(format!("path must be 32 bytes, got {}", bytes.len())))
}

pub(crate) fn u64_from_i64(value: i64, what: &str) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::Decode(format!("{what} is negative: {value}")))
}

pub(crate) fn i64_from_u64(value: u64, what: &str) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::Encode(format!("{what} overflows: {value}")))
}

/// Decodes the shared `(request_id, transaction_hash, authenticator)`
/// column group used by both the record store and the pending queue.
pub(crate) fn commitment_columns(
    row: &PgRow,
) -> Result<(RequestId, DataHash, Authenticator), StorageError> {
    let request_id: Vec<u8> = row.try_get("request_id").map_err(crate::map_sqlx)?;
    let transaction_hash: Vec<u8> = row.try_get("transaction_hash").map_err(crate::map_sqlx)?;
    let algorithm: String = row.try_get("algorithm").map_err(crate::map_sqlx)?;
    let public_key: Vec<u8> = row.try_get("public_key").map_err(crate::map_sqlx)?;
    let signature: Vec<u8> = row.try_get("signature").map_err(crate::map_sqlx)?;
    let state_hash: Vec<u8> = row.try_get("state_hash").map_err(crate::map_sqlx)?;

    Ok((
        RequestId(hash_from_bytes(&request_id, "request_id")?),
        hash_from_bytes(&transaction_hash, "transaction_hash")?,
        Authenticator {
            algorithm,
            public_key,
            signature,
            state_hash: hash_from_bytes(&state_hash, "state_hash")?,
        },
    ))
}
