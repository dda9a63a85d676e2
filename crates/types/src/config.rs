//! Node configuration.
//!
//! Loaded from a TOML file and overridable from the environment and flags
//! by the node binary. Every field has the deployment default, so an empty
//! file is a valid single-node configuration (aside from the anchor key
//! when the HTTP anchor or signed receipts are in use).

use crate::error::ConfigError;
use crate::hash::DataHash;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hex imprint of the hash chained into block 1.
pub const DEFAULT_INITIAL_BLOCK_HASH: &str =
    "0000185fa2e1c40bd37e98a1f4c25d6b08e3517f92ac0de46b8735c1da9e0f241969";

fn default_chain_id() -> u64 {
    1
}
fn default_version() -> u64 {
    1
}
fn default_fork_id() -> u64 {
    1
}
fn default_initial_block_hash() -> String {
    DEFAULT_INITIAL_BLOCK_HASH.to_string()
}
fn default_port() -> u16 {
    80
}
fn default_concurrency_limit() -> usize {
    100
}
fn default_block_creation_wait_time_ms() -> u64 {
    10_000
}
fn default_server_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{host}-{}", std::process::id())
}
fn default_true() -> bool {
    true
}
fn default_lock_ttl_seconds() -> u64 {
    30
}
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}
fn default_election_polling_interval_ms() -> u64 {
    5_000
}
fn default_storage_uri() -> String {
    "postgres://localhost:5432/arx".to_string()
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct NodeConfig {
    pub chain_id: u64,
    pub version: u64,
    pub fork_id: u64,
    /// Hex imprint chained as `previousBlockHash` of block 1.
    pub initial_block_hash: String,
    pub port: u16,
    /// Recognized but unsupported: TLS terminates at the fronting proxy.
    pub ssl_cert_path: Option<PathBuf>,
    pub ssl_key_path: Option<PathBuf>,
    /// Maximum concurrently admitted requests; excess is shed with 503.
    pub concurrency_limit: usize,
    /// Stable identity of this replica; defaults to `<host>-<pid>`.
    pub server_id: String,
    /// How long shutdown waits for an in-flight round, milliseconds.
    pub block_creation_wait_time_ms: u64,
    pub anchor: AnchorConfig,
    pub high_availability: HighAvailabilityConfig,
    pub storage: StorageConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            version: default_version(),
            fork_id: default_fork_id(),
            initial_block_hash: default_initial_block_hash(),
            port: default_port(),
            ssl_cert_path: None,
            ssl_key_path: None,
            concurrency_limit: default_concurrency_limit(),
            server_id: default_server_id(),
            block_creation_wait_time_ms: default_block_creation_wait_time_ms(),
            anchor: AnchorConfig::default(),
            high_availability: HighAvailabilityConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Validates cross-field constraints and decodes the initial block
    /// hash.
    pub fn validate(&self) -> Result<DataHash, ConfigError> {
        if self.ssl_cert_path.is_some() || self.ssl_key_path.is_some() {
            return Err(ConfigError::Invalid(
                "ssl_cert_path/ssl_key_path are not supported; terminate TLS at the proxy".into(),
            ));
        }
        if self.high_availability.enabled {
            let ttl_ms = self.high_availability.lock_ttl_seconds * 1000;
            if self.high_availability.heartbeat_interval_ms * 2 >= ttl_ms {
                return Err(ConfigError::Invalid(format!(
                    "heartbeat_interval_ms ({}) must be below half of lock_ttl ({} ms)",
                    self.high_availability.heartbeat_interval_ms, ttl_ms
                )));
            }
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid("concurrency_limit must be positive".into()));
        }
        DataHash::from_hex_imprint(&self.initial_block_hash)
            .map_err(|e| ConfigError::Invalid(format!("initial_block_hash: {e}")))
    }
}

/// Trust-anchor connectivity. With no `token_partition_url` the node runs
/// against the in-process mock anchor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AnchorConfig {
    /// Hex secp256k1 secret key; signs anchor submissions and receipts.
    pub private_key: Option<String>,
    pub token_partition_url: Option<String>,
    pub token_partition_id: Option<u64>,
    pub network_id: Option<String>,
}

/// Leader-election tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HighAvailabilityConfig {
    pub enabled: bool,
    pub lock_ttl_seconds: u64,
    pub heartbeat_interval_ms: u64,
    pub election_polling_interval_ms: u64,
}

impl Default for HighAvailabilityConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            election_polling_interval_ms: default_election_polling_interval_ms(),
        }
    }
}

/// Shared-database connectivity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StorageConfig {
    pub uri: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uri: default_storage_uri(),
        }
    }
}
