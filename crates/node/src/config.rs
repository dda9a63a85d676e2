//! Configuration loading: a TOML file under flag/environment overrides.

use anyhow::{Context, Result};
use arx_types::config::NodeConfig;
use clap::Parser;
use std::path::PathBuf;

/// The Arx commitment aggregator node.
#[derive(Debug, Parser)]
#[command(name = "arx-node", version, about)]
pub struct Options {
    /// Path to the TOML configuration file.
    #[arg(long, env = "ARX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides the listen port.
    #[arg(long, env = "ARX_PORT")]
    pub port: Option<u16>,

    /// Overrides the shared database URI.
    #[arg(long, env = "ARX_STORAGE_URI")]
    pub storage_uri: Option<String>,

    /// Overrides the replica identity.
    #[arg(long, env = "ARX_SERVER_ID")]
    pub server_id: Option<String>,

    /// Overrides the anchor signing key (hex secp256k1 secret).
    #[arg(long, env = "ARX_ANCHOR_PRIVATE_KEY", hide_env_values = true)]
    pub anchor_private_key: Option<String>,

    /// Disables leader election; the replica runs standalone as leader.
    #[arg(long, env = "ARX_STANDALONE")]
    pub standalone: bool,
}

impl Options {
    /// Resolves the effective configuration.
    pub fn load(self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
            None => NodeConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(uri) = self.storage_uri {
            config.storage.uri = uri;
        }
        if let Some(server_id) = self.server_id {
            config.server_id = server_id;
        }
        if let Some(key) = self.anchor_private_key {
            config.anchor.private_key = Some(key);
        }
        if self.standalone {
            config.high_availability.enabled = false;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        Options {
            config: None,
            port: None,
            storage_uri: None,
            server_id: None,
            anchor_private_key: None,
            standalone: false,
        }
    }

    #[test]
    fn file_values_survive_and_flags_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arx.toml");
        std::fs::write(
            &path,
            r#"
port = 8545
chain_id = 7

[storage]
uri = "postgres://db.internal:5432/arx"

[high_availability]
lock_ttl_seconds = 45
"#,
        )
        .unwrap();

        let config = Options {
            config: Some(path),
            port: Some(9000),
            standalone: true,
            ..options()
        }
        .load()
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.chain_id, 7);
        assert_eq!(config.storage.uri, "postgres://db.internal:5432/arx");
        assert_eq!(config.high_availability.lock_ttl_seconds, 45);
        assert!(!config.high_availability.enabled);
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let config = options().load().unwrap();
        assert_eq!(config.chain_id, 1);
        assert!(config.high_availability.enabled);
    }
}
