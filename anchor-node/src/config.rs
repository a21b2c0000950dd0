//! TOML configuration, following the shape of spec.md §6 "Configuration
//! (recognized options)". Loading mirrors the teacher's
//! `demo_stf::runner_config::from_toml_path`: read the whole file, then
//! `toml::from_str` into a typed struct — no partial/streaming parse.

use std::fs;
use std::path::Path;

use anchor_core::{
    DEFAULT_BATCH_INTERVAL_MS, DEFAULT_CHECKPOINT_INTERVAL_MS, DEFAULT_CONCURRENCY,
    DEFAULT_CONFIRMATION_BLOCKS, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_CALLDATA_SIZE, DEFAULT_REGION,
    MAX_RETRIES,
};
use anyhow::Context;
use serde::Deserialize;

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_batch_interval_ms() -> u64 {
    DEFAULT_BATCH_INTERVAL_MS
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_max_calldata_size() -> usize {
    DEFAULT_MAX_CALLDATA_SIZE
}

fn default_checkpoint_interval_ms() -> u64 {
    DEFAULT_CHECKPOINT_INTERVAL_MS
}

fn default_confirmation_blocks() -> u64 {
    DEFAULT_CONFIRMATION_BLOCKS
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: std::path::PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerConfig {
    pub redis_url: String,
    #[serde(default)]
    pub fallback_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    /// Key name the signer's private key is stored under in the Secret
    /// Manager (spec.md §4.J: "All signing uses the Secret Manager").
    pub key_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequencerConfigToml {
    pub rpc_url: String,
    pub anchor_registry_address: String,
    pub signer: SignerConfig,
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaConfigToml {
    pub target_address: String,
    #[serde(default)]
    pub enable_blob_storage: bool,
    #[serde(default = "default_max_calldata_size")]
    pub max_calldata_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfigToml {
    pub rpc_url: String,
    pub checkpoint_registry_address: String,
    pub signer: SignerConfig,
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfigToml {
    pub source_rpc_url: String,
    pub target_rpc_url: String,
    pub bridge_contract: String,
    pub source_signer: SignerConfig,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorPoolConfigToml {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Root of the operator's TOML file, passed as `start`'s config argument.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_region")]
    pub region: String,
    pub storage: StorageConfig,
    pub explorer: ExplorerConfig,
    pub sequencer: SequencerConfigToml,
    pub da: DaConfigToml,
    pub checkpoint: CheckpointConfigToml,
    pub bridge: BridgeConfigToml,
    #[serde(default)]
    pub anchor_pool: AnchorPoolConfigToml,
}

impl Default for AnchorPoolConfigToml {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: MAX_RETRIES,
        }
    }
}

/// Reads and parses `path` as TOML into `NodeConfig`.
pub fn from_toml_path(path: impl AsRef<Path>) -> anyhow::Result<NodeConfig> {
    let contents = fs::read_to_string(path.as_ref())
        .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {}", path.as_ref().display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let toml = r#"
            region = "us"

            [storage]
            path = "/tmp/anchor-data"

            [explorer]
            redis_url = "redis://127.0.0.1/"

            [sequencer]
            rpc_url = "http://127.0.0.1:8545"
            anchor_registry_address = "0x0000000000000000000000000000000000000001"
            [sequencer.signer]
            key_name = "sequencer"

            [da]
            target_address = "0x0000000000000000000000000000000000000002"

            [checkpoint]
            rpc_url = "http://127.0.0.1:8546"
            checkpoint_registry_address = "0x0000000000000000000000000000000000000003"
            [checkpoint.signer]
            key_name = "checkpoint"

            [bridge]
            source_rpc_url = "http://127.0.0.1:8545"
            target_rpc_url = "http://127.0.0.1:8547"
            bridge_contract = "0x0000000000000000000000000000000000000004"
            [bridge.source_signer]
            key_name = "bridge"
        "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, toml.as_bytes()).unwrap();

        let config = from_toml_path(file.path()).unwrap();
        assert_eq!(config.region, "us");
        assert_eq!(config.sequencer.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.anchor_pool.concurrency, DEFAULT_CONCURRENCY);
        assert!(!config.da.enable_blob_storage);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = from_toml_path("/nonexistent/anchor-node.toml");
        assert!(result.is_err());
    }
}
