//! Core engine for the bazaar NFT marketplace indexer.
//!
//! Maintains a queryable replica of on-chain marketplace state (collections,
//! tokens, metadata, orders, transfer history) by combining a historical
//! backfill from contract creation with live event subscriptions. The
//! replica is eventually consistent: every write path is an idempotent
//! reconciliation, so replaying history converges on the same dataset.

use std::path::Path;

use config::{Config, File};
use serde::Deserialize;

pub mod contract;
pub mod decoder;
mod error;
mod indexer;
pub mod metadata;
mod runtime;

pub use decoder::{decode_log, ChainEvent, DecodeError};
pub use error::{Error, Result};
pub use indexer::Indexer;
pub use metadata::{HttpMetadataFetcher, MetadataError, MetadataSource, TokenDocument};
pub use runtime::Service;

/// Service configuration, usually loaded from a `bazaar.toml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct BazaarConfig {
    /// Ledger RPC endpoint. Must be a pubsub endpoint (`ws://` or `wss://`)
    /// for live subscriptions to work.
    pub rpc_url: String,
    /// Address of the marketplace contract.
    pub market_address: String,
    /// SQLite database URL.
    pub database_url: String,
    /// Path to the collection contract ABI artifact.
    pub nft_abi_path: String,
    /// Path to the marketplace contract ABI artifact.
    pub market_abi_path: String,
    /// Gateway used to resolve content-addressed metadata URIs.
    #[serde(default = "default_ipfs_gateway")]
    pub ipfs_gateway: String,
}

fn default_ipfs_gateway() -> String {
    metadata::DEFAULT_IPFS_GATEWAY.to_string()
}

impl BazaarConfig {
    /// Loads the configuration from a file.
    pub fn new(config_path: &str) -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(File::from(Path::new(config_path)))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
