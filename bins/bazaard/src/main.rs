//! bazaard, the NFT marketplace indexer daemon.
//!
//! Bootstraps the SQLite replica from chain history, then follows live
//! events until interrupted.

use std::fs;
use std::sync::Arc;

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use bazaar::{BazaarConfig, HttpMetadataFetcher, Indexer, Service};
use bazaar_chain::{ContractRegistry, RpcClient, RpcConnector};
use bazaar_store::SqliteStore;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bazaard", about = "NFT marketplace chain indexer")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "bazaar.toml")]
    config: String,
}

/// Accepts both compiler artifacts (`{"abi": [...]}`) and bare ABI arrays.
fn load_abi(path: &str) -> Result<Arc<JsonAbi>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading ABI artifact {path}"))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing ABI artifact {path}"))?;
    let abi_value = value.get("abi").cloned().unwrap_or(value);
    let abi: JsonAbi = serde_json::from_value(abi_value)
        .with_context(|| format!("decoding ABI from {path}"))?;
    Ok(Arc::new(abi))
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config = BazaarConfig::new(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    let nft_abi = load_abi(&config.nft_abi_path)?;
    let market_abi = load_abi(&config.market_abi_path)?;
    let market_address: Address = config
        .market_address
        .parse()
        .context("invalid market address")?;

    let registry = Arc::new(ContractRegistry::new(Arc::new(RpcConnector::new(
        config.rpc_url.clone(),
        nft_abi,
    ))));
    let market = Arc::new(
        RpcClient::connect(&config.rpc_url, market_address, market_abi)
            .await
            .context("connecting to the marketplace contract")?,
    );
    let metadata = Arc::new(HttpMetadataFetcher::with_gateway(config.ipfs_gateway.clone()));

    let cancel = CancellationToken::new();
    let indexer = Indexer::new(store, registry, market, metadata, cancel);
    let service = Service::start(indexer).await?;
    tracing::info!(market = %market_address, "indexing");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    service.stop().await;
    Ok(())
}
