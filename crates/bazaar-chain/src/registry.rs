//! Address-keyed cache of contract clients.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::client::{ChainError, ContractClient, RpcClient};

/// Produces a client for a contract address. The registry owns exactly one
/// connector and caches the clients it returns.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, address: Address) -> Result<Arc<dyn ContractClient>, ChainError>;
}

/// Dials the configured RPC endpoint and binds a shared interface
/// description to each address.
pub struct RpcConnector {
    endpoint: String,
    abi: Arc<JsonAbi>,
}

impl RpcConnector {
    pub fn new(endpoint: impl Into<String>, abi: Arc<JsonAbi>) -> Self {
        Self { endpoint: endpoint.into(), abi }
    }
}

#[async_trait]
impl ClientConnector for RpcConnector {
    async fn connect(&self, address: Address) -> Result<Arc<dyn ContractClient>, ChainError> {
        let client = RpcClient::connect(&self.endpoint, address, self.abi.clone()).await?;
        Ok(Arc::new(client))
    }
}

/// Shared cache of contract clients, one per address.
pub struct ContractRegistry {
    connector: Arc<dyn ClientConnector>,
    clients: RwLock<HashMap<Address, Arc<dyn ContractClient>>>,
}

impl ContractRegistry {
    pub fn new(connector: Arc<dyn ClientConnector>) -> Self {
        Self { connector, clients: RwLock::new(HashMap::new()) }
    }

    /// Returns the cached client for `address`, connecting on first use.
    ///
    /// Concurrent misses may dial twice; exactly one client wins the cache
    /// slot and every caller gets that winner.
    pub async fn resolve(&self, address: Address) -> Result<Arc<dyn ContractClient>, ChainError> {
        if let Some(client) = self.clients.read().await.get(&address) {
            return Ok(client.clone());
        }
        let fresh = self.connector.connect(address).await?;
        let mut clients = self.clients.write().await;
        Ok(clients.entry(address).or_insert(fresh).clone())
    }

    /// Returns the cached client without connecting.
    pub async fn cached(&self, address: Address) -> Option<Arc<dyn ContractClient>> {
        self.clients.read().await.get(&address).cloned()
    }
}
