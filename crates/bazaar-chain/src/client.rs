//! Read-only access to a single deployed contract.
//!
//! [`ContractClient`] is the seam between the indexing engine and the ledger:
//! the production implementation speaks JSON-RPC through alloy, tests swap in
//! scripted clients.

use std::sync::Arc;

use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::json_abi::JsonAbi;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::transports::TransportError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const LIVE_LOG_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(#[from] TransportError),
    #[error("method `{0}` not present in the contract interface")]
    UnknownMethod(String),
    #[error("abi mismatch calling `{method}`: {reason}")]
    AbiMismatch { method: String, reason: String },
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("no code deployed at {0}")]
    NoCode(Address),
}

/// Read-only view of one deployed contract.
#[async_trait]
pub trait ContractClient: Send + Sync {
    /// Address of the contract this client is bound to.
    fn address(&self) -> Address;

    /// Calls a read-only method by name and returns the decoded outputs.
    async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, ChainError>;

    /// Fetches logs emitted by this contract in the inclusive block range,
    /// optionally restricted to a set of topic0 signatures.
    async fn logs_in_range(
        &self,
        from_block: u64,
        to_block: u64,
        topic0: Vec<B256>,
    ) -> Result<Vec<Log>, ChainError>;

    /// Subscribes to live logs emitted by this contract. The forwarder task
    /// stops when `cancel` fires or the transport drops the subscription.
    async fn subscribe_logs(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Log>, ChainError>;

    /// Timestamp of the given block.
    async fn block_timestamp(&self, number: u64) -> Result<u64, ChainError>;

    /// Current chain head number.
    async fn head_block(&self) -> Result<u64, ChainError>;

    /// Whether the contract has code at the given block.
    async fn has_code_at(&self, number: u64) -> Result<bool, ChainError>;
}

/// JSON-RPC backed [`ContractClient`].
pub struct RpcClient {
    provider: DynProvider,
    address: Address,
    abi: Arc<JsonAbi>,
}

impl RpcClient {
    /// Dials `endpoint` and binds the client to `address` with the given
    /// interface description. Live subscriptions need a pubsub endpoint
    /// (`ws://` or `wss://`).
    pub async fn connect(
        endpoint: &str,
        address: Address,
        abi: Arc<JsonAbi>,
    ) -> Result<Self, ChainError> {
        let provider = ProviderBuilder::new().connect(endpoint).await?.erased();
        Ok(Self { provider, address, abi })
    }

    pub fn new(provider: DynProvider, address: Address, abi: Arc<JsonAbi>) -> Self {
        Self { provider, address, abi }
    }

    fn mismatch(method: &str, reason: impl ToString) -> ChainError {
        ChainError::AbiMismatch { method: method.to_string(), reason: reason.to_string() }
    }
}

#[async_trait]
impl ContractClient for RpcClient {
    fn address(&self) -> Address {
        self.address
    }

    async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, ChainError> {
        let function = self
            .abi
            .functions
            .get(method)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| ChainError::UnknownMethod(method.to_string()))?;
        let input = function
            .abi_encode_input(args)
            .map_err(|err| Self::mismatch(method, err))?;
        let request = TransactionRequest::default()
            .with_to(self.address)
            .with_input(input);
        let output = self.provider.call(request).await?;
        function
            .abi_decode_output(&output)
            .map_err(|err| Self::mismatch(method, err))
    }

    async fn logs_in_range(
        &self,
        from_block: u64,
        to_block: u64,
        topic0: Vec<B256>,
    ) -> Result<Vec<Log>, ChainError> {
        let mut filter = Filter::new()
            .select(from_block..=to_block)
            .address(self.address);
        if !topic0.is_empty() {
            filter = filter.event_signature(topic0);
        }
        let mut logs = self.provider.get_logs(&filter).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn subscribe_logs(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Log>, ChainError> {
        let filter = Filter::new().address(self.address);
        let mut subscription = self.provider.subscribe_logs(&filter).await?;
        let (tx, rx) = mpsc::channel(LIVE_LOG_BUFFER);
        let address = self.address;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = subscription.recv() => match next {
                        Ok(log) => {
                            if tx.send(log).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                target: "bazaar_chain::client",
                                contract = %address,
                                error = %err,
                                "log subscription lost"
                            );
                            break;
                        }
                    },
                }
            }
        });
        Ok(rx)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, ChainError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?;
        block
            .map(|block| block.header.timestamp)
            .ok_or(ChainError::BlockNotFound(number))
    }

    async fn head_block(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn has_code_at(&self, number: u64) -> Result<bool, ChainError> {
        let code = self
            .provider
            .get_code_at(self.address)
            .block_id(BlockId::number(number))
            .await?;
        Ok(!code.is_empty())
    }
}
