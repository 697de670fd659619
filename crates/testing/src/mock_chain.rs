//! Scripted [`ContractClient`] and connector doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use bazaar_chain::{ChainError, ClientConnector, ContractClient, ContractRegistry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BASE_TIMESTAMP: u64 = 1_700_000_000;

/// A marketplace order as scripted on the mock chain, in `getOrders` field
/// order.
#[derive(Debug, Clone)]
pub struct OrderFixture {
    pub nft: Address,
    pub token_id: u64,
    pub payment_token: Address,
    pub price: u64,
    pub seller: Address,
    pub status: u8,
}

#[derive(Default)]
struct MockState {
    name: String,
    symbol: String,
    icon_uri: String,
    total_supply: u64,
    token_uris: HashMap<u64, String>,
    owners: HashMap<u64, Address>,
    orders: Vec<OrderFixture>,
    history: Vec<Log>,
    head_block: u64,
    created_at: u64,
    live: Vec<mpsc::Sender<Log>>,
}

/// A scripted contract client. State is set up front through the builder
/// methods; live logs are injected with [`MockContract::emit`].
pub struct MockContract {
    address: Address,
    state: Mutex<MockState>,
}

impl MockContract {
    pub fn new(address: Address) -> Arc<Self> {
        Arc::new(Self {
            address,
            state: Mutex::new(MockState { head_block: 100, ..MockState::default() }),
        })
    }

    pub fn set_collection(&self, name: &str, symbol: &str, icon_uri: &str) {
        let mut state = self.state.lock().unwrap();
        state.name = name.to_string();
        state.symbol = symbol.to_string();
        state.icon_uri = icon_uri.to_string();
    }

    pub fn set_supply(&self, total_supply: u64) {
        self.state.lock().unwrap().total_supply = total_supply;
    }

    pub fn set_token(&self, token_id: u64, uri: &str, owner: Address) {
        let mut state = self.state.lock().unwrap();
        state.token_uris.insert(token_id, uri.to_string());
        state.owners.insert(token_id, owner);
    }

    pub fn set_orders(&self, orders: Vec<OrderFixture>) {
        self.state.lock().unwrap().orders = orders;
    }

    pub fn set_created_at(&self, block: u64) {
        self.state.lock().unwrap().created_at = block;
    }

    pub fn set_head(&self, block: u64) {
        self.state.lock().unwrap().head_block = block;
    }

    pub fn push_history(&self, log: Log) {
        self.state.lock().unwrap().history.push(log);
    }

    pub fn live_subscribers(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// Delivers a log to every live subscriber.
    pub async fn emit(&self, log: Log) {
        let senders: Vec<_> = self.state.lock().unwrap().live.clone();
        for sender in senders {
            let _ = sender.send(log.clone()).await;
        }
    }

    fn uint_arg(method: &str, args: &[DynSolValue]) -> Result<u64, ChainError> {
        match args.first() {
            Some(DynSolValue::Uint(value, _)) => u64::try_from(*value).map_err(|_| {
                ChainError::AbiMismatch {
                    method: method.to_string(),
                    reason: "argument out of range".to_string(),
                }
            }),
            other => Err(ChainError::AbiMismatch {
                method: method.to_string(),
                reason: format!("expected uint argument, got {other:?}"),
            }),
        }
    }
}

fn order_tuple(order: &OrderFixture) -> DynSolValue {
    DynSolValue::Tuple(vec![
        DynSolValue::Address(order.nft),
        DynSolValue::Uint(U256::from(order.token_id), 256),
        DynSolValue::Address(order.payment_token),
        DynSolValue::Uint(U256::from(order.price), 256),
        DynSolValue::Address(order.seller),
        DynSolValue::Uint(U256::from(order.status), 8),
    ])
}

#[async_trait]
impl ContractClient for MockContract {
    fn address(&self) -> Address {
        self.address
    }

    async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, ChainError> {
        let state = self.state.lock().unwrap();
        match method {
            "name" => Ok(vec![DynSolValue::String(state.name.clone())]),
            "symbol" => Ok(vec![DynSolValue::String(state.symbol.clone())]),
            "tokenIconURI" => Ok(vec![DynSolValue::String(state.icon_uri.clone())]),
            "totalSupply" => Ok(vec![DynSolValue::Uint(U256::from(state.total_supply), 256)]),
            "tokenURI" => {
                let token_id = Self::uint_arg(method, args)?;
                let uri = state.token_uris.get(&token_id).ok_or_else(|| {
                    ChainError::AbiMismatch {
                        method: method.to_string(),
                        reason: format!("no token {token_id}"),
                    }
                })?;
                Ok(vec![DynSolValue::String(uri.clone())])
            }
            "ownerOf" => {
                let token_id = Self::uint_arg(method, args)?;
                let owner = state.owners.get(&token_id).ok_or_else(|| {
                    ChainError::AbiMismatch {
                        method: method.to_string(),
                        reason: format!("no token {token_id}"),
                    }
                })?;
                Ok(vec![DynSolValue::Address(*owner)])
            }
            "getOrders" => Ok(vec![DynSolValue::Array(
                state.orders.iter().map(order_tuple).collect(),
            )]),
            other => Err(ChainError::UnknownMethod(other.to_string())),
        }
    }

    async fn logs_in_range(
        &self,
        from_block: u64,
        to_block: u64,
        topic0: Vec<B256>,
    ) -> Result<Vec<Log>, ChainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .history
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or(0);
                let topic_match = topic0.is_empty()
                    || log.topic0().is_some_and(|topic| topic0.contains(topic));
                block >= from_block && block <= to_block && topic_match
            })
            .cloned()
            .collect())
    }

    async fn subscribe_logs(
        &self,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Log>, ChainError> {
        let (tx, rx) = mpsc::channel(64);
        self.state.lock().unwrap().live.push(tx);
        Ok(rx)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, ChainError> {
        Ok(BASE_TIMESTAMP + number)
    }

    async fn head_block(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().head_block)
    }

    async fn has_code_at(&self, number: u64) -> Result<bool, ChainError> {
        Ok(number >= self.state.lock().unwrap().created_at)
    }
}

/// Connector that hands out pre-registered mock contracts.
#[derive(Default)]
pub struct MockConnector {
    contracts: Mutex<HashMap<Address, Arc<MockContract>>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, contract: Arc<MockContract>) {
        self.contracts
            .lock()
            .unwrap()
            .insert(contract.address(), contract);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn registry(self: &Arc<Self>) -> Arc<ContractRegistry> {
        Arc::new(ContractRegistry::new(self.clone()))
    }
}

#[async_trait]
impl ClientConnector for MockConnector {
    async fn connect(&self, address: Address) -> Result<Arc<dyn ContractClient>, ChainError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.contracts
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .map(|contract| contract as Arc<dyn ContractClient>)
            .ok_or(ChainError::NoCode(address))
    }
}
