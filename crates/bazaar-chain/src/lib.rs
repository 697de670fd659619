//! Ledger access for the bazaar indexer: per-contract clients, the shared
//! client registry, and historical log scanning.

mod client;
mod registry;
mod scan;

pub use client::{ChainError, ContractClient, RpcClient};
pub use registry::{ClientConnector, ContractRegistry, RpcConnector};
pub use scan::{creation_block, replay_range};
