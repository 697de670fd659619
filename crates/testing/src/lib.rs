//! Test doubles for the bazaar indexer: an in-memory store, scripted
//! contract clients, a canned metadata source, and raw log fixtures.

mod fixtures;
mod memory_store;
mod mock_chain;
mod static_metadata;

pub use fixtures::{
    collection_deployed_log, metadata_update_log, order_cancelled_log, order_created_log,
    order_fulfilled_log, transfer_log,
};
pub use memory_store::MemoryStore;
pub use mock_chain::{MockConnector, MockContract, OrderFixture};
pub use static_metadata::{document, StaticMetadata};
