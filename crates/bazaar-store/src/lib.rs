//! Persistence boundary for derived marketplace state.
//!
//! The [`Store`] trait is the only surface the indexing engine writes
//! through. [`SqliteStore`] is the production implementation; tests use an
//! in-memory double from the testing crate.

use async_trait::async_trait;

mod models;
mod sqlite;

pub use models::{
    Collection, Order, OrderStatus, Token, TokenAttribute, TransferKind, TransferRecord,
};
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Storage operations over the derived dataset.
///
/// Write operations are idempotent upserts keyed on chain identity so that
/// replaying history converges on the same state.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn upsert_collection(&self, collection: &Collection) -> Result<(), StoreError>;
    async fn collection(&self, address: &str) -> Result<Collection, StoreError>;
    async fn collections(&self) -> Result<Vec<Collection>, StoreError>;

    async fn upsert_token(&self, token: &Token) -> Result<(), StoreError>;
    async fn token(&self, contract: &str, token_id: u64) -> Result<Token, StoreError>;
    async fn tokens_in_collection(&self, contract: &str) -> Result<Vec<Token>, StoreError>;
    /// Updates the owner of a token. A missing token row is not an error;
    /// ownership for untracked tokens is simply dropped.
    async fn update_token_owner(
        &self,
        contract: &str,
        token_id: u64,
        owner: &str,
    ) -> Result<(), StoreError>;

    /// Replaces the full attribute set of a token.
    async fn replace_attributes(
        &self,
        contract: &str,
        token_id: u64,
        attributes: &[TokenAttribute],
    ) -> Result<(), StoreError>;
    async fn attributes(
        &self,
        contract: &str,
        token_id: u64,
    ) -> Result<Vec<TokenAttribute>, StoreError>;

    async fn upsert_orders(&self, orders: &[Order]) -> Result<(), StoreError>;
    async fn order(&self, id: u64) -> Result<Order, StoreError>;
    async fn order_by_nft(&self, contract: &str, token_id: u64) -> Result<Order, StoreError>;
    async fn orders(&self) -> Result<Vec<Order>, StoreError>;
    /// Transitions the status of a stored order. Unknown ids yield
    /// [`StoreError::NotFound`].
    async fn update_order_status(&self, id: u64, status: OrderStatus) -> Result<(), StoreError>;

    async fn append_transfer(&self, record: &TransferRecord) -> Result<(), StoreError>;
    /// Transfer history of one token in ascending block order.
    async fn transfers(
        &self,
        contract: &str,
        token_id: u64,
    ) -> Result<Vec<TransferRecord>, StoreError>;

    /// Clears every derived table except collections, which survive resyncs
    /// so previously discovered contracts are re-bootstrapped.
    async fn clear_derived(&self) -> Result<(), StoreError>;
}
