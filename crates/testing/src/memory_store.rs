//! In-memory [`Store`] double backed by plain maps.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bazaar_store::{
    Collection, Order, OrderStatus, Store, StoreError, Token, TokenAttribute, TransferRecord,
};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    collections: BTreeMap<String, Collection>,
    tokens: BTreeMap<(String, u64), Token>,
    attributes: BTreeMap<(String, u64), Vec<TokenAttribute>>,
    orders: BTreeMap<u64, Order>,
    transfers: Vec<TransferRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_collection(&self, collection: &Collection) -> Result<(), StoreError> {
        self.lock()
            .collections
            .insert(collection.address.clone(), collection.clone());
        Ok(())
    }

    async fn collection(&self, address: &str) -> Result<Collection, StoreError> {
        self.lock()
            .collections
            .get(address)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn collections(&self) -> Result<Vec<Collection>, StoreError> {
        Ok(self.lock().collections.values().cloned().collect())
    }

    async fn upsert_token(&self, token: &Token) -> Result<(), StoreError> {
        self.lock()
            .tokens
            .insert((token.contract.clone(), token.token_id), token.clone());
        Ok(())
    }

    async fn token(&self, contract: &str, token_id: u64) -> Result<Token, StoreError> {
        self.lock()
            .tokens
            .get(&(contract.to_string(), token_id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn tokens_in_collection(&self, contract: &str) -> Result<Vec<Token>, StoreError> {
        Ok(self
            .lock()
            .tokens
            .values()
            .filter(|token| token.contract == contract)
            .cloned()
            .collect())
    }

    async fn update_token_owner(
        &self,
        contract: &str,
        token_id: u64,
        owner: &str,
    ) -> Result<(), StoreError> {
        if let Some(token) = self.lock().tokens.get_mut(&(contract.to_string(), token_id)) {
            token.owner = owner.to_string();
        }
        Ok(())
    }

    async fn replace_attributes(
        &self,
        contract: &str,
        token_id: u64,
        attributes: &[TokenAttribute],
    ) -> Result<(), StoreError> {
        self.lock()
            .attributes
            .insert((contract.to_string(), token_id), attributes.to_vec());
        Ok(())
    }

    async fn attributes(
        &self,
        contract: &str,
        token_id: u64,
    ) -> Result<Vec<TokenAttribute>, StoreError> {
        Ok(self
            .lock()
            .attributes
            .get(&(contract.to_string(), token_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_orders(&self, orders: &[Order]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for order in orders {
            inner.orders.insert(order.id, order.clone());
        }
        Ok(())
    }

    async fn order(&self, id: u64) -> Result<Order, StoreError> {
        self.lock().orders.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn order_by_nft(&self, contract: &str, token_id: u64) -> Result<Order, StoreError> {
        self.lock()
            .orders
            .values()
            .rev()
            .find(|order| order.nft_contract == contract && order.token_id == token_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn orders(&self) -> Result<Vec<Order>, StoreError> {
        Ok(self.lock().orders.values().cloned().collect())
    }

    async fn update_order_status(&self, id: u64, status: OrderStatus) -> Result<(), StoreError> {
        match self.lock().orders.get_mut(&id) {
            Some(order) => {
                order.status = status;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn append_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        self.lock().transfers.push(record.clone());
        Ok(())
    }

    async fn transfers(
        &self,
        contract: &str,
        token_id: u64,
    ) -> Result<Vec<TransferRecord>, StoreError> {
        let mut history: Vec<TransferRecord> = self
            .lock()
            .transfers
            .iter()
            .filter(|record| record.contract == contract && record.token_id == token_id)
            .cloned()
            .collect();
        history.sort_by_key(|record| record.block_number);
        Ok(history)
    }

    async fn clear_derived(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.tokens.clear();
        inner.attributes.clear();
        inner.orders.clear();
        inner.transfers.clear();
        Ok(())
    }
}
