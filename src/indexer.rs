//! The reconciliation engine.
//!
//! Applies decoded ledger events and fetched metadata to the derived
//! collection/token/order/history dataset. Every write path is idempotent,
//! so historical replay and the live feed converge on the same state no
//! matter how often events repeat.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use bazaar_chain::{self as chain, ContractClient, ContractRegistry};
use bazaar_store::{
    Collection, Order, OrderStatus, Store, StoreError, Token, TokenAttribute, TransferKind,
    TransferRecord,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::contract;
use crate::decoder::{decode_log, ChainEvent, TRANSFER_TOPIC};
use crate::error::{Error, Result};
use crate::metadata::MetadataSource;

/// Lowercase hex key used for every stored address.
fn addr_key(address: Address) -> String {
    format!("{address:#x}")
}

fn token_id_u64(value: U256) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::TokenIdRange(value))
}

#[derive(Default)]
struct WatcherSet {
    started: HashSet<Address>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Indexer<S: Store> {
    store: Arc<S>,
    registry: Arc<ContractRegistry>,
    market: Arc<dyn ContractClient>,
    metadata: Arc<dyn MetadataSource>,
    cancel: CancellationToken,
    watchers: Mutex<WatcherSet>,
    weak: Weak<Self>,
}

impl<S: Store> Indexer<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<ContractRegistry>,
        market: Arc<dyn ContractClient>,
        metadata: Arc<dyn MetadataSource>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            registry,
            market,
            metadata,
            cancel,
            watchers: Mutex::new(WatcherSet::default()),
            weak: weak.clone(),
        })
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Rebuilds the derived dataset from the marketplace's authoritative
    /// order book.
    ///
    /// Everything except collection rows is cleared, the full order list is
    /// re-inserted with stored ids assigned from list position, and each
    /// referenced collection is bootstrapped. Clearing or re-inserting
    /// failures are fatal; a single collection failing to bootstrap is not.
    pub async fn resync_orders(&self) -> Result<()> {
        self.store.clear_derived().await?;

        let chain_orders = contract::orders(self.market.as_ref()).await?;
        let mut rows = Vec::with_capacity(chain_orders.len());
        let mut contracts: HashSet<Address> = HashSet::new();
        for (position, order) in chain_orders.iter().enumerate() {
            let token_id = match token_id_u64(order.token_id) {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(
                        target: "bazaar::indexer",
                        contract = %order.nft,
                        error = %err,
                        "skipping order with out-of-range token id"
                    );
                    continue;
                }
            };
            contracts.insert(order.nft);
            rows.push(Order {
                // Stored ids are the on-chain position plus one.
                id: position as u64 + 1,
                nft_contract: addr_key(order.nft),
                token_id,
                payment_token: addr_key(order.payment_token),
                price: order.price.to_string(),
                seller: addr_key(order.seller),
                status: OrderStatus::from_u8(order.status).unwrap_or(OrderStatus::Open),
            });
        }
        self.store.upsert_orders(&rows).await?;
        tracing::info!(target: "bazaar::indexer", orders = rows.len(), "order book resynced");

        // Previously discovered collections are re-bootstrapped even when no
        // live order references them anymore.
        for collection in self.store.collections().await? {
            if let Ok(address) = collection.address.parse::<Address>() {
                contracts.insert(address);
            }
        }
        for address in contracts {
            if let Err(err) = self.bootstrap_collection(address).await {
                tracing::warn!(
                    target: "bazaar::indexer",
                    contract = %address,
                    error = %err,
                    "collection bootstrap failed, continuing resync"
                );
            }
        }
        Ok(())
    }

    /// Brings one collection into the replica: the collection row, the
    /// transfer history since contract creation, every minted token, and a
    /// live watcher.
    ///
    /// Per-token failures are logged and skipped so one broken metadata URI
    /// cannot sink the rest of the collection.
    pub async fn bootstrap_collection(&self, address: Address) -> Result<()> {
        let client = self.registry.resolve(address).await?;
        self.refresh_collection_row(client.as_ref(), address).await?;

        let supply = contract::total_supply(client.as_ref()).await?;
        tracing::info!(
            target: "bazaar::indexer",
            contract = %address,
            supply,
            "bootstrapping collection"
        );

        if let Err(err) = self.replay_transfer_history(client.as_ref(), address).await {
            tracing::warn!(
                target: "bazaar::indexer",
                contract = %address,
                error = %err,
                "historical replay failed, continuing bootstrap"
            );
        }

        for token_id in 0..supply {
            if let Err(err) = self.refresh_token(client.as_ref(), address, token_id).await {
                tracing::warn!(
                    target: "bazaar::indexer",
                    contract = %address,
                    token_id,
                    error = %err,
                    "token initialization failed"
                );
            }
        }

        self.spawn_collection_watcher(address, client);
        Ok(())
    }

    /// Creates the collection row on first sight; on later passes only
    /// re-queries the icon if it was empty.
    async fn refresh_collection_row(
        &self,
        client: &dyn ContractClient,
        address: Address,
    ) -> Result<()> {
        match self.store.collection(&addr_key(address)).await {
            Ok(existing) if existing.icon_uri.is_empty() => {
                match contract::token_icon_uri(client).await {
                    Ok(icon_uri) if !icon_uri.is_empty() => {
                        self.store
                            .upsert_collection(&Collection { icon_uri, ..existing })
                            .await?;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(
                            target: "bazaar::indexer",
                            contract = %address,
                            error = %err,
                            "icon uri unavailable"
                        );
                    }
                }
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(StoreError::NotFound) => {
                let name = contract::name(client).await?;
                let symbol = contract::symbol(client).await?;
                let icon_uri = match contract::token_icon_uri(client).await {
                    Ok(icon_uri) => icon_uri,
                    Err(err) => {
                        tracing::debug!(
                            target: "bazaar::indexer",
                            contract = %address,
                            error = %err,
                            "icon uri unavailable"
                        );
                        String::new()
                    }
                };
                self.store
                    .upsert_collection(&Collection {
                        address: addr_key(address),
                        name,
                        symbol,
                        icon_uri,
                    })
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn replay_transfer_history(
        &self,
        client: &dyn ContractClient,
        address: Address,
    ) -> Result<()> {
        let from_block = chain::creation_block(client).await?;
        let to_block = client.head_block().await?;
        let logs =
            chain::replay_range(client, from_block, to_block, vec![*TRANSFER_TOPIC]).await?;
        for log in &logs {
            if let Err(err) = self.apply_nft_log(address, log).await {
                tracing::warn!(
                    target: "bazaar::indexer",
                    contract = %address,
                    error = %err,
                    "failed to apply historical event"
                );
            }
        }
        Ok(())
    }

    /// Re-reads a token's URI, owner, and metadata document from chain and
    /// upserts the row together with a full attribute replacement.
    async fn refresh_token(
        &self,
        client: &dyn ContractClient,
        address: Address,
        token_id: u64,
    ) -> Result<()> {
        let token_uri = contract::token_uri(client, token_id).await?;
        let owner = contract::owner_of(client, token_id).await?;
        let document = self
            .metadata
            .fetch(&token_uri)
            .await
            .map_err(|source| Error::Metadata { uri: token_uri.clone(), source })?;

        let attributes: Vec<TokenAttribute> = document
            .attributes
            .into_iter()
            .map(|attribute| TokenAttribute {
                trait_type: attribute.trait_type,
                value: attribute.value,
            })
            .collect();
        let token = Token {
            contract: addr_key(address),
            token_id,
            owner: addr_key(owner),
            token_uri,
            name: document.name,
            description: document.description,
            image: document.image,
        };
        self.store.upsert_token(&token).await?;
        self.store
            .replace_attributes(&token.contract, token_id, &attributes)
            .await?;
        Ok(())
    }

    /// Applies a log from a collection feed. Events outside the collection
    /// vocabulary are traced and ignored.
    pub async fn apply_nft_log(&self, contract_address: Address, log: &Log) -> Result<()> {
        match decode_log(log)? {
            ChainEvent::Transfer { from, to, token_id } => {
                self.handle_transfer(contract_address, from, to, token_id, log).await
            }
            ChainEvent::MetadataUpdate { token_id } => {
                self.handle_metadata_update(contract_address, token_id).await
            }
            other => {
                tracing::trace!(
                    target: "bazaar::indexer",
                    contract = %contract_address,
                    event = ?other,
                    "ignoring event outside the collection vocabulary"
                );
                Ok(())
            }
        }
    }

    /// Applies a log from the marketplace feed. The marketplace vocabulary
    /// is closed, so anything else is an error.
    pub async fn apply_market_log(&self, log: &Log) -> Result<()> {
        match decode_log(log)? {
            ChainEvent::OrderCreated { order_id, nft, token_id, payment_token, price, seller } => {
                self.handle_order_created(order_id, nft, token_id, payment_token, price, seller)
                    .await
            }
            ChainEvent::OrderCancelled { order_id } => {
                self.transition_order(order_id, OrderStatus::Cancelled).await
            }
            ChainEvent::OrderFulfilled { order_id, .. } => {
                self.transition_order(order_id, OrderStatus::Fulfilled).await
            }
            ChainEvent::CollectionDeployed { nft } => self.bootstrap_collection(nft).await,
            ChainEvent::Unknown { topic } => Err(Error::UnknownEvent { topic }),
            ChainEvent::Transfer { .. } | ChainEvent::MetadataUpdate { .. } => {
                Err(Error::UnknownEvent { topic: log.topic0().copied() })
            }
        }
    }

    async fn handle_transfer(
        &self,
        contract_address: Address,
        from: Address,
        to: Address,
        token_id: U256,
        log: &Log,
    ) -> Result<()> {
        let token_id = token_id_u64(token_id)?;
        let block_number = log.block_number.unwrap_or(0);
        let client = self.registry.resolve(contract_address).await?;
        let block_timestamp = match client.block_timestamp(block_number).await {
            Ok(timestamp) => timestamp,
            Err(err) => {
                tracing::warn!(
                    target: "bazaar::indexer",
                    contract = %contract_address,
                    block_number,
                    error = %err,
                    "block timestamp unavailable, recording zero"
                );
                0
            }
        };

        let kind = if from == Address::ZERO { TransferKind::Mint } else { TransferKind::Transfer };
        let record = TransferRecord {
            contract: addr_key(contract_address),
            token_id,
            kind,
            from: addr_key(from),
            to: addr_key(to),
            tx_hash: log
                .transaction_hash
                .map(|hash| format!("{hash:#x}"))
                .unwrap_or_default(),
            block_number,
            block_timestamp,
        };
        self.store.append_transfer(&record).await?;
        self.store
            .update_token_owner(&record.contract, token_id, &record.to)
            .await?;
        Ok(())
    }

    async fn handle_metadata_update(
        &self,
        contract_address: Address,
        token_id: U256,
    ) -> Result<()> {
        let token_id = token_id_u64(token_id)?;
        let client = self.registry.resolve(contract_address).await?;
        self.refresh_token(client.as_ref(), contract_address, token_id).await
    }

    async fn handle_order_created(
        &self,
        order_id: u64,
        nft: Address,
        token_id: U256,
        payment_token: Address,
        price: U256,
        seller: Address,
    ) -> Result<()> {
        // A listing may reference a collection we have never seen. The order
        // row still lands even if the collection cannot be bootstrapped.
        if !self.is_watching(nft) {
            if let Err(err) = self.bootstrap_collection(nft).await {
                tracing::warn!(
                    target: "bazaar::indexer",
                    contract = %nft,
                    error = %err,
                    "collection bootstrap failed while handling order creation"
                );
            }
        }

        let order = Order {
            // Stored ids are the on-chain id plus one.
            id: order_id + 1,
            nft_contract: addr_key(nft),
            token_id: token_id_u64(token_id)?,
            payment_token: addr_key(payment_token),
            price: price.to_string(),
            seller: addr_key(seller),
            status: OrderStatus::Open,
        };
        self.store.upsert_orders(std::slice::from_ref(&order)).await?;
        Ok(())
    }

    async fn transition_order(&self, order_id: u64, status: OrderStatus) -> Result<()> {
        self.store.update_order_status(order_id + 1, status).await?;
        Ok(())
    }

    // ---- live watchers ----

    fn is_watching(&self, address: Address) -> bool {
        self.watchers.lock().unwrap().started.contains(&address)
    }

    /// Subscribes to the marketplace feed. Decode or apply failures on a
    /// single event are logged; the watcher keeps running.
    pub fn spawn_market_watcher(&self) {
        let Some(indexer) = self.weak.upgrade() else { return };
        let client = self.market.clone();
        let handle = tokio::spawn(async move {
            indexer.watch_market(client).await;
        });
        self.watchers.lock().unwrap().tasks.push(handle);
    }

    /// Subscribes to one collection's feed. At most one watcher per address.
    fn spawn_collection_watcher(&self, address: Address, client: Arc<dyn ContractClient>) {
        let Some(indexer) = self.weak.upgrade() else { return };
        let mut watchers = self.watchers.lock().unwrap();
        if !watchers.started.insert(address) {
            return;
        }
        let handle = tokio::spawn(async move {
            indexer.watch_collection(address, client).await;
        });
        watchers.tasks.push(handle);
    }

    async fn watch_market(self: Arc<Self>, client: Arc<dyn ContractClient>) {
        let mut feed = match client.subscribe_logs(self.cancel.child_token()).await {
            Ok(feed) => feed,
            Err(err) => {
                tracing::error!(
                    target: "bazaar::indexer",
                    error = %err,
                    "marketplace log subscription failed"
                );
                return;
            }
        };
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = feed.recv() => match next {
                    Some(log) => {
                        if let Err(err) = self.apply_market_log(&log).await {
                            tracing::warn!(
                                target: "bazaar::indexer",
                                error = %err,
                                "failed to handle marketplace event"
                            );
                        }
                    }
                    None => break,
                },
            }
        }
        tracing::info!(target: "bazaar::indexer", "market watcher stopped");
    }

    async fn watch_collection(self: Arc<Self>, address: Address, client: Arc<dyn ContractClient>) {
        let mut feed = match client.subscribe_logs(self.cancel.child_token()).await {
            Ok(feed) => feed,
            Err(err) => {
                tracing::error!(
                    target: "bazaar::indexer",
                    contract = %address,
                    error = %err,
                    "collection log subscription failed"
                );
                return;
            }
        };
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = feed.recv() => match next {
                    Some(log) => {
                        if let Err(err) = self.apply_nft_log(address, &log).await {
                            tracing::warn!(
                                target: "bazaar::indexer",
                                contract = %address,
                                error = %err,
                                "failed to handle collection event"
                            );
                        }
                    }
                    None => break,
                },
            }
        }
        tracing::info!(target: "bazaar::indexer", contract = %address, "collection watcher stopped");
    }

    pub(crate) fn take_watcher_tasks(&self) -> Vec<JoinHandle<()>> {
        self.watchers.lock().unwrap().tasks.drain(..).collect()
    }

    // ---- read accessors ----

    pub async fn collections(&self) -> Result<Vec<Collection>> {
        Ok(self.store.collections().await?)
    }

    /// Returns a collection and its tokens, lazily bootstrapping the
    /// collection on a miss.
    pub async fn collection_with_tokens(
        &self,
        address: Address,
    ) -> Result<(Collection, Vec<Token>)> {
        let key = addr_key(address);
        match self.store.collection(&key).await {
            Ok(collection) => {
                let tokens = self.store.tokens_in_collection(&key).await?;
                return Ok((collection, tokens));
            }
            Err(StoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
        self.bootstrap_collection(address).await?;
        let collection = self.store.collection(&key).await?;
        let tokens = self.store.tokens_in_collection(&key).await?;
        Ok((collection, tokens))
    }

    /// Returns a token and its attributes, lazily initializing the token
    /// (or its whole collection) on a miss.
    pub async fn token_with_attributes(
        &self,
        address: Address,
        token_id: u64,
    ) -> Result<(Token, Vec<TokenAttribute>)> {
        let key = addr_key(address);
        match self.store.token(&key, token_id).await {
            Ok(token) => {
                let attributes = self.store.attributes(&key, token_id).await?;
                return Ok((token, attributes));
            }
            Err(StoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        match self.store.collection(&key).await {
            Ok(_) => {
                let client = self.registry.resolve(address).await?;
                self.refresh_token(client.as_ref(), address, token_id).await?;
            }
            Err(StoreError::NotFound) => self.bootstrap_collection(address).await?,
            Err(err) => return Err(err.into()),
        }
        let token = self.store.token(&key, token_id).await?;
        let attributes = self.store.attributes(&key, token_id).await?;
        Ok((token, attributes))
    }

    pub async fn orders(&self) -> Result<Vec<Order>> {
        Ok(self.store.orders().await?)
    }

    /// Order lookup by on-chain id.
    pub async fn order_by_chain_id(&self, chain_id: u64) -> Result<Order> {
        Ok(self.store.order(chain_id + 1).await?)
    }

    pub async fn order_by_nft(&self, address: Address, token_id: u64) -> Result<Order> {
        Ok(self.store.order_by_nft(&addr_key(address), token_id).await?)
    }

    pub async fn transfer_history(
        &self,
        address: Address,
        token_id: u64,
    ) -> Result<Vec<TransferRecord>> {
        Ok(self.store.transfers(&addr_key(address), token_id).await?)
    }

    /// Owner according to the recorded transfer history.
    pub async fn current_owner(&self, address: Address, token_id: u64) -> Result<String> {
        let history = self.store.transfers(&addr_key(address), token_id).await?;
        history
            .last()
            .map(|record| record.to.clone())
            .ok_or(Error::Store(StoreError::NotFound))
    }
}
