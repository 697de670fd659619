//! End-to-end engine tests against scripted chain and metadata doubles.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use bazaar::{Indexer, Service};
use bazaar_store::{OrderStatus, Store, TransferKind};
use bazaar_testing::{
    document, metadata_update_log, order_cancelled_log, order_created_log, order_fulfilled_log,
    transfer_log, MemoryStore, MockConnector, MockContract, OrderFixture, StaticMetadata,
};
use tokio_util::sync::CancellationToken;

const MARKET: Address = Address::repeat_byte(0xee);
const NFT: Address = Address::repeat_byte(0x11);
const PAYMENT: Address = Address::repeat_byte(0x22);
const ALICE: Address = Address::repeat_byte(0xaa);
const BOB: Address = Address::repeat_byte(0xbb);

fn key(address: Address) -> String {
    format!("{address:#x}")
}

struct Harness {
    store: Arc<MemoryStore>,
    connector: Arc<MockConnector>,
    market: Arc<MockContract>,
    metadata: Arc<StaticMetadata>,
    indexer: Arc<Indexer<MemoryStore>>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let connector = MockConnector::new();
    let market = MockContract::new(MARKET);
    let metadata = StaticMetadata::new();
    let indexer = Indexer::new(
        store.clone(),
        connector.registry(),
        market.clone(),
        metadata.clone(),
        CancellationToken::new(),
    );
    Harness { store, connector, market, metadata, indexer }
}

impl Harness {
    /// Registers a collection of `supply` tokens owned by `owner`, with
    /// metadata behind `https://meta.test/<id>`.
    fn seed_collection(&self, address: Address, supply: u64, owner: Address) -> Arc<MockContract> {
        let contract = MockContract::new(address);
        contract.set_collection("Bazaar Pass", "BZP", "ipfs://icon");
        contract.set_supply(supply);
        contract.set_created_at(5);
        for token_id in 0..supply {
            let uri = format!("https://meta.test/{token_id}");
            contract.set_token(token_id, &uri, owner);
            self.metadata.insert(
                &uri,
                document(&format!("Pass #{token_id}"), "https://img.test/p.png", &[
                    ("color", "red"),
                ]),
            );
        }
        self.connector.insert(contract.clone());
        contract
    }

    fn listing(&self, token_id: u64, status: u8) -> OrderFixture {
        OrderFixture {
            nft: NFT,
            token_id,
            payment_token: PAYMENT,
            price: 1_000,
            seller: ALICE,
            status,
        }
    }
}

#[tokio::test]
async fn resync_rebuilds_the_order_book_with_shifted_ids() {
    let h = harness();
    h.seed_collection(NFT, 2, ALICE);
    h.market.set_orders(vec![h.listing(0, 0), h.listing(1, 2)]);

    h.indexer.resync_orders().await.unwrap();

    let orders = h.store.orders().await.unwrap();
    assert_eq!(orders.len(), 2);
    // List position zero lands at stored id one.
    assert_eq!(orders[0].id, 1);
    assert_eq!(orders[0].status, OrderStatus::Open);
    assert_eq!(orders[0].price, "1000");
    assert_eq!(orders[0].seller, key(ALICE));
    assert_eq!(orders[1].id, 2);
    assert_eq!(orders[1].status, OrderStatus::Cancelled);

    // The referenced collection was bootstrapped along the way.
    let collection = h.store.collection(&key(NFT)).await.unwrap();
    assert_eq!(collection.name, "Bazaar Pass");
    assert_eq!(collection.symbol, "BZP");
    assert_eq!(collection.icon_uri, "ipfs://icon");
    assert_eq!(h.store.tokens_in_collection(&key(NFT)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn resync_survives_a_collection_that_fails_to_bootstrap() {
    let h = harness();
    // NFT is never registered with the connector, so bootstrap fails.
    h.market.set_orders(vec![h.listing(0, 0)]);

    h.indexer.resync_orders().await.unwrap();

    assert_eq!(h.store.orders().await.unwrap().len(), 1);
    assert!(h.store.collection(&key(NFT)).await.is_err());
}

#[tokio::test]
async fn order_lifecycle_follows_the_chain_id_mapping() {
    let h = harness();
    h.seed_collection(NFT, 1, ALICE);

    h.indexer
        .apply_market_log(&order_created_log(MARKET, 0, NFT, 0, PAYMENT, 1_000, ALICE, 10))
        .await
        .unwrap();
    // On-chain id zero is stored, and queryable, as one.
    assert_eq!(h.store.order(1).await.unwrap().status, OrderStatus::Open);
    let by_chain_id = h.indexer.order_by_chain_id(0).await.unwrap();
    assert_eq!(by_chain_id.id, 1);

    h.indexer
        .apply_market_log(&order_fulfilled_log(MARKET, 0, BOB, 11))
        .await
        .unwrap();
    assert_eq!(h.store.order(1).await.unwrap().status, OrderStatus::Fulfilled);

    h.indexer
        .apply_market_log(&order_created_log(MARKET, 1, NFT, 0, PAYMENT, 2_000, BOB, 12))
        .await
        .unwrap();
    h.indexer
        .apply_market_log(&order_cancelled_log(MARKET, 1, 13))
        .await
        .unwrap();
    assert_eq!(h.store.order(2).await.unwrap().status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn transitions_for_unknown_orders_fail_without_side_effects() {
    let h = harness();
    h.seed_collection(NFT, 1, ALICE);
    h.indexer
        .apply_market_log(&order_created_log(MARKET, 0, NFT, 0, PAYMENT, 1_000, ALICE, 10))
        .await
        .unwrap();

    let err = h
        .indexer
        .apply_market_log(&order_cancelled_log(MARKET, 7, 11))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(h.store.order(1).await.unwrap().status, OrderStatus::Open);
}

#[tokio::test]
async fn non_market_events_on_the_market_feed_are_errors() {
    let h = harness();
    let err = h
        .indexer
        .apply_market_log(&transfer_log(MARKET, ALICE, BOB, 0, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, bazaar::Error::UnknownEvent { .. }));
}

#[tokio::test]
async fn transfers_classify_mints_and_track_ownership() {
    let h = harness();
    h.seed_collection(NFT, 1, ALICE);
    h.indexer.bootstrap_collection(NFT).await.unwrap();

    h.indexer
        .apply_nft_log(NFT, &transfer_log(NFT, Address::ZERO, ALICE, 0, 6))
        .await
        .unwrap();
    h.indexer
        .apply_nft_log(NFT, &transfer_log(NFT, ALICE, BOB, 0, 8))
        .await
        .unwrap();

    let history = h.store.transfers(&key(NFT), 0).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, TransferKind::Mint);
    assert_eq!(history[0].from, key(Address::ZERO));
    assert_eq!(history[1].kind, TransferKind::Transfer);
    assert_ne!(history[0].block_timestamp, 0);

    assert_eq!(h.store.token(&key(NFT), 0).await.unwrap().owner, key(BOB));
    assert_eq!(h.indexer.current_owner(NFT, 0).await.unwrap(), key(BOB));
}

#[tokio::test]
async fn replaying_events_is_idempotent() {
    let h = harness();
    h.seed_collection(NFT, 1, ALICE);
    let created = order_created_log(MARKET, 0, NFT, 0, PAYMENT, 1_000, ALICE, 10);
    let moved = transfer_log(NFT, ALICE, BOB, 0, 11);

    h.indexer.apply_market_log(&created).await.unwrap();
    h.indexer.apply_nft_log(NFT, &moved).await.unwrap();
    let orders_once = h.store.orders().await.unwrap();
    let token_once = h.store.token(&key(NFT), 0).await.unwrap();

    h.indexer.apply_market_log(&created).await.unwrap();
    h.indexer.apply_nft_log(NFT, &moved).await.unwrap();

    assert_eq!(h.store.orders().await.unwrap(), orders_once);
    assert_eq!(h.store.token(&key(NFT), 0).await.unwrap(), token_once);
}

#[tokio::test]
async fn bootstrap_continues_past_broken_token_metadata() {
    let h = harness();
    h.seed_collection(NFT, 3, ALICE);
    h.metadata.remove("https://meta.test/1");

    h.indexer.bootstrap_collection(NFT).await.unwrap();

    let tokens = h.store.tokens_in_collection(&key(NFT)).await.unwrap();
    let ids: Vec<u64> = tokens.iter().map(|token| token.token_id).collect();
    assert_eq!(ids, vec![0, 2]);
    assert_eq!(tokens[0].name, "Pass #0");
    assert_eq!(
        h.store.attributes(&key(NFT), 0).await.unwrap()[0].value,
        "red"
    );
}

#[tokio::test]
async fn bootstrap_of_an_empty_collection_still_records_it() {
    let h = harness();
    h.seed_collection(NFT, 0, ALICE);

    h.indexer.bootstrap_collection(NFT).await.unwrap();

    assert_eq!(h.store.collection(&key(NFT)).await.unwrap().symbol, "BZP");
    assert!(h.store.tokens_in_collection(&key(NFT)).await.unwrap().is_empty());
}

#[tokio::test]
async fn metadata_update_replaces_the_attribute_set() {
    let h = harness();
    h.seed_collection(NFT, 1, ALICE);
    h.indexer.bootstrap_collection(NFT).await.unwrap();
    assert_eq!(
        h.store.attributes(&key(NFT), 0).await.unwrap(),
        vec![bazaar_store::TokenAttribute { trait_type: "color".into(), value: "red".into() }]
    );

    h.metadata.insert(
        "https://meta.test/0",
        document("Pass #0", "https://img.test/p.png", &[("color", "blue"), ("size", "M")]),
    );
    h.indexer
        .apply_nft_log(NFT, &metadata_update_log(NFT, 0, 20))
        .await
        .unwrap();

    let attributes = h.store.attributes(&key(NFT), 0).await.unwrap();
    assert_eq!(attributes.len(), 2);
    assert_eq!(attributes[0].value, "blue");
    assert_eq!(attributes[1].trait_type, "size");
}

#[tokio::test]
async fn lookups_lazily_bootstrap_unknown_collections() {
    let h = harness();
    h.seed_collection(NFT, 2, ALICE);

    // No resync, no bootstrap: the read itself must pull the data in.
    let (token, attributes) = h.indexer.token_with_attributes(NFT, 1).await.unwrap();
    assert_eq!(token.name, "Pass #1");
    assert_eq!(attributes.len(), 1);

    let (collection, tokens) = h.indexer.collection_with_tokens(NFT).await.unwrap();
    assert_eq!(collection.name, "Bazaar Pass");
    assert_eq!(tokens.len(), 2);
}

#[tokio::test]
async fn historical_replay_and_live_feed_converge() {
    // One chain, observed twice: once through the backfill, once through
    // the live feed. Both replicas must agree.
    let backfill = harness();
    let contract = backfill.seed_collection(NFT, 1, BOB);
    contract.push_history(transfer_log(NFT, Address::ZERO, ALICE, 0, 6));
    contract.push_history(transfer_log(NFT, ALICE, BOB, 0, 7));
    backfill.indexer.bootstrap_collection(NFT).await.unwrap();

    let live = harness();
    live.seed_collection(NFT, 1, BOB);
    live.indexer.bootstrap_collection(NFT).await.unwrap();
    live.indexer
        .apply_nft_log(NFT, &transfer_log(NFT, Address::ZERO, ALICE, 0, 6))
        .await
        .unwrap();
    live.indexer
        .apply_nft_log(NFT, &transfer_log(NFT, ALICE, BOB, 0, 7))
        .await
        .unwrap();

    assert_eq!(
        backfill.store.collections().await.unwrap(),
        live.store.collections().await.unwrap()
    );
    assert_eq!(
        backfill.store.tokens_in_collection(&key(NFT)).await.unwrap(),
        live.store.tokens_in_collection(&key(NFT)).await.unwrap()
    );
    assert_eq!(
        backfill.store.transfers(&key(NFT), 0).await.unwrap(),
        live.store.transfers(&key(NFT), 0).await.unwrap()
    );
}

#[tokio::test]
async fn service_applies_live_market_events_and_stops_cleanly() {
    let h = harness();
    h.seed_collection(NFT, 1, ALICE);
    let service = Service::start(h.indexer.clone()).await.unwrap();

    for _ in 0..50 {
        if h.market.live_subscribers() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.market.live_subscribers() > 0, "market watcher never subscribed");

    h.market
        .emit(order_created_log(MARKET, 0, NFT, 0, PAYMENT, 1_000, ALICE, 10))
        .await;

    let mut seen = false;
    for _ in 0..50 {
        if h.store.order(1).await.is_ok() {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seen, "live order never reached the store");

    tokio::time::timeout(Duration::from_secs(5), service.stop())
        .await
        .expect("shutdown timed out");
}
