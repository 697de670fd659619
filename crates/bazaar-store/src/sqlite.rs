//! SQLite-backed [`Store`] implementation.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::models::{
    Collection, Order, OrderStatus, Token, TokenAttribute, TransferKind, TransferRecord,
};
use crate::{Store, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    address TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    symbol TEXT NOT NULL,
    icon_uri TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS tokens (
    contract TEXT NOT NULL,
    token_id INTEGER NOT NULL,
    owner TEXT NOT NULL,
    token_uri TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    image TEXT NOT NULL,
    PRIMARY KEY (contract, token_id)
);
CREATE INDEX IF NOT EXISTS idx_tokens_owner ON tokens (owner);

CREATE TABLE IF NOT EXISTS token_attributes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contract TEXT NOT NULL,
    token_id INTEGER NOT NULL,
    trait_type TEXT NOT NULL,
    value TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attributes_token ON token_attributes (contract, token_id);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY,
    nft_contract TEXT NOT NULL,
    token_id INTEGER NOT NULL,
    payment_token TEXT NOT NULL,
    price TEXT NOT NULL,
    seller TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_orders_nft ON orders (nft_contract, token_id);

CREATE TABLE IF NOT EXISTS transfer_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contract TEXT NOT NULL,
    token_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    from_addr TEXT NOT NULL,
    to_addr TEXT NOT NULL,
    tx_hash TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    block_timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transfers_token
    ON transfer_events (contract, token_id, block_number);
"#;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (and creates if missing) the database at `url` and applies the
    /// schema.
    ///
    /// A single pooled connection serializes writes and keeps
    /// `sqlite::memory:` databases coherent across queries.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_collection(row: &sqlx::sqlite::SqliteRow) -> Collection {
    Collection {
        address: row.get("address"),
        name: row.get("name"),
        symbol: row.get("symbol"),
        icon_uri: row.get("icon_uri"),
    }
}

fn row_token(row: &sqlx::sqlite::SqliteRow) -> Token {
    Token {
        contract: row.get("contract"),
        token_id: row.get::<i64, _>("token_id") as u64,
        owner: row.get("owner"),
        token_uri: row.get("token_uri"),
        name: row.get("name"),
        description: row.get("description"),
        image: row.get("image"),
    }
}

fn row_order(row: &sqlx::sqlite::SqliteRow) -> Result<Order, StoreError> {
    let raw_status = row.get::<i64, _>("status");
    let status = OrderStatus::from_u8(raw_status as u8).ok_or_else(|| {
        StoreError::Db(sqlx::Error::Decode(
            format!("invalid order status {raw_status}").into(),
        ))
    })?;
    Ok(Order {
        id: row.get::<i64, _>("id") as u64,
        nft_contract: row.get("nft_contract"),
        token_id: row.get::<i64, _>("token_id") as u64,
        payment_token: row.get("payment_token"),
        price: row.get("price"),
        seller: row.get("seller"),
        status,
    })
}

fn row_transfer(row: &sqlx::sqlite::SqliteRow) -> Result<TransferRecord, StoreError> {
    let raw_kind: String = row.get("kind");
    let kind = TransferKind::from_str(&raw_kind).ok_or_else(|| {
        StoreError::Db(sqlx::Error::Decode(
            format!("invalid transfer kind {raw_kind}").into(),
        ))
    })?;
    Ok(TransferRecord {
        contract: row.get("contract"),
        token_id: row.get::<i64, _>("token_id") as u64,
        kind,
        from: row.get("from_addr"),
        to: row.get("to_addr"),
        tx_hash: row.get("tx_hash"),
        block_number: row.get::<i64, _>("block_number") as u64,
        block_timestamp: row.get::<i64, _>("block_timestamp") as u64,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_collection(&self, collection: &Collection) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO collections (address, name, symbol, icon_uri)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (address) DO UPDATE SET
                 name = excluded.name,
                 symbol = excluded.symbol,
                 icon_uri = excluded.icon_uri",
        )
        .bind(&collection.address)
        .bind(&collection.name)
        .bind(&collection.symbol)
        .bind(&collection.icon_uri)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn collection(&self, address: &str) -> Result<Collection, StoreError> {
        let row = sqlx::query("SELECT * FROM collections WHERE address = ?1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row_collection(&row))
    }

    async fn collections(&self) -> Result<Vec<Collection>, StoreError> {
        let rows = sqlx::query("SELECT * FROM collections ORDER BY address")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_collection).collect())
    }

    async fn upsert_token(&self, token: &Token) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tokens (contract, token_id, owner, token_uri, name, description, image)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (contract, token_id) DO UPDATE SET
                 owner = excluded.owner,
                 token_uri = excluded.token_uri,
                 name = excluded.name,
                 description = excluded.description,
                 image = excluded.image",
        )
        .bind(&token.contract)
        .bind(token.token_id as i64)
        .bind(&token.owner)
        .bind(&token.token_uri)
        .bind(&token.name)
        .bind(&token.description)
        .bind(&token.image)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn token(&self, contract: &str, token_id: u64) -> Result<Token, StoreError> {
        let row = sqlx::query("SELECT * FROM tokens WHERE contract = ?1 AND token_id = ?2")
            .bind(contract)
            .bind(token_id as i64)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row_token(&row))
    }

    async fn tokens_in_collection(&self, contract: &str) -> Result<Vec<Token>, StoreError> {
        let rows = sqlx::query("SELECT * FROM tokens WHERE contract = ?1 ORDER BY token_id")
            .bind(contract)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_token).collect())
    }

    async fn update_token_owner(
        &self,
        contract: &str,
        token_id: u64,
        owner: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE tokens SET owner = ?1 WHERE contract = ?2 AND token_id = ?3")
            .bind(owner)
            .bind(contract)
            .bind(token_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_attributes(
        &self,
        contract: &str,
        token_id: u64,
        attributes: &[TokenAttribute],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM token_attributes WHERE contract = ?1 AND token_id = ?2")
            .bind(contract)
            .bind(token_id as i64)
            .execute(&mut *tx)
            .await?;
        for attribute in attributes {
            sqlx::query(
                "INSERT INTO token_attributes (contract, token_id, trait_type, value)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(contract)
            .bind(token_id as i64)
            .bind(&attribute.trait_type)
            .bind(&attribute.value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn attributes(
        &self,
        contract: &str,
        token_id: u64,
    ) -> Result<Vec<TokenAttribute>, StoreError> {
        let rows = sqlx::query(
            "SELECT trait_type, value FROM token_attributes
             WHERE contract = ?1 AND token_id = ?2 ORDER BY id",
        )
        .bind(contract)
        .bind(token_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| TokenAttribute {
                trait_type: row.get("trait_type"),
                value: row.get("value"),
            })
            .collect())
    }

    async fn upsert_orders(&self, orders: &[Order]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for order in orders {
            sqlx::query(
                "INSERT INTO orders
                     (id, nft_contract, token_id, payment_token, price, seller, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (id) DO UPDATE SET
                     nft_contract = excluded.nft_contract,
                     token_id = excluded.token_id,
                     payment_token = excluded.payment_token,
                     price = excluded.price,
                     seller = excluded.seller,
                     status = excluded.status",
            )
            .bind(order.id as i64)
            .bind(&order.nft_contract)
            .bind(order.token_id as i64)
            .bind(&order.payment_token)
            .bind(&order.price)
            .bind(&order.seller)
            .bind(i64::from(order.status.as_u8()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn order(&self, id: u64) -> Result<Order, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?1")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        row_order(&row)
    }

    async fn order_by_nft(&self, contract: &str, token_id: u64) -> Result<Order, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM orders WHERE nft_contract = ?1 AND token_id = ?2
             ORDER BY id DESC LIMIT 1",
        )
        .bind(contract)
        .bind(token_id as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        row_order(&row)
    }

    async fn orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query("SELECT * FROM orders ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_order).collect()
    }

    async fn update_order_status(&self, id: u64, status: OrderStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET status = ?1 WHERE id = ?2")
            .bind(i64::from(status.as_u8()))
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn append_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO transfer_events
                 (contract, token_id, kind, from_addr, to_addr, tx_hash,
                  block_number, block_timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&record.contract)
        .bind(record.token_id as i64)
        .bind(record.kind.as_str())
        .bind(&record.from)
        .bind(&record.to)
        .bind(&record.tx_hash)
        .bind(record.block_number as i64)
        .bind(record.block_timestamp as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transfers(
        &self,
        contract: &str,
        token_id: u64,
    ) -> Result<Vec<TransferRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM transfer_events WHERE contract = ?1 AND token_id = ?2
             ORDER BY block_number, id",
        )
        .bind(contract)
        .bind(token_id as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_transfer).collect()
    }

    async fn clear_derived(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for table in ["orders", "tokens", "token_attributes", "transfer_events"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_token(id: u64) -> Token {
        Token {
            contract: "0x1111".into(),
            token_id: id,
            owner: "0xaaaa".into(),
            token_uri: format!("https://meta.test/{id}"),
            name: format!("Token #{id}"),
            description: "a token".into(),
            image: "https://img.test/x.png".into(),
        }
    }

    fn sample_order(id: u64) -> Order {
        Order {
            id,
            nft_contract: "0x1111".into(),
            token_id: 7,
            payment_token: "0x2222".into(),
            price: "1000000000000000000".into(),
            seller: "0xaaaa".into(),
            status: OrderStatus::Open,
        }
    }

    #[tokio::test]
    async fn collection_roundtrip_and_icon_update() {
        let store = store().await;
        let mut collection = Collection {
            address: "0x1111".into(),
            name: "Bazaar Pass".into(),
            symbol: "BZP".into(),
            icon_uri: String::new(),
        };
        store.upsert_collection(&collection).await.unwrap();
        assert_eq!(store.collection("0x1111").await.unwrap(), collection);

        collection.icon_uri = "ipfs://icon".into();
        store.upsert_collection(&collection).await.unwrap();
        assert_eq!(
            store.collection("0x1111").await.unwrap().icon_uri,
            "ipfs://icon"
        );
        assert!(matches!(
            store.collection("0x9999").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn token_upsert_is_idempotent() {
        let store = store().await;
        let token = sample_token(3);
        store.upsert_token(&token).await.unwrap();
        store.upsert_token(&token).await.unwrap();

        let listed = store.tokens_in_collection("0x1111").await.unwrap();
        assert_eq!(listed, vec![token]);
    }

    #[tokio::test]
    async fn owner_update_on_missing_token_is_a_no_op() {
        let store = store().await;
        store
            .update_token_owner("0x1111", 42, "0xbbbb")
            .await
            .unwrap();

        store.upsert_token(&sample_token(3)).await.unwrap();
        store
            .update_token_owner("0x1111", 3, "0xbbbb")
            .await
            .unwrap();
        assert_eq!(store.token("0x1111", 3).await.unwrap().owner, "0xbbbb");
    }

    #[tokio::test]
    async fn attributes_are_replaced_not_merged() {
        let store = store().await;
        let first = vec![
            TokenAttribute { trait_type: "color".into(), value: "red".into() },
            TokenAttribute { trait_type: "size".into(), value: "L".into() },
        ];
        store.replace_attributes("0x1111", 3, &first).await.unwrap();

        let second = vec![TokenAttribute { trait_type: "color".into(), value: "blue".into() }];
        store.replace_attributes("0x1111", 3, &second).await.unwrap();

        assert_eq!(store.attributes("0x1111", 3).await.unwrap(), second);
    }

    #[tokio::test]
    async fn order_status_transitions() {
        let store = store().await;
        store.upsert_orders(&[sample_order(1)]).await.unwrap();

        store
            .update_order_status(1, OrderStatus::Fulfilled)
            .await
            .unwrap();
        assert_eq!(
            store.order(1).await.unwrap().status,
            OrderStatus::Fulfilled
        );

        assert!(matches!(
            store.update_order_status(9, OrderStatus::Cancelled).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn order_lookup_by_nft_prefers_latest() {
        let store = store().await;
        let mut stale = sample_order(1);
        stale.status = OrderStatus::Cancelled;
        let fresh = sample_order(2);
        store.upsert_orders(&[stale, fresh.clone()]).await.unwrap();

        assert_eq!(store.order_by_nft("0x1111", 7).await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn transfers_come_back_in_block_order() {
        let store = store().await;
        let record = |block: u64, kind: TransferKind| TransferRecord {
            contract: "0x1111".into(),
            token_id: 3,
            kind,
            from: "0x0000".into(),
            to: "0xaaaa".into(),
            tx_hash: "0xdead".into(),
            block_number: block,
            block_timestamp: block * 12,
        };
        store
            .append_transfer(&record(9, TransferKind::Transfer))
            .await
            .unwrap();
        store
            .append_transfer(&record(2, TransferKind::Mint))
            .await
            .unwrap();

        let history = store.transfers("0x1111", 3).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].block_number, 2);
        assert_eq!(history[0].kind, TransferKind::Mint);
        assert_eq!(history[1].block_number, 9);
    }

    #[tokio::test]
    async fn clear_derived_preserves_collections() {
        let store = store().await;
        store
            .upsert_collection(&Collection {
                address: "0x1111".into(),
                name: "Bazaar Pass".into(),
                symbol: "BZP".into(),
                icon_uri: String::new(),
            })
            .await
            .unwrap();
        store.upsert_token(&sample_token(1)).await.unwrap();
        store.upsert_orders(&[sample_order(1)]).await.unwrap();

        store.clear_derived().await.unwrap();

        assert_eq!(store.collections().await.unwrap().len(), 1);
        assert!(store.tokens_in_collection("0x1111").await.unwrap().is_empty());
        assert!(store.orders().await.unwrap().is_empty());
    }
}
