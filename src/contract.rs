//! Typed read helpers over raw contract clients.

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, U256};
use bazaar_chain::{ChainError, ContractClient};

fn mismatch(method: &str, reason: impl Into<String>) -> ChainError {
    ChainError::AbiMismatch { method: method.to_string(), reason: reason.into() }
}

fn single_string(method: &str, values: Vec<DynSolValue>) -> Result<String, ChainError> {
    match values.into_iter().next() {
        Some(DynSolValue::String(value)) => Ok(value),
        other => Err(mismatch(method, format!("expected string return, got {other:?}"))),
    }
}

fn single_uint(method: &str, values: Vec<DynSolValue>) -> Result<U256, ChainError> {
    match values.into_iter().next() {
        Some(DynSolValue::Uint(value, _)) => Ok(value),
        other => Err(mismatch(method, format!("expected uint return, got {other:?}"))),
    }
}

fn single_address(method: &str, values: Vec<DynSolValue>) -> Result<Address, ChainError> {
    match values.into_iter().next() {
        Some(DynSolValue::Address(value)) => Ok(value),
        other => Err(mismatch(method, format!("expected address return, got {other:?}"))),
    }
}

pub async fn name(client: &dyn ContractClient) -> Result<String, ChainError> {
    single_string("name", client.call("name", &[]).await?)
}

pub async fn symbol(client: &dyn ContractClient) -> Result<String, ChainError> {
    single_string("symbol", client.call("symbol", &[]).await?)
}

pub async fn token_icon_uri(client: &dyn ContractClient) -> Result<String, ChainError> {
    single_string("tokenIconURI", client.call("tokenIconURI", &[]).await?)
}

pub async fn total_supply(client: &dyn ContractClient) -> Result<u64, ChainError> {
    let supply = single_uint("totalSupply", client.call("totalSupply", &[]).await?)?;
    u64::try_from(supply).map_err(|_| mismatch("totalSupply", format!("{supply} out of range")))
}

pub async fn token_uri(client: &dyn ContractClient, token_id: u64) -> Result<String, ChainError> {
    let args = [DynSolValue::Uint(U256::from(token_id), 256)];
    single_string("tokenURI", client.call("tokenURI", &args).await?)
}

pub async fn owner_of(client: &dyn ContractClient, token_id: u64) -> Result<Address, ChainError> {
    let args = [DynSolValue::Uint(U256::from(token_id), 256)];
    single_address("ownerOf", client.call("ownerOf", &args).await?)
}

/// A listing as the marketplace contract reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOrder {
    pub nft: Address,
    pub token_id: U256,
    pub payment_token: Address,
    pub price: U256,
    pub seller: Address,
    pub status: u8,
}

/// Fetches the authoritative order book via `getOrders`.
pub async fn orders(client: &dyn ContractClient) -> Result<Vec<ChainOrder>, ChainError> {
    let values = client.call("getOrders", &[]).await?;
    let items = match values.into_iter().next() {
        Some(DynSolValue::Array(items)) => items,
        other => {
            return Err(mismatch("getOrders", format!("expected order array, got {other:?}")))
        }
    };
    items.into_iter().map(decode_order_tuple).collect()
}

fn decode_order_tuple(value: DynSolValue) -> Result<ChainOrder, ChainError> {
    let fields = match value {
        DynSolValue::Tuple(fields) => fields,
        other => {
            return Err(mismatch("getOrders", format!("expected order tuple, got {other:?}")))
        }
    };
    if fields.len() != 6 {
        return Err(mismatch(
            "getOrders",
            format!("expected 6 order fields, got {}", fields.len()),
        ));
    }
    let mut fields = fields.into_iter();
    let field = |label: &str, value: Option<DynSolValue>| {
        value.ok_or_else(|| mismatch("getOrders", format!("missing field {label}")))
    };

    let nft = match field("nft", fields.next())? {
        DynSolValue::Address(value) => value,
        other => return Err(mismatch("getOrders", format!("nft: {other:?}"))),
    };
    let token_id = match field("tokenId", fields.next())? {
        DynSolValue::Uint(value, _) => value,
        other => return Err(mismatch("getOrders", format!("tokenId: {other:?}"))),
    };
    let payment_token = match field("token", fields.next())? {
        DynSolValue::Address(value) => value,
        other => return Err(mismatch("getOrders", format!("token: {other:?}"))),
    };
    let price = match field("price", fields.next())? {
        DynSolValue::Uint(value, _) => value,
        other => return Err(mismatch("getOrders", format!("price: {other:?}"))),
    };
    let seller = match field("seller", fields.next())? {
        DynSolValue::Address(value) => value,
        other => return Err(mismatch("getOrders", format!("seller: {other:?}"))),
    };
    let status = match field("status", fields.next())? {
        DynSolValue::Uint(value, _) => u8::try_from(value)
            .map_err(|_| mismatch("getOrders", format!("status {value} out of range")))?,
        other => return Err(mismatch("getOrders", format!("status: {other:?}"))),
    };

    Ok(ChainOrder { nft, token_id, payment_token, price, seller, status })
}
