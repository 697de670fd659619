//! Row types for the derived dataset.
//!
//! Addresses are stored as lowercase `0x`-prefixed hex strings so that rows
//! compare and join consistently regardless of how the address arrived.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub icon_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub contract: String,
    pub token_id: u64,
    pub owner: String,
    pub token_uri: String,
    pub name: String,
    pub description: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAttribute {
    pub trait_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Open),
            1 => Some(Self::Fulfilled),
            2 => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Fulfilled => 1,
            Self::Cancelled => 2,
        }
    }
}

/// A marketplace listing.
///
/// `id` is the stored id: the on-chain order id plus one, so on-chain id
/// zero maps to row one and zero never appears as a stored key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub nft_contract: String,
    pub token_id: u64,
    pub payment_token: String,
    /// Decimal string; listing prices exceed u64 range.
    pub price: String,
    pub seller: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Mint,
    Transfer,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::Transfer => "transfer",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "mint" => Some(Self::Mint),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// One row of a token's transfer history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub contract: String,
    pub token_id: u64,
    pub kind: TransferKind,
    pub from: String,
    pub to: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
}
