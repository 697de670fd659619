//! Raw log fixtures shaped exactly like the contracts emit them.

use alloy::primitives::{Address, Bytes, LogData, B256, U256};
use alloy::rpc::types::Log;
use bazaar::decoder::{
    COLLECTION_DEPLOYED_TOPIC, METADATA_UPDATE_TOPIC, ORDER_CANCELLED_TOPIC, ORDER_CREATED_TOPIC,
    ORDER_FULFILLED_TOPIC, TRANSFER_TOPIC,
};

fn raw_log(address: Address, topics: Vec<B256>, data: Vec<u8>, block: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: LogData::new_unchecked(topics, Bytes::from(data)),
        },
        block_hash: None,
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(B256::from(U256::from(block + 1))),
        transaction_index: None,
        log_index: Some(0),
        removed: false,
    }
}

fn addr_word(address: Address) -> B256 {
    address.into_word()
}

fn uint_word(value: u64) -> B256 {
    B256::from(U256::from(value))
}

pub fn transfer_log(contract: Address, from: Address, to: Address, token_id: u64, block: u64) -> Log {
    raw_log(
        contract,
        vec![*TRANSFER_TOPIC, addr_word(from), addr_word(to), uint_word(token_id)],
        vec![],
        block,
    )
}

pub fn metadata_update_log(contract: Address, token_id: u64, block: u64) -> Log {
    raw_log(
        contract,
        vec![*METADATA_UPDATE_TOPIC],
        uint_word(token_id).to_vec(),
        block,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn order_created_log(
    market: Address,
    order_id: u64,
    nft: Address,
    token_id: u64,
    payment_token: Address,
    price: u64,
    seller: Address,
    block: u64,
) -> Log {
    let mut data = addr_word(payment_token).to_vec();
    data.extend_from_slice(&uint_word(price).0);
    data.extend_from_slice(&addr_word(seller).0);
    raw_log(
        market,
        vec![*ORDER_CREATED_TOPIC, uint_word(order_id), addr_word(nft), uint_word(token_id)],
        data,
        block,
    )
}

pub fn order_cancelled_log(market: Address, order_id: u64, block: u64) -> Log {
    raw_log(market, vec![*ORDER_CANCELLED_TOPIC, uint_word(order_id)], vec![], block)
}

pub fn order_fulfilled_log(market: Address, order_id: u64, buyer: Address, block: u64) -> Log {
    raw_log(
        market,
        vec![*ORDER_FULFILLED_TOPIC, uint_word(order_id)],
        addr_word(buyer).to_vec(),
        block,
    )
}

pub fn collection_deployed_log(market: Address, nft: Address, block: u64) -> Log {
    raw_log(market, vec![*COLLECTION_DEPLOYED_TOPIC, addr_word(nft)], vec![], block)
}
