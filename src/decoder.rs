//! Decodes raw ledger logs into typed marketplace events.
//!
//! Dispatch is on the topic0 signature hash. Indexed parameters come from
//! topics, the rest from 32-byte words of the data payload with addresses
//! right-aligned in their word.

use std::sync::LazyLock;

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::rpc::types::Log;

pub const TRANSFER_SIG: &str = "Transfer(address,address,uint256)";
pub const METADATA_UPDATE_SIG: &str = "MetadataUpdate(uint256)";
pub const ORDER_CREATED_SIG: &str =
    "OrderCreated(uint256,address,uint256,address,uint256,address)";
pub const ORDER_CANCELLED_SIG: &str = "OrderCancelled(uint256)";
pub const ORDER_FULFILLED_SIG: &str = "OrderFulfilled(uint256,address)";
pub const COLLECTION_DEPLOYED_SIG: &str = "NFTContractDeployed(address,string,string)";

pub static TRANSFER_TOPIC: LazyLock<B256> = LazyLock::new(|| keccak256(TRANSFER_SIG));
pub static METADATA_UPDATE_TOPIC: LazyLock<B256> =
    LazyLock::new(|| keccak256(METADATA_UPDATE_SIG));
pub static ORDER_CREATED_TOPIC: LazyLock<B256> = LazyLock::new(|| keccak256(ORDER_CREATED_SIG));
pub static ORDER_CANCELLED_TOPIC: LazyLock<B256> =
    LazyLock::new(|| keccak256(ORDER_CANCELLED_SIG));
pub static ORDER_FULFILLED_TOPIC: LazyLock<B256> =
    LazyLock::new(|| keccak256(ORDER_FULFILLED_SIG));
pub static COLLECTION_DEPLOYED_TOPIC: LazyLock<B256> =
    LazyLock::new(|| keccak256(COLLECTION_DEPLOYED_SIG));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{event}: expected {expected} topics, log has {actual}")]
    MissingTopics {
        event: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{event}: data payload is {actual} bytes, need at least {expected}")]
    ShortData {
        event: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{event}: id {value} exceeds u64 range")]
    IdRange { event: &'static str, value: U256 },
}

/// A decoded marketplace event.
///
/// `Unknown` is a value, not an error: generic collection feeds carry
/// events outside our vocabulary and callers decide whether that matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Transfer {
        from: Address,
        to: Address,
        token_id: U256,
    },
    MetadataUpdate {
        token_id: U256,
    },
    OrderCreated {
        order_id: u64,
        nft: Address,
        token_id: U256,
        payment_token: Address,
        price: U256,
        seller: Address,
    },
    OrderCancelled {
        order_id: u64,
    },
    OrderFulfilled {
        order_id: u64,
        buyer: Address,
    },
    CollectionDeployed {
        nft: Address,
    },
    Unknown {
        topic: Option<B256>,
    },
}

pub fn decode_log(log: &Log) -> Result<ChainEvent, DecodeError> {
    let topics = log.inner.topics();
    let Some(&topic0) = topics.first() else {
        return Ok(ChainEvent::Unknown { topic: None });
    };
    let data: &[u8] = log.inner.data.data.as_ref();

    if topic0 == *TRANSFER_TOPIC {
        require_topics("Transfer", topics, 4)?;
        Ok(ChainEvent::Transfer {
            from: topic_address(&topics[1]),
            to: topic_address(&topics[2]),
            token_id: topic_u256(&topics[3]),
        })
    } else if topic0 == *METADATA_UPDATE_TOPIC {
        let token_id = if topics.len() > 1 {
            topic_u256(&topics[1])
        } else {
            word_u256(word("MetadataUpdate", data, 0)?)
        };
        Ok(ChainEvent::MetadataUpdate { token_id })
    } else if topic0 == *ORDER_CREATED_TOPIC {
        require_topics("OrderCreated", topics, 4)?;
        Ok(ChainEvent::OrderCreated {
            order_id: small_id("OrderCreated", topic_u256(&topics[1]))?,
            nft: topic_address(&topics[2]),
            token_id: topic_u256(&topics[3]),
            payment_token: word_address(word("OrderCreated", data, 0)?),
            price: word_u256(word("OrderCreated", data, 1)?),
            seller: word_address(word("OrderCreated", data, 2)?),
        })
    } else if topic0 == *ORDER_CANCELLED_TOPIC {
        require_topics("OrderCancelled", topics, 2)?;
        Ok(ChainEvent::OrderCancelled {
            order_id: small_id("OrderCancelled", topic_u256(&topics[1]))?,
        })
    } else if topic0 == *ORDER_FULFILLED_TOPIC {
        require_topics("OrderFulfilled", topics, 2)?;
        let buyer = if topics.len() > 2 {
            topic_address(&topics[2])
        } else if data.len() >= 32 {
            word_address(word("OrderFulfilled", data, 0)?)
        } else {
            Address::ZERO
        };
        Ok(ChainEvent::OrderFulfilled {
            order_id: small_id("OrderFulfilled", topic_u256(&topics[1]))?,
            buyer,
        })
    } else if topic0 == *COLLECTION_DEPLOYED_TOPIC {
        require_topics("NFTContractDeployed", topics, 2)?;
        Ok(ChainEvent::CollectionDeployed { nft: topic_address(&topics[1]) })
    } else {
        Ok(ChainEvent::Unknown { topic: Some(topic0) })
    }
}

fn require_topics(
    event: &'static str,
    topics: &[B256],
    expected: usize,
) -> Result<(), DecodeError> {
    if topics.len() < expected {
        return Err(DecodeError::MissingTopics { event, expected, actual: topics.len() });
    }
    Ok(())
}

fn word(event: &'static str, data: &[u8], index: usize) -> Result<[u8; 32], DecodeError> {
    let start = index * 32;
    let end = start + 32;
    let slice = data.get(start..end).ok_or(DecodeError::ShortData {
        event,
        expected: end,
        actual: data.len(),
    })?;
    let mut out = [0u8; 32];
    out.copy_from_slice(slice);
    Ok(out)
}

fn topic_address(topic: &B256) -> Address {
    Address::from_word(*topic)
}

fn topic_u256(topic: &B256) -> U256 {
    U256::from_be_bytes(topic.0)
}

fn word_address(word: [u8; 32]) -> Address {
    Address::from_slice(&word[12..])
}

fn word_u256(word: [u8; 32]) -> U256 {
    U256::from_be_bytes(word)
}

fn small_id(event: &'static str, value: U256) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| DecodeError::IdRange { event, value })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Bytes, LogData};

    use super::*;

    fn make_log(topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0x11),
                data: LogData::new_unchecked(topics, Bytes::from(data)),
            },
            block_hash: None,
            block_number: Some(10),
            block_timestamp: None,
            transaction_hash: None,
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

    #[test]
    fn transfer_decodes_indexed_parties_and_token() {
        let from = Address::repeat_byte(0xaa);
        let to = Address::repeat_byte(0xbb);
        let log = make_log(
            vec![*TRANSFER_TOPIC, addr_word(from), addr_word(to), uint_word(42)],
            vec![],
        );

        assert_eq!(
            decode_log(&log).unwrap(),
            ChainEvent::Transfer { from, to, token_id: U256::from(42) }
        );
    }

    #[test]
    fn transfer_with_missing_topics_is_an_error() {
        let log = make_log(vec![*TRANSFER_TOPIC, addr_word(Address::ZERO)], vec![]);
        assert_eq!(
            decode_log(&log),
            Err(DecodeError::MissingTopics { event: "Transfer", expected: 4, actual: 2 })
        );
    }

    #[test]
    fn metadata_update_reads_token_from_data() {
        let log = make_log(vec![*METADATA_UPDATE_TOPIC], uint_word(7).to_vec());
        assert_eq!(
            decode_log(&log).unwrap(),
            ChainEvent::MetadataUpdate { token_id: U256::from(7) }
        );
    }

    #[test]
    fn order_created_splits_topics_and_data_words() {
        let nft = Address::repeat_byte(0x22);
        let payment = Address::repeat_byte(0x33);
        let seller = Address::repeat_byte(0x44);
        let mut data = addr_word(payment).to_vec();
        data.extend_from_slice(&uint_word(1_000_000).0);
        data.extend_from_slice(&addr_word(seller).0);

        let log = make_log(
            vec![*ORDER_CREATED_TOPIC, uint_word(3), addr_word(nft), uint_word(9)],
            data,
        );

        assert_eq!(
            decode_log(&log).unwrap(),
            ChainEvent::OrderCreated {
                order_id: 3,
                nft,
                token_id: U256::from(9),
                payment_token: payment,
                price: U256::from(1_000_000),
                seller,
            }
        );
    }

    #[test]
    fn order_created_with_truncated_data_is_an_error() {
        let log = make_log(
            vec![
                *ORDER_CREATED_TOPIC,
                uint_word(3),
                addr_word(Address::ZERO),
                uint_word(9),
            ],
            vec![0u8; 40],
        );
        assert!(matches!(
            decode_log(&log),
            Err(DecodeError::ShortData { event: "OrderCreated", .. })
        ));
    }

    #[test]
    fn order_lifecycle_events_decode_ids() {
        let cancel = make_log(vec![*ORDER_CANCELLED_TOPIC, uint_word(5)], vec![]);
        assert_eq!(
            decode_log(&cancel).unwrap(),
            ChainEvent::OrderCancelled { order_id: 5 }
        );

        let buyer = Address::repeat_byte(0x66);
        let fulfilled = make_log(
            vec![*ORDER_FULFILLED_TOPIC, uint_word(5)],
            addr_word(buyer).to_vec(),
        );
        assert_eq!(
            decode_log(&fulfilled).unwrap(),
            ChainEvent::OrderFulfilled { order_id: 5, buyer }
        );
    }

    #[test]
    fn oversized_order_id_is_rejected() {
        let log = make_log(
            vec![*ORDER_CANCELLED_TOPIC, B256::from(U256::MAX)],
            vec![],
        );
        assert!(matches!(
            decode_log(&log),
            Err(DecodeError::IdRange { event: "OrderCancelled", .. })
        ));
    }

    #[test]
    fn collection_deployment_decodes_address() {
        let nft = Address::repeat_byte(0x77);
        let log = make_log(vec![*COLLECTION_DEPLOYED_TOPIC, addr_word(nft)], vec![]);
        assert_eq!(
            decode_log(&log).unwrap(),
            ChainEvent::CollectionDeployed { nft }
        );
    }

    #[test]
    fn unrecognized_topic_is_a_value_not_an_error() {
        let topic = keccak256("Approval(address,address,uint256)");
        let log = make_log(vec![topic], vec![]);
        assert_eq!(
            decode_log(&log).unwrap(),
            ChainEvent::Unknown { topic: Some(topic) }
        );

        let empty = make_log(vec![], vec![]);
        assert_eq!(decode_log(&empty).unwrap(), ChainEvent::Unknown { topic: None });
    }
}
