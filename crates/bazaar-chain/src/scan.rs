//! Historical backfill: creation-block discovery and ordered log replay.

use alloy::primitives::B256;
use alloy::rpc::types::Log;

use crate::client::{ChainError, ContractClient};

/// Finds the block at which the contract was deployed by bisecting
/// `[0, head]` on code presence.
///
/// Code presence is monotone over block height for non-self-destructing
/// contracts, so the first block with code is the creation block. Costs
/// `O(log head)` code queries instead of a linear scan.
pub async fn creation_block(client: &dyn ContractClient) -> Result<u64, ChainError> {
    let head = client.head_block().await?;
    if !client.has_code_at(head).await? {
        return Err(ChainError::NoCode(client.address()));
    }

    let (mut lo, mut hi) = (0u64, head);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if client.has_code_at(mid).await? {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}

/// Fetches the contract's logs over the inclusive range, restricted to the
/// given topic0 signatures, in `(block, log index)` order.
pub async fn replay_range(
    client: &dyn ContractClient,
    from_block: u64,
    to_block: u64,
    topic0: Vec<B256>,
) -> Result<Vec<Log>, ChainError> {
    tracing::debug!(
        target: "bazaar_chain::scan",
        contract = %client.address(),
        from_block,
        to_block,
        "replaying historical logs"
    );
    client.logs_in_range(from_block, to_block, topic0).await
}
