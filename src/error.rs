//! Error taxonomy for the indexing engine.

use alloy::primitives::{B256, U256};
use bazaar_chain::ChainError;
use bazaar_store::StoreError;

use crate::decoder::DecodeError;
use crate::metadata::MetadataError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("metadata for `{uri}` unavailable: {source}")]
    Metadata {
        uri: String,
        #[source]
        source: MetadataError,
    },
    #[error("unrecognized event topic {topic:?}")]
    UnknownEvent { topic: Option<B256> },
    #[error("token id {0} exceeds the supported range")]
    TokenIdRange(U256),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the failure is a plain lookup miss rather than an
    /// infrastructure fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound))
    }
}
