//! Chain-reader trait: header and state lookups along the canonical chain.

use crate::traits::{NodeState, StateError};
use meridian_types::{Block, BlockHeader, H256};
use thiserror::Error;

/// Host-chain parameters the consensus engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    /// Chain identifier, mixed into every signing digest
    pub chain_id: u64,
    /// Width of a snapshot window in milliseconds
    pub snapshot_interval: u64,
}

/// Errors that can occur reading the chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The referenced block is not known to this node.
    #[error("unknown block")]
    UnknownBlock,

    /// No state is available for the requested root.
    #[error("state unavailable for root {0}")]
    StateUnavailable(H256),

    /// A state-store error occurred.
    #[error(transparent)]
    State(#[from] StateError),

    /// Generic internal error.
    #[error("internal chain error: {0}")]
    Internal(String),
}

/// Read access to headers and historical state along the canonical chain.
pub trait ChainReader {
    /// Returns the chain parameters.
    fn config(&self) -> &ChainConfig;

    /// Returns the current head header.
    fn current_header(&self) -> BlockHeader;

    /// Retrieves a header by hash and number.
    fn get_header(&self, hash: &H256, number: u64) -> Option<BlockHeader>;

    /// Retrieves a header by hash.
    fn get_header_by_hash(&self, hash: &H256) -> Option<BlockHeader>;

    /// Retrieves a header by number on the canonical chain.
    fn get_header_by_number(&self, number: u64) -> Option<BlockHeader>;

    /// Opens the state committed by the block with the given root.
    fn state_at(&self, root: H256) -> Result<Box<dyn NodeState>, ChainError>;

    /// Applies any scheduled hard-fork transition for the given block.
    fn fork_update(&self, block: &Block, state: &mut dyn NodeState) -> Result<(), ChainError>;
}
