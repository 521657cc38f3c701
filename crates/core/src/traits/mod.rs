//! Collaborator traits consumed by the consensus engine.

mod chain;
mod state;

pub use chain::{ChainConfig, ChainError, ChainReader};
pub use state::{
    AccountError, AccountManager, NodeState, SnapshotInfo, Snapshots, State, StateError,
    StateResult,
};
