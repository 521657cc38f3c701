//! # Meridian Core
//!
//! Trait seams between the consensus engine and the host node.
//!
//! The DPoS engine never owns storage, accounts, or chain data; it drives
//! them through the traits defined here:
//!
//! - [`traits::State`] - namespaced key-value access to the state trie,
//!   including historical snapshot reads
//! - [`traits::AccountManager`] - balance transfers, issuance, historical
//!   balances, and signing-key checks
//! - [`traits::Snapshots`] - registration of snapshot windows
//! - [`traits::NodeState`] - the umbrella the engine is handed per block
//! - [`traits::ChainReader`] - header and state lookups along the chain

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod traits;

pub use traits::{
    AccountError, AccountManager, ChainConfig, ChainError, ChainReader, NodeState, SnapshotInfo,
    Snapshots, State, StateError, StateResult,
};
