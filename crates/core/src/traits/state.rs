//! State-store and account-module traits.
//!
//! The consensus engine runs single-threaded inside the block-processing
//! pipeline (one state per block), so these seams are synchronous: every
//! call is a plain store access and the caller serialises block processing.

use meridian_types::Name;
use thiserror::Error;

/// Errors that can occur during state-store operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested key was not found.
    #[error("key not found")]
    NotFound,

    /// A store I/O error occurred.
    #[error("state I/O error: {0}")]
    Io(String),

    /// Data corruption was detected.
    #[error("state corruption: {0}")]
    Corruption(String),

    /// Generic internal error.
    #[error("internal state error: {0}")]
    Internal(String),
}

/// Result type for state-store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Namespaced key-value access to the host state trie.
///
/// All DPoS records live under a single account namespace; the consensus
/// module is their sole writer. `get_snapshot` reads the value a key held
/// at or before the given timestamp, served from the host's snapshot store.
pub trait State {
    /// Get a value by key under an account namespace.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, account: &str, key: &str) -> StateResult<Option<Vec<u8>>>;

    /// Put a key-value pair under an account namespace.
    fn put(&mut self, account: &str, key: &str, value: Vec<u8>) -> StateResult<()>;

    /// Delete a key under an account namespace.
    ///
    /// Returns `Ok(())` even if the key does not exist.
    fn delete(&mut self, account: &str, key: &str) -> StateResult<()>;

    /// Historical read of a key at or before `timestamp` (milliseconds).
    fn get_snapshot(&self, account: &str, key: &str, timestamp: u64) -> StateResult<Option<Vec<u8>>>;

    /// The state root over everything written so far; committed into the
    /// header when a block is finalized.
    fn intermediate_root(&self) -> meridian_types::H256;
}

/// Errors surfaced by the account/asset module.
#[derive(Debug, Error)]
pub enum AccountError {
    /// The account does not exist.
    #[error("account not found: {0}")]
    NotFound(String),

    /// The account balance does not cover the transfer.
    #[error("insufficient balance: account {account} needs {needed}, has {available}")]
    InsufficientBalance {
        /// The debited account
        account: String,
        /// Amount required
        needed: u128,
        /// Amount available
        available: u128,
    },

    /// Generic internal error.
    #[error("internal account error: {0}")]
    Internal(String),
}

/// Balance transfers, issuance, historical balances, and key checks,
/// provided by the host account/asset module.
pub trait AccountManager {
    /// Transfers `amount` of `asset_id` from `from` to `to`.
    fn transfer_asset(
        &mut self,
        from: &Name,
        to: &Name,
        asset_id: u64,
        amount: u128,
    ) -> Result<(), AccountError>;

    /// Issues `amount` of `asset_id` to `to`, accounted against `from`.
    fn inc_asset_to_account(
        &mut self,
        from: &Name,
        to: &Name,
        asset_id: u64,
        amount: u128,
    ) -> Result<(), AccountError>;

    /// Returns the balance `name` held at or before `timestamp`.
    fn get_balance_by_time(
        &self,
        name: &Name,
        asset_id: u64,
        timestamp: u64,
    ) -> Result<u128, AccountError>;

    /// Checks whether `pubkey` is a registered signing key of `name`.
    fn is_valid_sign(&self, name: &Name, pubkey: &[u8]) -> bool;
}

/// Block position recorded for a snapshot window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Number of the block that closed the window
    pub number: u64,
    /// Hash of its parent
    pub block_hash: meridian_types::H256,
    /// Start of the previous window (milliseconds)
    pub timestamp: u64,
}

/// Registration of snapshot windows with the host snapshot store.
pub trait Snapshots {
    /// Records that the snapshot window starting at `timestamp` has closed.
    fn set_snapshot(&mut self, timestamp: u64, info: SnapshotInfo) -> StateResult<()>;
}

/// The per-block state handle the engine is handed: key-value state,
/// account module, and snapshot registration over the same underlying trie.
pub trait NodeState: State + AccountManager + Snapshots {}

impl<T: State + AccountManager + Snapshots + ?Sized> NodeState for T {}
