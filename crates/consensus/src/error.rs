//! Consensus error types.
//!
//! Several of these messages are wire-visible: validators match on the
//! rendered prefixes, so the strings (including the historical
//! `rreversible` spelling) are stable and must not be reworded.

use meridian_core::{AccountError, ChainError, StateError};
use meridian_crypto::CryptoError;
use thiserror::Error;

/// Result type alias for consensus operations
pub type Result<T> = std::result::Result<T, DposError>;

/// Errors surfaced by the DPoS consensus engine.
#[derive(Debug, Error)]
pub enum DposError {
    /// The header extra field does not carry the trailing seal.
    #[error("extra-data 65 byte suffix signature missing")]
    MissingSignature,

    /// The block timestamp is not aligned to a production slot.
    #[error("invalid time to mint the block")]
    InvalidMintBlockTime,

    /// The producer does not match the scheduled slot holder.
    #[error("invalid block candidate {candidate}, expect {expected} index {offset} (epoch {epoch})")]
    InvalidBlockCandidate {
        /// The producer named in the header
        candidate: String,
        /// The producer the schedule expects
        expected: String,
        /// The primary slot index for the block timestamp
        offset: u64,
        /// The epoch whose state holds the active schedule
        epoch: u64,
    },

    /// The block timestamp precedes the parent's next slot.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// The candidate name violates the account-name rules.
    #[error("illegal candidate name {0}")]
    IllegalCandidateName(String),

    /// None of the offered public keys is registered for the producer.
    #[error("illegal candidate pubkey")]
    IllegalCandidatePubKey,

    /// Too many blocks without irreversibility progress.
    #[error("too much rreversible blocks")]
    TooMuchIrreversible,

    /// The system account has taken over block production.
    #[error("system account take over")]
    SystemTakeOver,

    /// The referenced block does not exist.
    #[error("unknown block")]
    UnknownBlock,

    /// The candidate URL exceeds the configured maximum.
    #[error("invalid url {url}(too long, max {max})")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Maximum permitted length
        max: u64,
    },

    /// The stake is not a valid quantity for the operation.
    #[error("invalid stake {stake}({reason})")]
    InvalidStake {
        /// The offending stake amount
        stake: u128,
        /// Why it was rejected
        reason: String,
    },

    /// A candidate with this name already exists.
    #[error("invalid candidate {0}(already exist)")]
    CandidateExists(String),

    /// No candidate with this name exists.
    #[error("invalid candidate {0}(not exist)")]
    CandidateNotFound(String),

    /// The candidate has been blacklisted.
    #[error("invalid candidate {0}(in blacklist)")]
    CandidateInBlacklist(String),

    /// The operation requires a candidate in the `Normal` state.
    #[error("invalid candidate {0}(not normal)")]
    CandidateNotNormal(String),

    /// The operation requires a candidate in the `Freeze` state.
    #[error("invalid candidate {0}(not in freezelist)")]
    CandidateNotFrozen(String),

    /// No global state exists for the epoch.
    #[error("state not found for epoch {0}")]
    EpochNotFound(u64),

    /// A schedule index is out of range.
    #[error("index {index} out of schedule (len {len})")]
    IndexOutOfSchedule {
        /// The requested index
        index: u64,
        /// The schedule length
        len: u64,
    },

    /// The configuration is inconsistent.
    #[error("invalid config: {0}")]
    Config(String),

    /// Sealing was requested before a sign function was installed.
    #[error("missing sign function")]
    MissingSignFn,

    /// A persisted record failed to decode.
    #[error("record codec error: {0}")]
    Codec(#[from] rlp::DecoderError),

    /// A state-store error.
    #[error(transparent)]
    State(#[from] StateError),

    /// An account-module error.
    #[error(transparent)]
    Account(#[from] AccountError),

    /// A chain-reader error.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// A signature-layer error.
    #[error("signature error: {0}")]
    Crypto(#[from] CryptoError),
}
