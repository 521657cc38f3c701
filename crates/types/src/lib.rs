//! # Meridian Types
//!
//! Core type definitions for the Meridian blockchain.
//!
//! This crate provides the fundamental types used throughout Meridian:
//! - [`Name`] - human-readable account names used for producers and voters
//! - [`H256`] - 32-byte hashes with Keccak256 support
//! - [`Block`] and [`BlockHeader`] - block structures with the trailing
//!   65-byte producer seal in the header extra field
//! - [`Action`] - internal asset movements queued into block receipts
//!
//! ## Example
//!
//! ```rust
//! use meridian_types::{BlockHeader, Name, H256};
//!
//! let coinbase: Name = "alice".parse().unwrap();
//! let header = BlockHeader {
//!     coinbase,
//!     number: 1,
//!     ..Default::default()
//! };
//! assert_ne!(header.hash(), H256::NIL);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod action;
pub mod block;
pub mod hash;
pub mod name;
pub mod rlp_codec;

// Re-export main types at crate root
pub use action::{Action, ActionKind, Receipt, Transaction};
pub use block::{Block, BlockHeader, SEAL_LENGTH};
pub use hash::{keccak256, keccak256_concat, H256};
pub use name::Name;

/// Result type alias for Meridian type operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Meridian types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid account name
    #[error("invalid account name: {0}")]
    InvalidName(String),

    /// Invalid hash format
    #[error("invalid hash format: {0}")]
    InvalidHash(String),

    /// RLP decoding error
    #[error("RLP decode error: {0}")]
    RlpDecode(#[from] rlp::DecoderError),
}
