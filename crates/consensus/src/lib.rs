//! # Meridian Consensus
//!
//! The Delegated Proof-of-Stake consensus engine of the Meridian
//! blockchain: election, scheduling, block-production accounting, mid-epoch
//! replacement, and irreversibility.
//!
//! ## Architecture
//!
//! Time is divided into fixed **epochs**; each epoch runs one activated
//! producer schedule of `candidate_schedule_size` primary slots plus
//! `backup_schedule_size` backups, elected from candidate stake when the
//! epoch opens and effective when the next one does. Within an epoch the
//! primary slots rotate every `block_frequency` blocks.
//!
//! Producers are held accountable through two counters: the slots they
//! *should* have produced and the blocks they *actually* did. At every
//! mini-epoch group boundary, primaries that missed at least half of their
//! expected blocks are replaced by backups for the rest of the epoch.
//!
//! Each sealed header declares its producer's highest irreversible block;
//! the lower-third quantile of recent declarations yields the BFT
//! irreversibility height. If irreversibility stalls or block production
//! gaps for more than two mini-epochs, the configured system account may
//! take over production until manually released.
//!
//! ## Entry points
//!
//! - [`Dpos`] - the engine (`prepare`/`finalize`/`seal`/`verify_seal` and
//!   the chain queries)
//! - [`System`] - the vote subsystem (registration, voting, kick-outs,
//!   elections), driven by transaction execution
//! - [`genesis`] - seeds the epoch-0 state
//!
//! The engine owns no storage: the host hands it a per-block state handle
//! and a chain reader through the `meridian-core` traits.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod irreversible;
pub mod schema;
pub mod system;

pub use config::{Dialect, DposConfig};
pub use engine::{genesis, ecrecover, ActivatedCandidate, CancelToken, Dpos, SignFn};
pub use error::{DposError, Result};
pub use irreversible::ProducerLru;
pub use schema::{ActivatedCandidateInfo, CandidateInfo, CandidateType, DposDb, GlobalState, VoterInfo};
pub use system::System;
