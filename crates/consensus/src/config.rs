//! DPoS configuration and the timing arithmetic derived from it.
//!
//! Every duration is a Unix-millisecond quantity. An epoch is divided into
//! mini-epochs; mini-epochs are grouped by `min_mepoch` for replacement
//! decisions; within an epoch the primary schedule rotates one slot every
//! `block_frequency` blocks.

use crate::error::{DposError, Result};
use meridian_types::Name;
use serde::{Deserialize, Serialize};

/// The consensus dialect selected by a header's fork id.
///
/// Two closely related state-transition rules coexist: replaying historical
/// blocks requires the legacy one exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Pre-fork rules (fork id 0): counters accrue in `Prepare`, replacement
    /// walks the header chain in `Finalize`.
    Legacy,
    /// Post-fork rules (fork id >= 1): counters accrue in `Finalize`,
    /// replacement uses the activated-candidate snapshots.
    V1,
}

impl Dialect {
    /// Resolves the dialect for a header fork id.
    pub fn for_fork(fid: u64) -> Self {
        if fid == 0 {
            Dialect::Legacy
        } else {
            Dialect::V1
        }
    }
}

/// DPoS consensus parameters.
///
/// A pure value; the engine and the vote subsystem borrow it read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DposConfig {
    /// Account namespace holding every DPoS record
    pub account_name: Name,
    /// The system producer, permitted to take over on liveness failure
    pub system_name: Name,
    /// URL registered for the system producer at genesis
    pub system_url: String,
    /// Asset staked and paid as rewards
    pub asset_id: u64,
    /// The indivisible stake quantum; all stakes are multiples of it
    pub unit_stake: u128,
    /// Number of primary producer slots per epoch
    pub candidate_schedule_size: u64,
    /// Number of backup producers appended to the schedule
    pub backup_schedule_size: u64,
    /// Minimum self-stake of a candidate, in unit-stake multiples
    pub candidate_min_quantity: u128,
    /// Minimum single vote, in unit-stake multiples
    pub voter_min_quantity: u128,
    /// Global stake, in unit-stake multiples, required to activate DPoS
    pub activated_min_quantity: u128,
    /// Block interval in milliseconds
    pub block_interval: u64,
    /// Epoch interval in milliseconds
    pub epoch_interval: u64,
    /// Number of mini-epochs per epoch
    pub mepochs_per_epoch: u64,
    /// Mini-epochs per replacement decision group
    pub min_mepoch: u64,
    /// Consecutive blocks a producer mints before the slot rotates
    pub block_frequency: u64,
    /// Maximum candidate URL length in bytes
    pub max_url_len: u64,
    /// Chain reference time (milliseconds); epoch 0 starts here
    pub reference_time: u64,
    /// Base block reward in asset units
    pub block_reward: u128,
    /// Extra reward stub (multiplied by a constant zero counter)
    pub extra_block_reward: u128,
}

impl Default for DposConfig {
    fn default() -> Self {
        Self {
            account_name: Name::new("meridian.dpos").expect("static name"),
            system_name: Name::new("meridian.sys").expect("static name"),
            system_url: "meridian.network".to_string(),
            asset_id: 1,
            unit_stake: 1_000,
            candidate_schedule_size: 21,
            backup_schedule_size: 10,
            candidate_min_quantity: 10,
            voter_min_quantity: 1,
            activated_min_quantity: 4_200,
            block_interval: 3_000,
            epoch_interval: 3_600_000,
            mepochs_per_epoch: 10,
            min_mepoch: 1,
            block_frequency: 6,
            max_url_len: 512,
            reference_time: 0,
            block_reward: 5_000_000_000_000_000_000,
            extra_block_reward: 1_000_000_000_000_000_000,
        }
    }
}

impl DposConfig {
    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.block_interval == 0 {
            return Err(DposError::Config("block interval must be non-zero".into()));
        }
        if self.unit_stake == 0 {
            return Err(DposError::Config("unit stake must be non-zero".into()));
        }
        if self.candidate_schedule_size == 0 {
            return Err(DposError::Config("schedule size must be non-zero".into()));
        }
        if self.block_frequency == 0 {
            return Err(DposError::Config("block frequency must be non-zero".into()));
        }
        if self.mepochs_per_epoch == 0 || self.min_mepoch == 0 {
            return Err(DposError::Config(
                "mini-epoch parameters must be non-zero".into(),
            ));
        }
        if self.epoch_interval % self.mepochs_per_epoch != 0 {
            return Err(DposError::Config(
                "epoch interval must divide evenly into mini-epochs".into(),
            ));
        }
        if self.mepoch_interval() % self.block_interval != 0 {
            return Err(DposError::Config(
                "mini-epoch interval must be a multiple of the block interval".into(),
            ));
        }
        Ok(())
    }

    /// Total schedule length: primaries plus backups.
    #[inline]
    pub fn schedule_size(&self) -> u64 {
        self.candidate_schedule_size + self.backup_schedule_size
    }

    /// Number of distinct producers that constitutes BFT consensus.
    #[inline]
    pub fn consensus_size(&self) -> u64 {
        2 * self.candidate_schedule_size / 3 + 1
    }

    /// Width of one mini-epoch in milliseconds.
    #[inline]
    pub fn mepoch_interval(&self) -> u64 {
        self.epoch_interval / self.mepochs_per_epoch
    }

    /// The production slot containing `timestamp`.
    #[inline]
    pub fn slot(&self, timestamp: u64) -> u64 {
        timestamp / self.block_interval
    }

    /// Start of the slot after the one containing `timestamp`.
    #[inline]
    pub fn next_slot(&self, timestamp: u64) -> u64 {
        (self.slot(timestamp) + 1) * self.block_interval
    }

    /// The epoch containing `timestamp`.
    #[inline]
    pub fn epoch(&self, timestamp: u64) -> u64 {
        timestamp.saturating_sub(self.reference_time) / self.epoch_interval
    }

    /// The first timestamp of `epoch`.
    #[inline]
    pub fn epoch_timestamp(&self, epoch: u64) -> u64 {
        epoch * self.epoch_interval + self.reference_time
    }

    /// The primary slot index scheduled to produce at `timestamp`.
    ///
    /// The legacy dialect reduces the absolute timestamp modulo the epoch
    /// interval; the post-fork dialect is epoch-relative. They agree when
    /// the reference time is a multiple of the epoch interval.
    pub fn get_offset(&self, timestamp: u64, dialect: Dialect) -> u64 {
        let rotation = self.block_interval * self.block_frequency;
        let in_epoch = match dialect {
            Dialect::Legacy => timestamp % self.epoch_interval,
            Dialect::V1 => timestamp.saturating_sub(self.epoch_timestamp(self.epoch(timestamp))),
        };
        in_epoch / rotation % self.candidate_schedule_size
    }

    /// The number of slots a producer is accountable for within
    /// `[timestamp, end)`, capped at one full production turn.
    pub fn should_counter(&self, timestamp: u64, end: u64) -> u64 {
        let remaining = end.saturating_sub(timestamp) / self.block_interval;
        remaining.min(self.block_frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DposConfig {
        DposConfig {
            block_interval: 1_000,
            epoch_interval: 48_000,
            mepochs_per_epoch: 4,
            min_mepoch: 1,
            block_frequency: 1,
            candidate_schedule_size: 4,
            backup_schedule_size: 2,
            reference_time: 0,
            ..DposConfig::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        DposConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_configs() {
        let mut cfg = config();
        cfg.block_interval = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.epoch_interval = 50_000; // not divisible by mepochs_per_epoch
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_epoch_math() {
        let cfg = config();
        assert_eq!(cfg.epoch(0), 0);
        assert_eq!(cfg.epoch(47_999), 0);
        assert_eq!(cfg.epoch(48_000), 1);
        assert_eq!(cfg.epoch_timestamp(1), 48_000);
        assert_eq!(cfg.mepoch_interval(), 12_000);
    }

    #[test]
    fn test_epoch_respects_reference_time() {
        let mut cfg = config();
        cfg.reference_time = 96_000;
        assert_eq!(cfg.epoch(95_000), 0); // pre-reference clamps to epoch 0
        assert_eq!(cfg.epoch(96_000), 0);
        assert_eq!(cfg.epoch(144_000), 1);
        assert_eq!(cfg.epoch_timestamp(1), 144_000);
    }

    #[test]
    fn test_slots() {
        let cfg = config();
        assert_eq!(cfg.slot(3_500), 3);
        assert_eq!(cfg.next_slot(3_500), 4_000);
        assert_eq!(cfg.next_slot(3_000), 4_000);
    }

    #[test]
    fn test_offset_rotation() {
        let cfg = config();
        // block_frequency 1, schedule size 4: one slot per block, wrapping.
        assert_eq!(cfg.get_offset(0, Dialect::V1), 0);
        assert_eq!(cfg.get_offset(1_000, Dialect::V1), 1);
        assert_eq!(cfg.get_offset(3_000, Dialect::V1), 3);
        assert_eq!(cfg.get_offset(4_000, Dialect::V1), 0);
    }

    #[test]
    fn test_offset_dialects_diverge_on_skewed_reference() {
        let mut cfg = config();
        cfg.reference_time = 1_000; // not a multiple of the epoch interval
        let t = 49_000; // epoch 1 starts here
        assert_eq!(cfg.get_offset(t, Dialect::V1), 0);
        assert_eq!(cfg.get_offset(t, Dialect::Legacy), 1);
    }

    #[test]
    fn test_should_counter_caps_at_block_frequency() {
        let mut cfg = config();
        cfg.block_frequency = 6;
        assert_eq!(cfg.should_counter(0, 3_000), 3);
        assert_eq!(cfg.should_counter(0, 100_000), 6);
        assert_eq!(cfg.should_counter(5_000, 5_000), 0);
        assert_eq!(cfg.should_counter(6_000, 5_000), 0);
    }

    #[test]
    fn test_consensus_size() {
        let cfg = config();
        assert_eq!(cfg.consensus_size(), 2 * 4 / 3 + 1);
        let default = DposConfig::default();
        assert_eq!(default.consensus_size(), 15);
    }
}
