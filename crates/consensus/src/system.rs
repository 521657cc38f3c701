//! The DPoS vote subsystem and election pipeline.
//!
//! [`System`] is the internal contract the engine drives: candidate
//! registration and stake updates, voting, kick-outs, the lazy
//! available-quantity derivation, epoch opening, and the per-epoch election.
//!
//! Every operation validates completely before its first write, so a failed
//! operation leaves the state store untouched. Asset movements are queued as
//! internal actions and drained by the caller into the block's receipt list.

use crate::config::DposConfig;
use crate::error::{DposError, Result};
use crate::schema::{CandidateInfo, CandidateType, DposDb, GlobalState, VoterInfo};
use meridian_core::NodeState;
use meridian_types::{Action, Name};
use tracing::{debug, info};

/// The DPoS internal contract: vote bookkeeping and elections over the
/// record schema.
///
/// Holds a read-only borrow of the engine configuration and a mutable
/// borrow of the per-block state.
pub struct System<'a> {
    config: &'a DposConfig,
    db: DposDb<'a>,
    internal_actions: Vec<Action>,
}

impl<'a> System<'a> {
    /// Opens the subsystem over the given per-block state.
    pub fn new(config: &'a DposConfig, state: &'a mut dyn NodeState) -> Self {
        Self {
            config,
            db: DposDb::new(config.account_name.clone(), config.asset_id, state),
            internal_actions: Vec::new(),
        }
    }

    /// The record schema this subsystem writes through.
    pub fn db(&mut self) -> &mut DposDb<'a> {
        &mut self.db
    }

    /// Drains the internal actions queued so far, in emission order.
    pub fn take_internal_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.internal_actions)
    }

    /// Registers a new candidate with `stake` of self-stake.
    pub fn reg_candidate(
        &mut self,
        epoch: u64,
        candidate: &str,
        url: &str,
        stake: u128,
        number: u64,
    ) -> Result<()> {
        let name = Name::new(candidate)
            .map_err(|_| DposError::IllegalCandidateName(candidate.to_string()))?;
        if url.len() as u64 > self.config.max_url_len {
            return Err(DposError::InvalidUrl {
                url: url.to_string(),
                max: self.config.max_url_len,
            });
        }
        let quantity = self.stake_to_quantity(stake, self.config.candidate_min_quantity)?;

        if self.db.get_candidate(&name)?.is_some() {
            return Err(DposError::CandidateExists(name.to_string()));
        }

        let available = self.available_quantity(epoch, &name)?;
        if available < quantity {
            return Err(DposError::InvalidStake {
                stake,
                reason: "insufficient available stake".to_string(),
            });
        }
        let mut gstate = self.db.get_state(epoch)?;

        self.db
            .set_available_quantity(epoch, &name, available - quantity)?;
        self.db.set_candidate(&CandidateInfo {
            epoch,
            name: name.clone(),
            url: url.to_string(),
            quantity,
            total_quantity: quantity,
            number,
            counter: 0,
            actual_counter: 0,
            kind: CandidateType::Normal,
        })?;
        gstate.total_quantity += quantity;
        self.db.set_state(&gstate)?;
        debug!(candidate = %name, quantity, number, "registered candidate");
        Ok(())
    }

    /// Updates a candidate's URL and self-stake to `new_stake`.
    pub fn update_candidate(
        &mut self,
        epoch: u64,
        candidate: &Name,
        url: &str,
        new_stake: u128,
        number: u64,
    ) -> Result<()> {
        if url.len() as u64 > self.config.max_url_len {
            return Err(DposError::InvalidUrl {
                url: url.to_string(),
                max: self.config.max_url_len,
            });
        }
        let new_quantity = self.stake_to_quantity(new_stake, self.config.candidate_min_quantity)?;

        let mut info = self
            .db
            .get_candidate(candidate)?
            .ok_or_else(|| DposError::CandidateNotFound(candidate.to_string()))?;
        if info.kind == CandidateType::Black {
            return Err(DposError::CandidateInBlacklist(candidate.to_string()));
        }

        let old_quantity = info.quantity;
        let mut debit = None;
        if new_quantity > old_quantity {
            let delta = new_quantity - old_quantity;
            let available = self.available_quantity(epoch, candidate)?;
            if available < delta {
                return Err(DposError::InvalidStake {
                    stake: new_stake,
                    reason: "insufficient available stake".to_string(),
                });
            }
            debit = Some(available - delta);
        }
        let mut gstate = self.db.get_state(epoch)?;

        if let Some(remaining) = debit {
            self.db.set_available_quantity(epoch, candidate, remaining)?;
        } else if new_quantity < old_quantity {
            let freed = (old_quantity - new_quantity) * self.config.unit_stake;
            let action = self.db.adapter().undelegate(candidate, freed)?;
            self.internal_actions.push(action);
        }

        if !url.is_empty() {
            info.url = url.to_string();
        }
        info.total_quantity = info.total_quantity - old_quantity + new_quantity;
        info.quantity = new_quantity;
        info.number = number;
        self.db.set_candidate(&info)?;

        gstate.total_quantity = gstate.total_quantity - old_quantity + new_quantity;
        self.db.set_state(&gstate)?;
        Ok(())
    }

    /// Unregisters a candidate: flips it to `Freeze` without returning
    /// stake yet.
    pub fn unreg_candidate(&mut self, _epoch: u64, candidate: &Name, number: u64) -> Result<()> {
        let mut info = self
            .db
            .get_candidate(candidate)?
            .ok_or_else(|| DposError::CandidateNotFound(candidate.to_string()))?;
        match info.kind {
            CandidateType::Black => {
                return Err(DposError::CandidateInBlacklist(candidate.to_string()))
            }
            CandidateType::Freeze => {
                return Err(DposError::CandidateNotNormal(candidate.to_string()))
            }
            CandidateType::Normal => {}
        }

        info.kind = CandidateType::Freeze;
        info.number = number;
        self.db.set_candidate(&info)
    }

    /// Refunds a frozen candidate's self-stake and removes the record.
    ///
    /// Voter stakes are not refunded here: voter records persist, and later
    /// epochs simply stop crediting them once the candidate left `Normal`.
    pub fn refund_candidate(&mut self, epoch: u64, candidate: &Name, number: u64) -> Result<()> {
        let info = self
            .db
            .get_candidate(candidate)?
            .ok_or_else(|| DposError::CandidateNotFound(candidate.to_string()))?;
        if info.kind != CandidateType::Freeze {
            return Err(DposError::CandidateNotFrozen(candidate.to_string()));
        }
        let mut gstate = self.db.get_state(epoch)?;

        let stake = info.quantity * self.config.unit_stake;
        let action = self.db.adapter().undelegate(candidate, stake)?;
        self.internal_actions.push(action);

        gstate.total_quantity = gstate.total_quantity.saturating_sub(info.total_quantity);
        self.db.set_state(&gstate)?;
        self.db.del_candidate(candidate)?;
        info!(candidate = %candidate, stake, number, "refunded candidate");
        Ok(())
    }

    /// Votes `stake` from `voter` behind `candidate`.
    pub fn vote_candidate(
        &mut self,
        epoch: u64,
        voter: &Name,
        candidate: &Name,
        stake: u128,
        number: u64,
    ) -> Result<()> {
        let mut info = self
            .db
            .get_candidate(candidate)?
            .ok_or_else(|| DposError::CandidateNotFound(candidate.to_string()))?;
        if info.kind == CandidateType::Black {
            return Err(DposError::CandidateInBlacklist(candidate.to_string()));
        }
        let quantity = self.stake_to_quantity(stake, self.config.voter_min_quantity)?;

        let available = self.available_quantity(epoch, voter)?;
        if available < quantity {
            return Err(DposError::InvalidStake {
                stake,
                reason: "insufficient available stake".to_string(),
            });
        }
        let mut gstate = self.db.get_state(epoch)?;
        let mut voter_info = self.db.get_voter(epoch, voter, candidate)?.unwrap_or(VoterInfo {
            epoch,
            name: voter.clone(),
            candidate: candidate.clone(),
            quantity: 0,
            number,
        });

        self.db
            .set_available_quantity(epoch, voter, available - quantity)?;
        voter_info.quantity += quantity;
        voter_info.number = number;
        self.db.set_voter(&voter_info)?;

        info.total_quantity += quantity;
        self.db.set_candidate(&info)?;

        gstate.total_quantity += quantity;
        self.db.set_state(&gstate)?;
        Ok(())
    }

    /// Kicks a candidate: confiscates its self-stake to the system account,
    /// zeros its total, and blacklists it.
    pub fn kicked_candidate(&mut self, epoch: u64, candidate: &Name, number: u64) -> Result<()> {
        let mut info = self
            .db
            .get_candidate(candidate)?
            .ok_or_else(|| DposError::CandidateNotFound(candidate.to_string()))?;
        if info.kind == CandidateType::Black {
            return Err(DposError::CandidateInBlacklist(candidate.to_string()));
        }
        let mut gstate = self.db.get_state(epoch)?;

        let stake = info.quantity * self.config.unit_stake;
        let system = self.config.system_name.clone();
        let action = self.db.adapter().undelegate(&system, stake)?;
        self.internal_actions.push(action);

        gstate.total_quantity = gstate.total_quantity.saturating_sub(info.total_quantity);
        self.db.set_state(&gstate)?;

        info.total_quantity = 0;
        info.number = number;
        info.kind = CandidateType::Black;
        self.db.set_candidate(&info)?;
        info!(candidate = %candidate, stake, number, "kicked candidate");
        Ok(())
    }

    /// Manually releases the system take-over.
    pub fn exit_take_over(&mut self, epoch: u64) -> Result<()> {
        let mut gstate = self.db.get_state(epoch)?;
        gstate.take_over = false;
        self.db.set_state(&gstate)
    }

    /// Credits the block reward, queuing the issuance action.
    pub(crate) fn credit_reward(&mut self, to: &Name, amount: u128) -> Result<()> {
        let system = self.config.system_name.clone();
        let action = self.db.adapter().inc_asset_to_account(&system, to, amount)?;
        self.internal_actions.push(action);
        Ok(())
    }

    /// Historical delegation summary scaled to asset units.
    pub fn get_delegated_by_time(
        &mut self,
        candidate: &Name,
        timestamp: u64,
    ) -> Result<(u128, u128, u64)> {
        let (quantity, total_quantity, count) =
            self.db.get_delegated_by_time(candidate, timestamp)?;
        Ok((
            quantity * self.config.unit_stake,
            total_quantity * self.config.unit_stake,
            count,
        ))
    }

    /// Opens `epoch` if it is newer than the latest epoch on record,
    /// carrying totals and flags forward from the previous state.
    pub fn on_block(&mut self, epoch: u64, number: u64) -> Result<()> {
        let pre_epoch = self.db.get_latest_epoch()?;
        if pre_epoch == epoch {
            return Ok(());
        }
        if pre_epoch > epoch {
            return Err(meridian_core::StateError::Corruption(format!(
                "epoch {epoch} opened behind latest epoch {pre_epoch}"
            ))
            .into());
        }

        let pstate = self.db.get_state(pre_epoch)?;
        let gstate = GlobalState {
            epoch,
            pre_epoch,
            activated_total_quantity: pstate.activated_total_quantity,
            total_quantity: pstate.total_quantity,
            activated_candidate_schedule: Vec::new(),
            off_candidate_schedule: Vec::new(),
            take_over: pstate.take_over,
            dpos_active: pstate.dpos_active,
            number,
        };
        self.db.set_state(&gstate)?;
        self.db.set_latest_epoch(epoch)?;
        info!(epoch, pre_epoch, number, "opened epoch");
        Ok(())
    }

    /// Runs the election for `epoch`, writing its activated schedule.
    ///
    /// The schedule written here takes effect when the *next* epoch opens;
    /// until then the engine keeps reading the previous epoch's schedule.
    /// Candidate counters restart with the new epoch stamp.
    pub fn update_elected_candidates(&mut self, epoch: u64, number: u64) -> Result<()> {
        let mut gstate = self.db.get_state(epoch)?;

        let names = self.db.get_candidates()?;
        let mut candidates = Vec::with_capacity(names.len());
        for name in &names {
            let info = self
                .db
                .get_candidate(name)?
                .ok_or_else(|| DposError::CandidateNotFound(name.to_string()))?;
            candidates.push(info);
        }

        let n = self.config.schedule_size();
        if !gstate.dpos_active
            && gstate.total_quantity >= self.config.activated_min_quantity
            && candidates.len() as u64 >= n
        {
            info!(epoch, total_quantity = gstate.total_quantity, "dpos activated");
            gstate.dpos_active = true;
        }

        // Descending stake, name as the deterministic tie-breaker.
        candidates.sort_by(|a, b| {
            b.total_quantity
                .cmp(&a.total_quantity)
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut schedule = Vec::new();
        let mut activated_total = 0u128;
        for info in &candidates {
            if info.is_invalid() || (gstate.dpos_active && info.name == self.config.system_name) {
                continue;
            }
            schedule.push(info.name.clone());
            if schedule.len() as u64 <= self.config.candidate_schedule_size {
                activated_total += info.total_quantity;
            }
            if schedule.len() as u64 == n {
                break;
            }
        }

        // Before activation the chain cycles through whichever candidates
        // exist to fill the primary slots.
        if !gstate.dpos_active && !schedule.is_empty() {
            let elected = schedule.len();
            let mut index = 0;
            while (schedule.len() as u64) < self.config.candidate_schedule_size {
                let filler = schedule[index % elected].clone();
                schedule.push(filler);
                index += 1;
            }
        }

        for mut info in candidates {
            info.epoch = epoch;
            info.counter = 0;
            info.actual_counter = 0;
            self.db.set_candidate(&info)?;
        }

        debug!(epoch, number, schedule = ?schedule.iter().map(Name::as_str).collect::<Vec<_>>(), "elected schedule");
        gstate.activated_candidate_schedule = schedule;
        gstate.activated_total_quantity = activated_total;
        gstate.off_candidate_schedule = Vec::new();
        self.db.set_state(&gstate)
    }

    /// Free stake of `name` in `epoch`, derived on first use from the
    /// account's balance snapshot two epochs back.
    pub fn available_quantity(&mut self, epoch: u64, name: &Name) -> Result<u128> {
        if let Some(quantity) = self.db.get_available_quantity(epoch, name)? {
            return Ok(quantity);
        }
        let gstate = self.db.get_state(epoch)?;
        let pstate = self.db.get_state(gstate.pre_epoch)?;
        let snapshot_time = self.config.epoch_timestamp(pstate.pre_epoch);
        let balance = self.db.adapter().get_balance_by_time(name, snapshot_time)?;
        Ok(balance / self.config.unit_stake)
    }

    fn stake_to_quantity(&self, stake: u128, min_quantity: u128) -> Result<u128> {
        if stake % self.config.unit_stake != 0 {
            return Err(DposError::InvalidStake {
                stake,
                reason: format!("non divisibility, unit {}", self.config.unit_stake),
            });
        }
        let quantity = stake / self.config.unit_stake;
        if quantity < min_quantity {
            return Err(DposError::InvalidStake {
                stake,
                reason: format!("insufficient, min quantity {min_quantity}"),
            });
        }
        Ok(quantity)
    }
}
