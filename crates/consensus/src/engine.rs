//! The DPoS consensus engine.
//!
//! [`Dpos`] implements the block-lifecycle contract the host node drives:
//!
//! - `prepare` reserves the seal space and (legacy dialect) accrues
//!   producer counters, including catch-up for skipped slots
//! - `finalize` credits the reward, rolls epochs, performs mini-epoch
//!   replacement of underperforming primaries, tracks proposed
//!   irreversibility, and freezes the state root
//! - `seal` signs the header with the installed sign function
//! - `verify_seal` checks slot timing, recovers the seal's public key, and
//!   validates the producer against the activated schedule
//!
//! Two dialects coexist, selected by the header fork id ([`Dialect`]):
//! replaying historical blocks requires the legacy rules exactly.

use crate::config::{Dialect, DposConfig};
use crate::error::{DposError, Result};
use crate::irreversible::ProducerLru;
use crate::schema::{ActivatedCandidateInfo, CandidateInfo, CandidateType, GlobalState};
use crate::system::System;
use meridian_core::{ChainReader, NodeState, SnapshotInfo};
use meridian_crypto::{CryptoError, Signature};
use meridian_types::{Block, BlockHeader, Name, Receipt, Transaction, SEAL_LENGTH};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signs a 32-byte digest on behalf of the local producer.
///
/// The state handle lets the signer consult the keystore bindings recorded
/// on-chain for the sealing account.
pub type SignFn = Box<dyn Fn(&[u8], &dyn NodeState) -> Result<Vec<u8>> + Send + Sync>;

/// Cooperative cancellation for [`Dpos::seal`].
///
/// When fired, an in-flight seal returns `Ok(None)` without touching state
/// and the miner retries at the next slot.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unfired token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A producer entry of the activated schedule, as reported to RPC callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedCandidate {
    /// Producer account
    pub name: Name,
    /// Self-stake in asset units
    pub stake: u128,
    /// Self-stake plus votes in asset units
    pub total_stake: u128,
    /// Slots the producer was expected to produce this epoch
    pub should_counter: u64,
    /// Blocks the producer actually produced this epoch
    pub actual_counter: u64,
    /// For backup entries: one-based index of the primary slot this backup
    /// replaced; zero when not (yet) substituted in
    pub replace_index: u64,
}

struct Inner {
    config: DposConfig,
    sign_fn: Option<SignFn>,
}

/// The DPoS consensus engine.
///
/// All block-processing entry points run single-threaded inside the host's
/// block pipeline; the lock only guards the configuration and sign function
/// against concurrent setters, and the irreversibility cache against
/// external observers.
pub struct Dpos {
    inner: RwLock<Inner>,
    bft_irreversibles: RwLock<ProducerLru>,
    genesis_time: RwLock<Option<u64>>,
}

/// Seeds the DPoS genesis state: the epoch-0 global state, the latest-epoch
/// pointer, the system candidate, and the first (system-padded) schedule so
/// block 1 validates.
pub fn genesis(
    config: &DposConfig,
    state: &mut dyn NodeState,
    timestamp: u64,
    number: u64,
) -> Result<()> {
    config.validate()?;
    let mut sys = System::new(config, state);
    let epoch = config.epoch(timestamp);
    sys.db().set_latest_epoch(epoch)?;
    sys.db().set_state(&GlobalState {
        epoch,
        pre_epoch: epoch,
        activated_total_quantity: 0,
        total_quantity: 0,
        activated_candidate_schedule: Vec::new(),
        off_candidate_schedule: Vec::new(),
        take_over: false,
        dpos_active: false,
        number,
    })?;
    sys.db().set_candidate(&CandidateInfo {
        epoch,
        name: config.system_name.clone(),
        url: config.system_url.clone(),
        quantity: 0,
        total_quantity: 0,
        number,
        counter: 0,
        actual_counter: 0,
        kind: CandidateType::Normal,
    })?;
    sys.update_elected_candidates(epoch, number)?;
    Ok(())
}

/// Recovers the sealer's uncompressed public key from a header's trailing
/// seal.
pub fn ecrecover(header: &BlockHeader, chain_id: u64) -> Result<Vec<u8>> {
    let seal = header.seal().ok_or(DposError::MissingSignature)?;
    let signature = Signature::from_slice(seal)?;
    let digest = header.sign_hash(chain_id);
    let pubkey = signature.recover_prehash(digest.as_fixed_bytes())?;
    Ok(pubkey.to_uncompressed().to_vec())
}

impl Dpos {
    /// Creates the engine with the given configuration.
    pub fn new(config: DposConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.candidate_schedule_size as usize;
        Ok(Self {
            inner: RwLock::new(Inner {
                config,
                sign_fn: None,
            }),
            bft_irreversibles: RwLock::new(ProducerLru::new(capacity)),
            genesis_time: RwLock::new(None),
        })
    }

    /// Returns a copy of the current configuration.
    pub fn config(&self) -> DposConfig {
        self.inner.read().config.clone()
    }

    /// Replaces the configuration.
    pub fn set_config(&self, config: DposConfig) -> Result<()> {
        config.validate()?;
        self.inner.write().config = config;
        Ok(())
    }

    /// Installs the local producer's sign function.
    pub fn set_sign_fn(&self, sign_fn: SignFn) {
        self.inner.write().sign_fn = Some(sign_fn);
    }

    /// Returns the account that produced the block.
    pub fn author(&self, header: &BlockHeader) -> Name {
        header.coinbase.clone()
    }

    /// The configured block interval in milliseconds.
    pub fn block_interval(&self) -> u64 {
        self.inner.read().config.block_interval
    }

    /// The production slot containing `timestamp`.
    pub fn slot(&self, timestamp: u64) -> u64 {
        self.inner.read().config.slot(timestamp)
    }

    /// Initializes the consensus fields of a header, in place.
    ///
    /// Reserves the trailing seal space; under the legacy dialect this is
    /// also where producer counters accrue, including catch-up `should`
    /// counts for every slot skipped since the parent.
    pub fn prepare(
        &self,
        chain: &dyn ChainReader,
        header: &mut BlockHeader,
        state: &mut dyn NodeState,
    ) -> Result<()> {
        match Dialect::for_fork(header.fork_id) {
            Dialect::Legacy => self.prepare_legacy(chain, header, state),
            Dialect::V1 => {
                header.extra.extend(std::iter::repeat(0u8).take(SEAL_LENGTH));
                Ok(())
            }
        }
    }

    fn prepare_legacy(
        &self,
        chain: &dyn ChainReader,
        header: &mut BlockHeader,
        state: &mut dyn NodeState,
    ) -> Result<()> {
        header.extra.extend(std::iter::repeat(0u8).take(SEAL_LENGTH));
        let cfg = self.config();
        let parent = chain
            .get_header_by_hash(&header.parent_hash)
            .ok_or(DposError::UnknownBlock)?;
        let pepoch = cfg.epoch(parent.time);
        let epoch = cfg.epoch(header.time);
        let liveness_failed = self.calc_proposed_irreversible(chain, Some(&parent), true) == 0
            || header.time.saturating_sub(parent.time) > 2 * cfg.mepoch_interval();

        let mut sys = System::new(&cfg, state);
        if header.number != 1 {
            let mut gstate = sys.db().latest_state()?;
            if liveness_failed && header.coinbase == cfg.system_name {
                warn!(number = header.number, "system take over engaged");
                gstate.take_over = true;
                sys.db().set_state(&gstate)?;
            }
            let pstate = sys.db().get_state(gstate.pre_epoch)?;

            // Slots skipped since the parent owe their holders a should count.
            if parent.time + cfg.block_interval < header.time {
                let mut end = cfg.epoch_timestamp(gstate.epoch + 1) + 2 * cfg.block_interval;
                if header.time < end {
                    end = header.time;
                }
                let mut poffset = cfg.get_offset(parent.time, Dialect::Legacy);
                let mut ts = parent.time + cfg.block_interval;
                while ts < end {
                    let coffset = cfg.get_offset(ts, Dialect::Legacy);
                    if coffset != poffset {
                        if let Some(name) =
                            pstate.producer_for_offset(coffset, cfg.candidate_schedule_size)
                        {
                            if let Some(mut cand) = sys.db().get_candidate(&name)? {
                                let add = cfg.should_counter(ts, end);
                                cand.counter += add;
                                debug!(
                                    candidate = %cand.name,
                                    add,
                                    should = cand.counter,
                                    actual = cand.actual_counter,
                                    number = header.number,
                                    "missed slot should counter"
                                );
                                sys.db().set_candidate(&cand)?;
                            }
                        }
                    }
                    poffset = coffset;
                    ts += cfg.block_interval;
                }
            }

            // The producing slot itself.
            if let Some(mut cand) = sys.db().get_candidate(&header.coinbase)? {
                cand.actual_counter += 1;
                if gstate.take_over {
                    cand.counter += 1;
                } else if cfg.get_offset(
                    header.time.saturating_sub(cfg.block_interval),
                    Dialect::Legacy,
                ) != cfg.get_offset(header.time, Dialect::Legacy)
                    || parent.coinbase != header.coinbase
                {
                    let end = cfg.epoch_timestamp(gstate.epoch + 1) + 2 * cfg.block_interval;
                    let add = cfg.should_counter(header.time, end);
                    cand.counter += add;
                    debug!(
                        candidate = %cand.name,
                        add,
                        should = cand.counter,
                        actual = cand.actual_counter,
                        number = header.number,
                        "should counter"
                    );
                }
                sys.db().set_candidate(&cand)?;
            }
        }

        if pepoch != epoch {
            debug!(
                prev = pepoch,
                curr = epoch,
                number = parent.number,
                time = parent.time,
                "updating elected candidates"
            );
            sys.on_block(epoch, header.number)?;
            sys.update_elected_candidates(epoch, header.number)?;

            // Slots skipped at the head of the new epoch.
            if parent.number > 0 && parent.time + cfg.block_interval < header.time {
                let gstate = sys.db().latest_state()?;
                let pstate = sys.db().get_state(gstate.pre_epoch)?;
                let mut ts = cfg.epoch_timestamp(gstate.epoch) + cfg.block_interval;
                if ts < parent.time {
                    ts = parent.time;
                }
                let mut poffset = cfg.get_offset(ts, Dialect::Legacy);
                ts += cfg.block_interval;
                while ts < header.time {
                    let coffset = cfg.get_offset(ts, Dialect::Legacy);
                    if coffset != poffset {
                        if let Some(name) =
                            pstate.producer_for_offset(coffset, cfg.candidate_schedule_size)
                        {
                            if let Some(mut cand) = sys.db().get_candidate(&name)? {
                                cand.counter += cfg.should_counter(ts, header.time);
                                sys.db().set_candidate(&cand)?;
                            }
                        }
                    }
                    poffset = coffset;
                    ts += cfg.block_interval;
                }
            }
        }

        if header.number == 1 {
            if let Some(mut cand) = sys.db().get_candidate(&header.coinbase)? {
                cand.actual_counter += 1;
                let end = cfg.epoch_timestamp(epoch + 1) + 2 * cfg.block_interval;
                cand.counter += cfg.should_counter(header.time, end);
                sys.db().set_candidate(&cand)?;
            }
        }
        Ok(())
    }

    /// Assembles the final block: reward, snapshot window, epoch roll and
    /// counter accrual (post-fork dialect), mini-epoch replacement,
    /// irreversibility tracking, and the state root.
    pub fn finalize(
        &self,
        chain: &dyn ChainReader,
        header: &BlockHeader,
        txs: &[Transaction],
        receipts: &[Receipt],
        state: &mut dyn NodeState,
    ) -> Result<Block> {
        match Dialect::for_fork(header.fork_id) {
            Dialect::Legacy => self.finalize_legacy(chain, header, txs, receipts, state),
            Dialect::V1 => self.finalize_v1(chain, header, txs, receipts, state),
        }
    }

    fn credit_reward(&self, cfg: &DposConfig, header: &BlockHeader, state: &mut dyn NodeState) -> Result<()> {
        // The extra-reward branch is a dead stub: the multiplier is a
        // constant zero.
        let extra_counter: u128 = 0;
        let reward = cfg.block_reward + cfg.extra_block_reward * extra_counter;
        let mut sys = System::new(cfg, state);
        sys.credit_reward(&header.coinbase, reward)
    }

    fn record_snapshot_window(
        &self,
        chain: &dyn ChainReader,
        parent: &BlockHeader,
        header: &BlockHeader,
        state: &mut dyn NodeState,
    ) -> Result<()> {
        let interval = chain.config().snapshot_interval;
        if interval == 0 {
            return Ok(());
        }
        let parent_window = parent.time / interval * interval;
        let current_window = header.time / interval * interval;
        if parent_window != current_window {
            state.set_snapshot(
                current_window,
                SnapshotInfo {
                    number: header.number,
                    block_hash: header.parent_hash,
                    timestamp: parent_window,
                },
            )?;
        }
        Ok(())
    }

    fn finalize_legacy(
        &self,
        chain: &dyn ChainReader,
        header: &BlockHeader,
        txs: &[Transaction],
        _receipts: &[Receipt],
        state: &mut dyn NodeState,
    ) -> Result<Block> {
        let cfg = self.config();
        let parent = chain
            .get_header_by_hash(&header.parent_hash)
            .ok_or(DposError::UnknownBlock)?;

        self.credit_reward(&cfg, header, state)?;
        let mut block = Block::new(header.clone(), txs.to_vec());
        chain.fork_update(&block, state)?;
        self.record_snapshot_window(chain, &parent, header, state)?;

        let mut sys = System::new(&cfg, state);
        let gstate = sys.db().latest_state()?;
        let epoch_start = cfg.epoch_timestamp(gstate.epoch) + cfg.block_interval;
        if parent.time >= epoch_start {
            let pm = (parent.time - epoch_start) / cfg.mepoch_interval();
            let m = (header.time - epoch_start) / cfg.mepoch_interval();
            if pm != m && m % cfg.min_mepoch == 0 && m > 0 {
                self.replace_legacy(chain, &cfg, &mut sys, &parent, header, m)?;
            }
        }
        drop(sys);

        {
            let mut lru = self.bft_irreversibles.write();
            if header.coinbase == cfg.system_name {
                lru.purge();
            }
            lru.add(header.coinbase.clone(), header.proposed_irreversible);
        }
        block.header.state_root = state.intermediate_root();
        Ok(block)
    }

    /// Legacy replacement: reconstructs the mini-epoch group's per-producer
    /// counters by walking the header chain back to the group boundary.
    fn replace_legacy(
        &self,
        chain: &dyn ChainReader,
        cfg: &DposConfig,
        sys: &mut System<'_>,
        parent: &BlockHeader,
        header: &BlockHeader,
        mepoch: u64,
    ) -> Result<()> {
        let gstate = sys.db().latest_state()?;
        let epoch_start = cfg.epoch_timestamp(gstate.epoch) + cfg.block_interval;
        let mut pstate = sys.db().get_state(gstate.pre_epoch)?;
        let end_time = header.time;

        // (should, actual) accumulated per producer over the group.
        let mut group_counters: HashMap<Name, (u64, u64)> = HashMap::new();
        let mut theader = parent.clone();
        loop {
            group_counters
                .entry(theader.coinbase.clone())
                .or_default()
                .1 += 1;

            let pheader = chain
                .get_header_by_hash(&theader.parent_hash)
                .ok_or(DposError::UnknownBlock)?;
            let coffset = cfg.get_offset(theader.time, Dialect::Legacy);
            let poffset = cfg.get_offset(pheader.time, Dialect::Legacy);
            let exit = pheader.time < epoch_start
                || (pheader.time - epoch_start) / cfg.mepoch_interval()
                    < mepoch - cfg.min_mepoch;

            // Slots skipped between this block and its parent.
            let mut ftimestamp = pheader.time + cfg.block_interval;
            if ftimestamp < theader.time && poffset != coffset {
                let mut tpoffset = poffset;
                let mut toffset = cfg.get_offset(ftimestamp, Dialect::Legacy);
                while toffset != coffset {
                    if toffset != tpoffset {
                        if let Some(tname) =
                            pstate.producer_for_offset(toffset, cfg.candidate_schedule_size)
                        {
                            group_counters.entry(tname).or_default().0 +=
                                cfg.should_counter(ftimestamp, theader.time);
                            tpoffset = toffset;
                        }
                    }
                    ftimestamp += cfg.block_interval;
                    toffset = cfg.get_offset(ftimestamp, Dialect::Legacy);
                }
                group_counters
                    .entry(theader.coinbase.clone())
                    .or_default()
                    .0 += cfg.should_counter(ftimestamp, theader.time);
            }

            let entry = group_counters
                .entry(theader.coinbase.clone())
                .or_default();
            if theader.coinbase == cfg.system_name {
                entry.0 += 1;
            } else if exit
                || poffset != coffset
                || pheader.coinbase != theader.coinbase
            {
                entry.0 += cfg.should_counter(theader.time, end_time);
            }
            if exit {
                break;
            }
            theader = pheader;
        }

        for index in 0..pstate.activated_candidate_schedule.len() as u64 {
            if index >= cfg.candidate_schedule_size {
                break;
            }
            let tname = match pstate.producer_for_offset(index, cfg.candidate_schedule_size) {
                Some(name) => name,
                None => continue,
            };
            let Some(&(scnt, acnt)) = group_counters.get(&tname) else {
                continue;
            };
            if scnt < acnt {
                warn!(candidate = %tname, scnt, acnt, "produced beyond expectation, skipping");
                continue;
            }
            debug!(number = header.number, mepoch, candidate = %tname, scnt, acnt, "replace check");
            if scnt - acnt >= scnt / 2
                && pstate.off_candidate_schedule.len() as u64 + cfg.candidate_schedule_size
                    < pstate.activated_candidate_schedule.len() as u64
            {
                pstate.off_candidate_schedule.push(index);
                let rname = &pstate.activated_candidate_schedule
                    [pstate.off_candidate_schedule.len() - 1 + cfg.candidate_schedule_size as usize];
                info!(
                    number = header.number,
                    mepoch,
                    candidate = %tname,
                    scnt,
                    acnt,
                    replacement = %rname,
                    "replacing primary slot"
                );
            }
        }
        sys.db().set_state(&pstate)
    }

    fn finalize_v1(
        &self,
        chain: &dyn ChainReader,
        header: &BlockHeader,
        txs: &[Transaction],
        _receipts: &[Receipt],
        state: &mut dyn NodeState,
    ) -> Result<Block> {
        let cfg = self.config();
        let parent = chain
            .get_header_by_hash(&header.parent_hash)
            .ok_or(DposError::UnknownBlock)?;

        self.credit_reward(&cfg, header, state)?;
        let mut block = Block::new(header.clone(), txs.to_vec());
        chain.fork_update(&block, state)?;
        self.record_snapshot_window(chain, &parent, header, state)?;

        let mut sys = System::new(&cfg, state);

        // Owed slots in the parent's epoch.
        self.missing_v1(&cfg, &mut sys, parent.time + cfg.block_interval, header.time)?;

        let pepoch = cfg.epoch(parent.time);
        let epoch = cfg.epoch(header.time);
        if pepoch != epoch {
            sys.on_block(epoch, header.number)?;
            sys.update_elected_candidates(epoch, header.number)?;
            // Owed slots at the head of the new epoch.
            let start = cfg
                .epoch_timestamp(epoch)
                .max(parent.time + cfg.block_interval);
            self.missing_v1(&cfg, &mut sys, start, header.time)?;
        }

        let gstate = sys.db().get_state(epoch)?;
        let etimestamp = cfg.epoch_timestamp(epoch);

        if let Some(mut cand) = sys.db().get_candidate(&header.coinbase)? {
            cand.actual_counter += 1;
            cand.counter += 1;
            sys.db().set_candidate(&cand)?;
        }

        // Mini-epoch group boundary: baseline and replace primaries.
        let group = |t: u64| t.saturating_sub(etimestamp) / cfg.mepoch_interval() / cfg.min_mepoch;
        let parent_group = if parent.time < etimestamp {
            None
        } else {
            Some(group(parent.time))
        };
        let current_group = group(header.time);
        if parent_group != Some(current_group) {
            self.replace_v1(&cfg, &mut sys, &gstate, header, etimestamp, parent_group, current_group)?;
        }
        drop(sys);

        {
            let mut lru = self.bft_irreversibles.write();
            if header.coinbase == cfg.system_name {
                lru.purge();
            }
            lru.add(header.coinbase.clone(), header.proposed_irreversible);
        }
        block.header.state_root = state.intermediate_root();
        Ok(block)
    }

    /// Post-fork missing-slot catch-up over `[start, end)`, clamped to the
    /// epoch containing `start`. One should count per owed block interval.
    fn missing_v1(
        &self,
        cfg: &DposConfig,
        sys: &mut System<'_>,
        start: u64,
        end: u64,
    ) -> Result<()> {
        if start >= end {
            return Ok(());
        }
        let epoch = cfg.epoch(start);
        let gstate = match sys.db().try_get_state(epoch)? {
            Some(gstate) => gstate,
            // The epoch has not been opened yet; its slots are attributed
            // after the roll.
            None => return Ok(()),
        };
        let end = end.min(cfg.epoch_timestamp(gstate.epoch + 1));
        let pstate = sys.db().get_state(gstate.pre_epoch)?;

        let mut touched: HashMap<u64, CandidateInfo> = HashMap::new();
        let mut ts = start;
        while ts < end {
            let offset = cfg.get_offset(ts, Dialect::V1);
            if (offset as usize) < pstate.activated_candidate_schedule.len() {
                if !touched.contains_key(&offset) {
                    if let Some(name) =
                        pstate.producer_for_offset(offset, cfg.candidate_schedule_size)
                    {
                        if let Some(cand) = sys.db().get_candidate(&name)? {
                            touched.insert(offset, cand);
                        }
                    }
                }
                if let Some(cand) = touched.get_mut(&offset) {
                    cand.counter += 1;
                }
            }
            ts += cfg.block_interval;
        }
        for cand in touched.values() {
            debug!(
                candidate = %cand.name,
                should = cand.counter,
                actual = cand.actual_counter,
                "missed slots caught up"
            );
            sys.db().set_candidate(cand)?;
        }
        Ok(())
    }

    /// Post-fork replacement: compares each primary slot's counters against
    /// the baseline captured at the previous group boundary, retires slots
    /// that missed at least half their expected blocks, and refreshes the
    /// baselines for the next group.
    #[allow(clippy::too_many_arguments)]
    fn replace_v1(
        &self,
        cfg: &DposConfig,
        sys: &mut System<'_>,
        gstate: &GlobalState,
        header: &BlockHeader,
        etimestamp: u64,
        parent_group: Option<u64>,
        current_group: u64,
    ) -> Result<()> {
        let mut pstate = sys.db().get_state(gstate.pre_epoch)?;
        let group = |t: u64| t.saturating_sub(etimestamp) / cfg.mepoch_interval() / cfg.min_mepoch;

        let primaries =
            cfg.candidate_schedule_size.min(pstate.activated_candidate_schedule.len() as u64);
        for index in 0..primaries {
            let tname = match pstate.producer_for_offset(index, cfg.candidate_schedule_size) {
                Some(name) => name,
                None => continue,
            };
            let mut tcand = sys
                .db()
                .get_candidate(&tname)?
                .ok_or_else(|| DposError::CandidateNotFound(tname.to_string()))?;

            // Strip this block's own contribution and the new group's slots,
            // leaving exactly the just-finished group's counters.
            if tcand.name == header.coinbase {
                tcand.counter = tcand.counter.saturating_sub(1);
                tcand.actual_counter = tcand.actual_counter.saturating_sub(1);
            }
            let mut ts = header.time.saturating_sub(cfg.block_interval);
            while ts >= etimestamp && Some(group(ts)) != parent_group {
                if cfg.get_offset(ts, Dialect::V1) == index {
                    tcand.counter = tcand.counter.saturating_sub(1);
                }
                if ts < cfg.block_interval {
                    break;
                }
                ts -= cfg.block_interval;
            }

            if current_group != 0 {
                let snapshot = match sys.db().get_activated_candidate(index)? {
                    Some(snapshot) => snapshot,
                    None => continue,
                };
                if snapshot.name != tcand.name {
                    panic!(
                        "activated candidate snapshot corrupt at slot {index}: \
                         holds {}, snapshot names {}",
                        tcand.name, snapshot.name
                    );
                }
                let scnt = tcand.counter.saturating_sub(snapshot.counter);
                let acnt = tcand.actual_counter.saturating_sub(snapshot.actual_counter);
                debug!(
                    epoch = gstate.epoch,
                    mepoch = current_group,
                    candidate = %tname,
                    scnt,
                    acnt,
                    "replace check"
                );
                if scnt >= acnt
                    && scnt - acnt >= scnt / 2
                    && pstate.off_candidate_schedule.len() as u64 + cfg.candidate_schedule_size
                        < pstate.activated_candidate_schedule.len() as u64
                {
                    pstate.off_candidate_schedule.push(index);
                    let rname = pstate.activated_candidate_schedule[pstate
                        .off_candidate_schedule
                        .len()
                        - 1
                        + cfg.candidate_schedule_size as usize]
                        .clone();
                    info!(
                        epoch = gstate.epoch,
                        mepoch = current_group,
                        candidate = %tname,
                        scnt,
                        acnt,
                        replacement = %rname,
                        "replacing primary slot"
                    );
                    tcand = sys
                        .db()
                        .get_candidate(&rname)?
                        .ok_or_else(|| DposError::CandidateNotFound(rname.to_string()))?;
                }
            }

            sys.db().set_activated_candidate(
                index,
                &ActivatedCandidateInfo {
                    name: tcand.name.clone(),
                    counter: tcand.counter,
                    actual_counter: tcand.actual_counter,
                },
            )?;
        }
        sys.db().set_state(&pstate)
    }

    /// Seals the block by signing its header digest, unless cancelled.
    ///
    /// Returns `Ok(None)` when the token fires before the seal is placed;
    /// no state is touched in that case.
    pub fn seal(
        &self,
        chain: &dyn ChainReader,
        block: &Block,
        cancel: &CancelToken,
    ) -> Result<Option<Block>> {
        let mut header = block.header.clone();
        if header.number == 0 {
            return Err(DposError::UnknownBlock);
        }
        let parent = chain
            .get_header(&header.parent_hash, header.number - 1)
            .ok_or(DposError::UnknownBlock)?;
        let state = chain.state_at(parent.state_root)?;

        if cancel.is_cancelled() {
            return Ok(None);
        }
        let digest = header.sign_hash(chain.config().chain_id);
        let signature = {
            let inner = self.inner.read();
            let sign_fn = inner.sign_fn.as_ref().ok_or(DposError::MissingSignFn)?;
            sign_fn(digest.as_bytes(), &*state)?
        };
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let seal: [u8; SEAL_LENGTH] = signature.as_slice().try_into().map_err(|_| {
            DposError::Crypto(CryptoError::InvalidLength {
                expected: SEAL_LENGTH,
                actual: signature.len(),
            })
        })?;
        header
            .set_seal(&seal)
            .map_err(|_| DposError::MissingSignature)?;
        Ok(Some(block.with_seal(header)))
    }

    /// Checks a header's seal against the consensus rules: slot timing, a
    /// recoverable signature by a registered key, and the activated
    /// schedule.
    pub fn verify_seal(&self, chain: &dyn ChainReader, header: &BlockHeader) -> Result<()> {
        if header.number == 0 {
            return Err(DposError::UnknownBlock);
        }
        let parent = chain
            .get_header(&header.parent_hash, header.number - 1)
            .ok_or(DposError::UnknownBlock)?;
        let cfg = self.config();
        if cfg.next_slot(parent.time) > header.time {
            return Err(DposError::InvalidTimestamp);
        }
        let mut state = chain.state_at(parent.state_root)?;
        let pubkey = ecrecover(header, chain.config().chain_id)?;
        self.is_validate_candidate(
            chain,
            &parent,
            header.time,
            &header.coinbase,
            &[pubkey],
            state.as_mut(),
            false,
            header.fork_id,
        )
    }

    /// Validates that `candidate` is entitled to produce the block at
    /// `timestamp` on top of `parent`.
    ///
    /// `force` marks the producer-side call path, which may admit the
    /// system account during a (first) take-over. For fork ids above 1 the
    /// replacement decision of an un-finalized group boundary is simulated
    /// so the effective producer is resolved as of `timestamp`.
    #[allow(clippy::too_many_arguments)]
    pub fn is_validate_candidate(
        &self,
        chain: &dyn ChainReader,
        parent: &BlockHeader,
        timestamp: u64,
        candidate: &Name,
        pubkeys: &[Vec<u8>],
        state: &mut dyn NodeState,
        force: bool,
        fid: u64,
    ) -> Result<()> {
        let cfg = self.config();
        if timestamp % cfg.block_interval != 0 {
            return Err(DposError::InvalidMintBlockTime);
        }
        if !pubkeys.iter().any(|pk| state.is_valid_sign(candidate, pk)) {
            return Err(DposError::IllegalCandidatePubKey);
        }

        let liveness_failed = parent.number > 0
            && (self.calc_proposed_irreversible(chain, Some(parent), true) == 0
                || timestamp.saturating_sub(parent.time) > 2 * cfg.mepoch_interval());

        let mut sys = System::new(&cfg, state);
        let gstate = sys.db().latest_state()?;
        let systemio = *candidate == cfg.system_name;
        if gstate.take_over {
            if force && systemio {
                return Ok(());
            }
            return Err(DposError::SystemTakeOver);
        } else if liveness_failed {
            if force && systemio {
                // First take-over block.
                return Ok(());
            }
            if parent.number >= cfg.candidate_schedule_size * cfg.block_frequency {
                return Err(DposError::TooMuchIrreversible);
            }
        }

        let pstate = sys.db().get_state(gstate.pre_epoch)?;
        let offset = cfg.get_offset(timestamp, Dialect::for_fork(fid));
        let mut expected = pstate.producer_for_offset(offset, cfg.candidate_schedule_size);

        if fid > 1 {
            if let Some(name) = expected.clone() {
                if let Some(substitute) = self.simulate_replacement(
                    &cfg, &mut sys, &gstate, &pstate, parent, timestamp, offset, &name,
                )? {
                    expected = Some(substitute);
                }
            }
        }

        match expected {
            Some(name) if name == *candidate => Ok(()),
            other => Err(DposError::InvalidBlockCandidate {
                candidate: candidate.to_string(),
                expected: other.map(|n| n.to_string()).unwrap_or_default(),
                offset,
                epoch: pstate.epoch,
            }),
        }
    }

    /// Simulates the replacement decision for a slot at an un-finalized
    /// group boundary (fork id > 1), mirroring the `finalize` arithmetic.
    #[allow(clippy::too_many_arguments)]
    fn simulate_replacement(
        &self,
        cfg: &DposConfig,
        sys: &mut System<'_>,
        gstate: &GlobalState,
        pstate: &GlobalState,
        parent: &BlockHeader,
        timestamp: u64,
        offset: u64,
        holder: &Name,
    ) -> Result<Option<Name>> {
        let epoch = cfg.epoch(timestamp);
        let etimestamp = cfg.epoch_timestamp(epoch);
        let group = |t: u64| t.saturating_sub(etimestamp) / cfg.mepoch_interval() / cfg.min_mepoch;
        let parent_group = if parent.time < etimestamp {
            None
        } else {
            Some(group(parent.time))
        };
        let current_group = group(timestamp);
        if parent_group == Some(current_group) || current_group == 0 {
            return Ok(None);
        }

        let Some(mut cand) = sys.db().get_candidate(holder)? else {
            return Ok(None);
        };
        let Some(snapshot) = sys.db().get_activated_candidate(offset)? else {
            return Ok(None);
        };

        let mut ts = timestamp.saturating_sub(cfg.block_interval);
        while ts >= etimestamp && Some(group(ts)) != parent_group {
            if cfg.get_offset(ts, Dialect::V1) == offset {
                cand.counter = cand.counter.saturating_sub(1);
            }
            if ts < cfg.block_interval {
                break;
            }
            ts -= cfg.block_interval;
        }

        if snapshot.name != cand.name {
            panic!(
                "activated candidate snapshot corrupt at slot {offset}: \
                 holds {}, snapshot names {}",
                cand.name, snapshot.name
            );
        }
        let scnt = cand.counter.saturating_sub(snapshot.counter);
        let acnt = cand.actual_counter.saturating_sub(snapshot.actual_counter);
        if scnt >= acnt
            && scnt - acnt >= scnt / 2
            && pstate.off_candidate_schedule.len() as u64 + cfg.candidate_schedule_size
                < pstate.activated_candidate_schedule.len() as u64
        {
            let rname = pstate.activated_candidate_schedule
                [pstate.off_candidate_schedule.len() + cfg.candidate_schedule_size as usize]
                .clone();
            info!(
                epoch = gstate.epoch,
                mepoch = current_group,
                candidate = %holder,
                scnt,
                acnt,
                replacement = %rname,
                "validating against simulated replacement"
            );
            return Ok(Some(rname));
        }
        Ok(None)
    }

    /// Slot-based difficulty: the number of intervals since genesis plus
    /// one. Informational; the primary ordering is slot-based.
    pub fn calc_difficulty(&self, chain: &dyn ChainReader, time: u64, _parent: &BlockHeader) -> u64 {
        let genesis_time = {
            let cached = *self.genesis_time.read();
            match cached {
                Some(t) => t,
                None => match chain.get_header_by_number(0) {
                    Some(genesis) => {
                        *self.genesis_time.write() = Some(genesis.time);
                        genesis.time
                    }
                    None => 0,
                },
            }
        };
        time.saturating_sub(genesis_time) / self.config().block_interval + 1
    }

    /// Walks back from `parent` (or the current head) and returns the
    /// newest block number proposable as irreversible: the first block by
    /// the system account, else the first block by which `consensus_size`
    /// distinct producers have been observed, else zero.
    ///
    /// When `strict`, the walk gives up after traversing more than two
    /// mini-epochs of time.
    pub fn calc_proposed_irreversible(
        &self,
        chain: &dyn ChainReader,
        parent: Option<&BlockHeader>,
        strict: bool,
    ) -> u64 {
        let cfg = self.config();
        let mut current = match parent {
            Some(header) => header.clone(),
            None => chain.current_header(),
        };
        let reference_time = current.time;
        let mut producers: HashMap<Name, u64> = HashMap::new();
        while current.number > 0 {
            if current.coinbase == cfg.system_name {
                return current.number;
            }
            if strict && reference_time.saturating_sub(current.time) >= 2 * cfg.mepoch_interval() {
                break;
            }
            *producers.entry(current.coinbase.clone()).or_default() += 1;
            if producers.len() as u64 >= cfg.consensus_size() {
                return current.number;
            }
            current = match chain.get_header_by_hash(&current.parent_hash) {
                Some(header) => header,
                None => break,
            };
        }
        0
    }

    /// The BFT-irreversible height: the lower-third quantile of the tracked
    /// producers' proposed-irreversible declarations.
    pub fn calc_bft_irreversible(&self) -> u64 {
        self.bft_irreversibles.read().bft_irreversible()
    }

    /// Delegated stake of `candidate` at `timestamp`, in asset units.
    pub fn get_delegated_by_time(
        &self,
        state: &mut dyn NodeState,
        candidate: &Name,
        timestamp: u64,
    ) -> Result<u128> {
        let cfg = self.config();
        let mut sys = System::new(&cfg, state);
        let (stake, _, _) = sys.get_delegated_by_time(candidate, timestamp)?;
        Ok(stake)
    }

    /// The highest epoch ever opened.
    pub fn get_latest_epoch(&self, state: &mut dyn NodeState) -> Result<u64> {
        let cfg = self.config();
        let mut sys = System::new(&cfg, state);
        sys.db().get_latest_epoch()
    }

    /// The epoch preceding `epoch`.
    pub fn get_prev_epoch(&self, state: &mut dyn NodeState, epoch: u64) -> Result<u64> {
        let cfg = self.config();
        let mut sys = System::new(&cfg, state);
        Ok(sys.db().get_state(epoch)?.pre_epoch)
    }

    /// The next opened epoch after `epoch`, if any.
    pub fn get_next_epoch(&self, state: &mut dyn NodeState, epoch: u64) -> Result<Option<u64>> {
        let cfg = self.config();
        let mut sys = System::new(&cfg, state);
        let latest = sys.db().get_latest_epoch()?;
        let mut next = epoch;
        loop {
            next += 1;
            if next > latest {
                return Ok(None);
            }
            if let Some(gstate) = sys.db().try_get_state(next)? {
                return Ok(Some(gstate.epoch));
            }
        }
    }

    /// Length of the schedule active during `epoch`.
    pub fn get_actived_candidate_size(
        &self,
        state: &mut dyn NodeState,
        epoch: u64,
    ) -> Result<u64> {
        let cfg = self.config();
        let mut sys = System::new(&cfg, state);
        let gstate = sys.db().get_state(epoch)?;
        let pstate = sys.db().get_state(gstate.pre_epoch)?;
        Ok(pstate.activated_candidate_schedule.len() as u64)
    }

    /// The `index`-th entry of the schedule active during `epoch`.
    pub fn get_actived_candidate(
        &self,
        state: &mut dyn NodeState,
        epoch: u64,
        index: u64,
    ) -> Result<ActivatedCandidate> {
        let cfg = self.config();
        let mut sys = System::new(&cfg, state);
        let gstate = sys.db().get_state(epoch)?;
        let pstate = sys.db().get_state(gstate.pre_epoch)?;
        let len = pstate.activated_candidate_schedule.len() as u64;
        if index >= len {
            return Err(DposError::IndexOutOfSchedule { index, len });
        }
        let name = pstate.activated_candidate_schedule[index as usize].clone();
        let (quantity, total_quantity, counter, actual_counter) =
            match sys.db().get_candidate(&name)? {
                Some(info) => (
                    info.quantity,
                    info.total_quantity,
                    info.counter,
                    info.actual_counter,
                ),
                None => (0, 0, 0, 0),
            };
        let should_counter = counter.max(actual_counter);

        // Backups report the primary slot they replaced, one-based; zero
        // means the backup has not been substituted in.
        let mut replace_index = 0;
        if index >= cfg.candidate_schedule_size {
            let oi = (index - cfg.candidate_schedule_size) as usize;
            if oi < pstate.off_candidate_schedule.len() {
                replace_index = pstate.off_candidate_schedule[oi] + 1;
            }
        }

        Ok(ActivatedCandidate {
            name,
            stake: quantity * cfg.unit_stake,
            total_stake: total_quantity * cfg.unit_stake,
            should_counter,
            actual_counter,
            replace_index,
        })
    }

    /// Self-stake of `candidate` as of `epoch`, in asset units.
    pub fn get_candidate_stake(
        &self,
        state: &mut dyn NodeState,
        epoch: u64,
        candidate: &Name,
    ) -> Result<u128> {
        let cfg = self.config();
        let mut sys = System::new(&cfg, state);
        let _ = sys.db().get_state(epoch)?;
        match sys.db().get_candidate(candidate)? {
            Some(info) => Ok(info.quantity * cfg.unit_stake),
            None => Ok(0),
        }
    }

    /// Stake `voter` put behind `candidate` in the epoch whose votes shaped
    /// `epoch`'s schedule, in asset units.
    pub fn get_voter_stake(
        &self,
        state: &mut dyn NodeState,
        epoch: u64,
        voter: &Name,
        candidate: &Name,
    ) -> Result<u128> {
        let cfg = self.config();
        let mut sys = System::new(&cfg, state);
        let gstate = sys.db().get_state(epoch)?;
        match sys.db().get_voter(gstate.pre_epoch, voter, candidate)? {
            Some(info) => Ok(info.quantity * cfg.unit_stake),
            None => Ok(0),
        }
    }
}
