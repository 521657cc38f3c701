//! DPoS record schema and typed state access.
//!
//! Every record lives under the configured system account namespace in the
//! host state trie, keyed by the fixed string layouts below. Keys and RLP
//! value encodings are consensus-critical: reorganising either changes the
//! state root.

use crate::error::{DposError, Result};
use meridian_core::{AccountError, NodeState};
use meridian_types::rlp_codec;
use meridian_types::{Action, Name};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

/// Key of a candidate record: `candidate/<name>`.
fn candidate_key(name: &Name) -> String {
    format!("candidate/{name}")
}

/// Key of the candidate membership index.
const CANDIDATES_KEY: &str = "candidates";

/// Key of a voter record: `voter/<epoch>/<voter>/<candidate>`.
fn voter_key(epoch: u64, voter: &Name, candidate: &Name) -> String {
    format!("voter/{epoch}/{voter}/{candidate}")
}

/// Key of an epoch's global state: `state/<epoch>`.
fn state_key(epoch: u64) -> String {
    format!("state/{epoch}")
}

/// Key of an available-quantity record: `availQ/<epoch>/<name>`.
fn avail_key(epoch: u64, name: &Name) -> String {
    format!("availQ/{epoch}/{name}")
}

/// Key of an activated-candidate snapshot: `actCand/<offset>`.
fn activated_key(offset: u64) -> String {
    format!("actCand/{offset}")
}

/// Key of the latest-epoch pointer.
const LATEST_EPOCH_KEY: &str = "latestEpoch";

/// Lifecycle state of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateType {
    /// Eligible for election
    Normal,
    /// Unregistered, awaiting refund
    Freeze,
    /// Kicked; stake confiscated, permanently excluded
    Black,
}

impl CandidateType {
    fn as_u8(self) -> u8 {
        match self {
            CandidateType::Normal => 0,
            CandidateType::Freeze => 1,
            CandidateType::Black => 2,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CandidateType::Normal),
            1 => Some(CandidateType::Freeze),
            2 => Some(CandidateType::Black),
            _ => None,
        }
    }
}

/// A registered block-producer candidate.
///
/// `quantity` is self-stake and `total_quantity` self-stake plus votes, both
/// in unit-stake multiples. `counter` counts the slots the candidate was
/// expected to produce in the stamped epoch; `actual_counter` the blocks it
/// actually produced. The gap between them drives mid-epoch replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInfo {
    /// Epoch the counters belong to
    pub epoch: u64,
    /// Candidate account
    pub name: Name,
    /// Self-reported service URL
    pub url: String,
    /// Self-stake in unit-stake multiples
    pub quantity: u128,
    /// Self-stake plus voter contributions, in unit-stake multiples
    pub total_quantity: u128,
    /// Block number of the last mutation
    pub number: u64,
    /// Slots the candidate was expected to produce
    pub counter: u64,
    /// Blocks the candidate actually produced
    pub actual_counter: u64,
    /// Lifecycle state
    pub kind: CandidateType,
}

impl CandidateInfo {
    /// True when the candidate is excluded from election.
    pub fn is_invalid(&self) -> bool {
        self.kind != CandidateType::Normal
    }
}

impl Encodable for CandidateInfo {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(9);
        s.append(&self.epoch);
        s.append(&self.name);
        s.append(&self.url);
        rlp_codec::append_u128(s, self.quantity);
        rlp_codec::append_u128(s, self.total_quantity);
        s.append(&self.number);
        s.append(&self.counter);
        s.append(&self.actual_counter);
        s.append(&self.kind.as_u8());
    }
}

impl Decodable for CandidateInfo {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 9 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            epoch: rlp.val_at(0)?,
            name: rlp.val_at(1)?,
            url: rlp.val_at(2)?,
            quantity: rlp_codec::u128_at(rlp, 3)?,
            total_quantity: rlp_codec::u128_at(rlp, 4)?,
            number: rlp.val_at(5)?,
            counter: rlp.val_at(6)?,
            actual_counter: rlp.val_at(7)?,
            kind: CandidateType::from_u8(rlp.val_at(8)?)
                .ok_or(DecoderError::Custom("unknown candidate type"))?,
        })
    }
}

/// One voter's stake behind one candidate in one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterInfo {
    /// Epoch the vote was cast in
    pub epoch: u64,
    /// Voter account
    pub name: Name,
    /// Voted candidate
    pub candidate: Name,
    /// Voted stake in unit-stake multiples
    pub quantity: u128,
    /// Block number of the last mutation
    pub number: u64,
}

impl Encodable for VoterInfo {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.epoch);
        s.append(&self.name);
        s.append(&self.candidate);
        rlp_codec::append_u128(s, self.quantity);
        s.append(&self.number);
    }
}

impl Decodable for VoterInfo {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            epoch: rlp.val_at(0)?,
            name: rlp.val_at(1)?,
            candidate: rlp.val_at(2)?,
            quantity: rlp_codec::u128_at(rlp, 3)?,
            number: rlp.val_at(4)?,
        })
    }
}

/// Per-epoch consensus state.
///
/// `activated_candidate_schedule` lists the primary producers first, then
/// the backups. `off_candidate_schedule` records the primary slot indices
/// retired mid-epoch, in retirement order: the i-th entry's slot is now
/// produced by `activated_candidate_schedule[candidate_schedule_size + i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    /// The epoch this state belongs to
    pub epoch: u64,
    /// The epoch whose state holds the schedule active during this epoch
    pub pre_epoch: u64,
    /// Stake behind the primary schedule, in unit-stake multiples
    pub activated_total_quantity: u128,
    /// Stake behind all non-blacklisted candidates, in unit-stake multiples
    pub total_quantity: u128,
    /// Producers elected when this epoch opened; effective next epoch
    pub activated_candidate_schedule: Vec<Name>,
    /// Primary slot indices replaced mid-epoch, in replacement order
    pub off_candidate_schedule: Vec<u64>,
    /// Whether the system account has taken over production
    pub take_over: bool,
    /// Whether DPoS has activated (enough candidates and stake)
    pub dpos_active: bool,
    /// Block number that opened this epoch
    pub number: u64,
}

impl GlobalState {
    /// Resolves the producer for a primary slot, following mid-epoch
    /// replacements. The most recent replacement of a slot wins.
    pub fn producer_for_offset(&self, offset: u64, schedule_size: u64) -> Option<Name> {
        let schedule = &self.activated_candidate_schedule;
        if offset as usize >= schedule.len() {
            return None;
        }
        let mut name = schedule[offset as usize].clone();
        for rindex in (0..self.off_candidate_schedule.len()).rev() {
            if self.off_candidate_schedule[rindex] == offset {
                if let Some(replacement) = schedule.get(schedule_size as usize + rindex) {
                    name = replacement.clone();
                }
                break;
            }
        }
        Some(name)
    }
}

impl Encodable for GlobalState {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(9);
        s.append(&self.epoch);
        s.append(&self.pre_epoch);
        rlp_codec::append_u128(s, self.activated_total_quantity);
        rlp_codec::append_u128(s, self.total_quantity);
        s.append_list(&self.activated_candidate_schedule);
        s.append_list(&self.off_candidate_schedule);
        s.append(&(self.take_over as u8));
        s.append(&(self.dpos_active as u8));
        s.append(&self.number);
    }
}

impl Decodable for GlobalState {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 9 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let flag = |v: u8| match v {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecoderError::Custom("invalid boolean flag")),
        };
        Ok(Self {
            epoch: rlp.val_at(0)?,
            pre_epoch: rlp.val_at(1)?,
            activated_total_quantity: rlp_codec::u128_at(rlp, 2)?,
            total_quantity: rlp_codec::u128_at(rlp, 3)?,
            activated_candidate_schedule: rlp.list_at(4)?,
            off_candidate_schedule: rlp.list_at(5)?,
            take_over: flag(rlp.val_at(6)?)?,
            dpos_active: flag(rlp.val_at(7)?)?,
            number: rlp.val_at(8)?,
        })
    }
}

/// Counter baseline of a primary slot holder, captured at the start of a
/// mini-epoch group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivatedCandidateInfo {
    /// The slot holder the baseline belongs to
    pub name: Name,
    /// Should-counter at capture time
    pub counter: u64,
    /// Actual-counter at capture time
    pub actual_counter: u64,
}

impl Encodable for ActivatedCandidateInfo {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.name);
        s.append(&self.counter);
        s.append(&self.actual_counter);
    }
}

impl Decodable for ActivatedCandidateInfo {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 3 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            name: rlp.val_at(0)?,
            counter: rlp.val_at(1)?,
            actual_counter: rlp.val_at(2)?,
        })
    }
}

/// Adapter binding the host state to the DPoS account namespace.
///
/// Mirrors the capability set the engine requires from the outside world:
/// namespaced reads and writes, historical snapshot reads, and the asset
/// operations expressed as internal [`Action`]s.
pub(crate) struct StateAdapter<'a> {
    account: Name,
    asset_id: u64,
    state: &'a mut dyn NodeState,
}

impl<'a> StateAdapter<'a> {
    pub(crate) fn new(account: Name, asset_id: u64, state: &'a mut dyn NodeState) -> Self {
        Self {
            account,
            asset_id,
            state,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.get(self.account.as_str(), key)?)
    }

    pub(crate) fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        Ok(self.state.put(self.account.as_str(), key, value)?)
    }

    pub(crate) fn delete(&mut self, key: &str) -> Result<()> {
        Ok(self.state.delete(self.account.as_str(), key)?)
    }

    pub(crate) fn get_snapshot(&self, key: &str, timestamp: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.state.get_snapshot(self.account.as_str(), key, timestamp)?)
    }

    /// Returns stake from the DPoS account to `to`, recording the transfer
    /// as an internal action.
    pub(crate) fn undelegate(&mut self, to: &Name, amount: u128) -> Result<Action> {
        let action = Action::transfer(self.account.clone(), to.clone(), self.asset_id, amount);
        self.state
            .transfer_asset(&self.account, to, self.asset_id, amount)?;
        Ok(action)
    }

    /// Issues `amount` to `to` on behalf of `from`, recording the issuance
    /// as an internal action.
    pub(crate) fn inc_asset_to_account(
        &mut self,
        from: &Name,
        to: &Name,
        amount: u128,
    ) -> Result<Action> {
        let action = Action::increase_asset(self.account.clone(), to.clone(), self.asset_id, amount);
        self.state
            .inc_asset_to_account(from, to, self.asset_id, amount)?;
        Ok(action)
    }

    pub(crate) fn is_valid_sign(&self, name: &Name, pubkey: &[u8]) -> bool {
        self.state.is_valid_sign(name, pubkey)
    }

    /// Balance of `name` at or before `timestamp`; a missing account reads
    /// as zero.
    pub(crate) fn get_balance_by_time(&self, name: &Name, timestamp: u64) -> Result<u128> {
        match self
            .state
            .get_balance_by_time(name, self.asset_id, timestamp)
        {
            Ok(balance) => Ok(balance),
            Err(AccountError::NotFound(_)) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

/// Typed access to the DPoS records.
pub struct DposDb<'a> {
    adapter: StateAdapter<'a>,
}

impl<'a> DposDb<'a> {
    /// Opens the schema over the host state, rooted at the given account
    /// namespace.
    pub fn new(account: Name, asset_id: u64, state: &'a mut dyn NodeState) -> Self {
        Self {
            adapter: StateAdapter::new(account, asset_id, state),
        }
    }

    pub(crate) fn adapter(&mut self) -> &mut StateAdapter<'a> {
        &mut self.adapter
    }

    fn decode<T: Decodable>(bytes: &[u8]) -> Result<T> {
        Ok(rlp::decode(bytes)?)
    }

    /// Loads a candidate record.
    pub fn get_candidate(&self, name: &Name) -> Result<Option<CandidateInfo>> {
        match self.adapter.get(&candidate_key(name))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores a candidate record, keeping the membership index current.
    pub fn set_candidate(&mut self, candidate: &CandidateInfo) -> Result<()> {
        let mut names = self.get_candidates()?;
        if !names.contains(&candidate.name) {
            names.push(candidate.name.clone());
            self.put_candidates(&names)?;
        }
        self.adapter
            .put(&candidate_key(&candidate.name), rlp::encode(candidate).to_vec())
    }

    /// Removes a candidate record and its index entry.
    pub fn del_candidate(&mut self, name: &Name) -> Result<()> {
        let mut names = self.get_candidates()?;
        if let Some(pos) = names.iter().position(|n| n == name) {
            names.remove(pos);
            self.put_candidates(&names)?;
        }
        self.adapter.delete(&candidate_key(name))
    }

    /// Lists every registered candidate name.
    pub fn get_candidates(&self) -> Result<Vec<Name>> {
        match self.adapter.get(CANDIDATES_KEY)? {
            Some(bytes) => {
                let rlp = Rlp::new(&bytes);
                Ok(rlp.as_list().map_err(DposError::Codec)?)
            }
            None => Ok(Vec::new()),
        }
    }

    fn put_candidates(&mut self, names: &[Name]) -> Result<()> {
        let mut s = RlpStream::new();
        s.append_list(names);
        self.adapter.put(CANDIDATES_KEY, s.out().to_vec())
    }

    /// Loads a voter record.
    pub fn get_voter(
        &self,
        epoch: u64,
        voter: &Name,
        candidate: &Name,
    ) -> Result<Option<VoterInfo>> {
        match self.adapter.get(&voter_key(epoch, voter, candidate))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores a voter record.
    pub fn set_voter(&mut self, voter: &VoterInfo) -> Result<()> {
        self.adapter.put(
            &voter_key(voter.epoch, &voter.name, &voter.candidate),
            rlp::encode(voter).to_vec(),
        )
    }

    /// Removes a voter record.
    pub fn del_voter(&mut self, epoch: u64, voter: &Name, candidate: &Name) -> Result<()> {
        self.adapter.delete(&voter_key(epoch, voter, candidate))
    }

    /// Loads the global state of `epoch`, failing when absent.
    pub fn get_state(&self, epoch: u64) -> Result<GlobalState> {
        self.try_get_state(epoch)?
            .ok_or(DposError::EpochNotFound(epoch))
    }

    /// Loads the global state of `epoch`, if present.
    pub fn try_get_state(&self, epoch: u64) -> Result<Option<GlobalState>> {
        match self.adapter.get(&state_key(epoch))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores the global state of its epoch.
    pub fn set_state(&mut self, state: &GlobalState) -> Result<()> {
        self.adapter
            .put(&state_key(state.epoch), rlp::encode(state).to_vec())
    }

    /// Loads the state of the most recently opened epoch.
    pub fn latest_state(&self) -> Result<GlobalState> {
        self.get_state(self.get_latest_epoch()?)
    }

    /// The highest epoch ever written; zero before genesis.
    pub fn get_latest_epoch(&self) -> Result<u64> {
        match self.adapter.get(LATEST_EPOCH_KEY)? {
            Some(bytes) => Ok(rlp::decode(&bytes)?),
            None => Ok(0),
        }
    }

    /// Advances the latest-epoch pointer. The pointer is monotonic; stale
    /// writes are ignored.
    pub fn set_latest_epoch(&mut self, epoch: u64) -> Result<()> {
        if let Some(bytes) = self.adapter.get(LATEST_EPOCH_KEY)? {
            let current: u64 = rlp::decode(&bytes)?;
            if epoch <= current {
                return Ok(());
            }
        }
        self.adapter
            .put(LATEST_EPOCH_KEY, rlp::encode(&epoch).to_vec())
    }

    /// Loads the free stake of `name` in `epoch`, if already derived.
    pub fn get_available_quantity(&self, epoch: u64, name: &Name) -> Result<Option<u128>> {
        match self.adapter.get(&avail_key(epoch, name))? {
            Some(bytes) => Ok(Some(rlp_codec::decode_u128(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores the free stake of `name` in `epoch`.
    pub fn set_available_quantity(&mut self, epoch: u64, name: &Name, quantity: u128) -> Result<()> {
        self.adapter
            .put(&avail_key(epoch, name), rlp_codec::encode_u128(quantity))
    }

    /// Loads a primary slot's counter baseline.
    pub fn get_activated_candidate(&self, offset: u64) -> Result<Option<ActivatedCandidateInfo>> {
        match self.adapter.get(&activated_key(offset))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores a primary slot's counter baseline.
    pub fn set_activated_candidate(
        &mut self,
        offset: u64,
        info: &ActivatedCandidateInfo,
    ) -> Result<()> {
        self.adapter
            .put(&activated_key(offset), rlp::encode(info).to_vec())
    }

    /// Historical candidate read at or before `timestamp`.
    pub fn get_candidate_info_by_time(
        &self,
        name: &Name,
        timestamp: u64,
    ) -> Result<Option<CandidateInfo>> {
        match self.adapter.get_snapshot(&candidate_key(name), timestamp)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Historical delegation summary for `name` at or before `timestamp`:
    /// self-stake, total stake, and registered-candidate count, all in
    /// unit-stake multiples.
    pub fn get_delegated_by_time(&self, name: &Name, timestamp: u64) -> Result<(u128, u128, u64)> {
        let info = match self.get_candidate_info_by_time(name, timestamp)? {
            Some(info) => info,
            None => return Ok((0, 0, 0)),
        };
        let count = match self.adapter.get_snapshot(CANDIDATES_KEY, timestamp)? {
            Some(bytes) => Rlp::new(&bytes)
                .as_list::<Name>()
                .map_err(DposError::Codec)?
                .len() as u64,
            None => 0,
        };
        Ok((info.quantity, info.total_quantity, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_rlp_roundtrip() {
        let info = CandidateInfo {
            epoch: 3,
            name: "alice".parse().unwrap(),
            url: "https://alice.example".to_string(),
            quantity: 30,
            total_quantity: 42,
            number: 100,
            counter: 12,
            actual_counter: 11,
            kind: CandidateType::Normal,
        };
        let decoded: CandidateInfo = rlp::decode(&rlp::encode(&info)).unwrap();
        assert_eq!(info, decoded);
    }

    #[test]
    fn test_global_state_rlp_roundtrip() {
        let state = GlobalState {
            epoch: 5,
            pre_epoch: 4,
            activated_total_quantity: 100,
            total_quantity: 140,
            activated_candidate_schedule: vec![
                "alice".parse().unwrap(),
                "bob".parse().unwrap(),
                "carol".parse().unwrap(),
            ],
            off_candidate_schedule: vec![1],
            take_over: true,
            dpos_active: true,
            number: 777,
        };
        let decoded: GlobalState = rlp::decode(&rlp::encode(&state)).unwrap();
        assert_eq!(state, decoded);
    }

    #[test]
    fn test_producer_for_offset_follows_replacements() {
        let state = GlobalState {
            epoch: 1,
            pre_epoch: 0,
            activated_total_quantity: 0,
            total_quantity: 0,
            activated_candidate_schedule: vec![
                "alice".parse().unwrap(),
                "bob".parse().unwrap(),
                "carol".parse().unwrap(),
                "dave".parse().unwrap(),
                "erin".parse().unwrap(),
            ],
            // Slot 1 replaced twice: first by dave (backup 0), then by erin.
            off_candidate_schedule: vec![1, 1],
            take_over: false,
            dpos_active: true,
            number: 0,
        };
        assert_eq!(
            state.producer_for_offset(0, 3).unwrap().as_str(),
            "alice"
        );
        // The most recent replacement wins.
        assert_eq!(state.producer_for_offset(1, 3).unwrap().as_str(), "erin");
        assert_eq!(state.producer_for_offset(9, 3), None);
    }

    #[test]
    fn test_key_layout_is_stable() {
        let alice: Name = "alice".parse().unwrap();
        let bob: Name = "bob".parse().unwrap();
        assert_eq!(candidate_key(&alice), "candidate/alice");
        assert_eq!(voter_key(4, &bob, &alice), "voter/4/bob/alice");
        assert_eq!(state_key(9), "state/9");
        assert_eq!(avail_key(2, &bob), "availQ/2/bob");
        assert_eq!(activated_key(0), "actCand/0");
        assert_eq!(LATEST_EPOCH_KEY, "latestEpoch");
        assert_eq!(CANDIDATES_KEY, "candidates");
    }
}
