//! Shared fakes for the consensus integration tests: an in-memory
//! implementation of the host-node traits and a scripted chain reader.

#![allow(dead_code)]

use meridian_core::{
    AccountError, AccountManager, ChainConfig, ChainError, ChainReader, NodeState, SnapshotInfo,
    Snapshots, State, StateResult,
};
use meridian_types::{Block, BlockHeader, Name, H256};
use std::collections::{BTreeMap, HashMap};

/// In-memory state store with timestamped history for snapshot reads.
#[derive(Clone, Default)]
pub struct MemState {
    data: BTreeMap<(String, String), Vec<u8>>,
    history: Vec<(u64, (String, String), Vec<u8>)>,
    now: u64,
    balances: HashMap<String, u128>,
    keys: HashMap<String, Vec<Vec<u8>>>,
    pub transfers: Vec<(String, String, u128)>,
    pub issuances: Vec<(String, String, u128)>,
    pub snapshots: Vec<(u64, SnapshotInfo)>,
}

impl MemState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timestamp stamped onto subsequent writes.
    pub fn set_time(&mut self, now: u64) {
        self.now = now;
    }

    /// Fixes the balance `get_balance_by_time` reports for `name`.
    pub fn set_balance(&mut self, name: &str, amount: u128) {
        self.balances.insert(name.to_string(), amount);
    }

    /// Registers a signing key for `name`.
    pub fn register_key(&mut self, name: &str, key: Vec<u8>) {
        self.keys.entry(name.to_string()).or_default().push(key);
    }
}

impl State for MemState {
    fn get(&self, account: &str, key: &str) -> StateResult<Option<Vec<u8>>> {
        Ok(self
            .data
            .get(&(account.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&mut self, account: &str, key: &str, value: Vec<u8>) -> StateResult<()> {
        let entry = (account.to_string(), key.to_string());
        self.history.push((self.now, entry.clone(), value.clone()));
        self.data.insert(entry, value);
        Ok(())
    }

    fn delete(&mut self, account: &str, key: &str) -> StateResult<()> {
        self.data.remove(&(account.to_string(), key.to_string()));
        Ok(())
    }

    fn get_snapshot(
        &self,
        account: &str,
        key: &str,
        timestamp: u64,
    ) -> StateResult<Option<Vec<u8>>> {
        let entry = (account.to_string(), key.to_string());
        Ok(self
            .history
            .iter()
            .rev()
            .find(|(t, k, _)| *t <= timestamp && *k == entry)
            .map(|(_, _, v)| v.clone()))
    }

    fn intermediate_root(&self) -> H256 {
        let mut buf = Vec::new();
        for ((account, key), value) in &self.data {
            buf.extend_from_slice(account.as_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(value);
        }
        H256::keccak256(&buf)
    }
}

impl AccountManager for MemState {
    fn transfer_asset(
        &mut self,
        from: &Name,
        to: &Name,
        _asset_id: u64,
        amount: u128,
    ) -> Result<(), AccountError> {
        self.transfers
            .push((from.to_string(), to.to_string(), amount));
        Ok(())
    }

    fn inc_asset_to_account(
        &mut self,
        from: &Name,
        to: &Name,
        _asset_id: u64,
        amount: u128,
    ) -> Result<(), AccountError> {
        self.issuances
            .push((from.to_string(), to.to_string(), amount));
        Ok(())
    }

    fn get_balance_by_time(
        &self,
        name: &Name,
        _asset_id: u64,
        _timestamp: u64,
    ) -> Result<u128, AccountError> {
        self.balances
            .get(name.as_str())
            .copied()
            .ok_or_else(|| AccountError::NotFound(name.to_string()))
    }

    fn is_valid_sign(&self, name: &Name, pubkey: &[u8]) -> bool {
        self.keys
            .get(name.as_str())
            .map(|keys| keys.iter().any(|k| k == pubkey))
            .unwrap_or(false)
    }
}

impl Snapshots for MemState {
    fn set_snapshot(&mut self, timestamp: u64, info: SnapshotInfo) -> StateResult<()> {
        self.snapshots.push((timestamp, info));
        Ok(())
    }
}

/// Scripted chain reader over a set of headers.
pub struct MockChain {
    config: ChainConfig,
    by_hash: HashMap<H256, BlockHeader>,
    by_number: HashMap<u64, H256>,
    head: Option<H256>,
    state_template: Option<MemState>,
}

impl MockChain {
    pub fn new(chain_id: u64, snapshot_interval: u64) -> Self {
        Self {
            config: ChainConfig {
                chain_id,
                snapshot_interval,
            },
            by_hash: HashMap::new(),
            by_number: HashMap::new(),
            head: None,
            state_template: None,
        }
    }

    /// Installs the state `state_at` hands out (cloned per call).
    pub fn set_state(&mut self, state: MemState) {
        self.state_template = Some(state);
    }

    /// Adds a header, making it the head, and returns its hash.
    pub fn add_header(&mut self, header: BlockHeader) -> H256 {
        let hash = header.hash();
        self.by_number.insert(header.number, hash);
        self.by_hash.insert(hash, header);
        self.head = Some(hash);
        hash
    }
}

impl ChainReader for MockChain {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn current_header(&self) -> BlockHeader {
        let head = self.head.expect("mock chain has no head");
        self.by_hash[&head].clone()
    }

    fn get_header(&self, hash: &H256, number: u64) -> Option<BlockHeader> {
        self.by_hash
            .get(hash)
            .filter(|header| header.number == number)
            .cloned()
    }

    fn get_header_by_hash(&self, hash: &H256) -> Option<BlockHeader> {
        self.by_hash.get(hash).cloned()
    }

    fn get_header_by_number(&self, number: u64) -> Option<BlockHeader> {
        self.by_number
            .get(&number)
            .and_then(|hash| self.by_hash.get(hash))
            .cloned()
    }

    fn state_at(&self, root: H256) -> Result<Box<dyn NodeState>, ChainError> {
        match &self.state_template {
            Some(state) => Ok(Box::new(state.clone())),
            None => Err(ChainError::StateUnavailable(root)),
        }
    }

    fn fork_update(&self, _block: &Block, _state: &mut dyn NodeState) -> Result<(), ChainError> {
        Ok(())
    }
}

/// Parses a name, panicking on invalid test input.
pub fn name(s: &str) -> Name {
    s.parse().expect("valid test name")
}

/// A header produced by `coinbase` at `time` on top of `parent`.
pub fn header_on(
    parent: &BlockHeader,
    coinbase: &str,
    time: u64,
    fork_id: u64,
) -> BlockHeader {
    BlockHeader {
        parent_hash: parent.hash(),
        coinbase: name(coinbase),
        number: parent.number + 1,
        time,
        fork_id,
        ..Default::default()
    }
}
