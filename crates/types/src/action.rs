//! Transactions, receipts, and internal actions.
//!
//! Transaction execution is outside the consensus engine; blocks carry
//! opaque transaction payloads. Internal actions record the asset movements
//! the consensus layer itself performs (undelegations, reward credits) so
//! they land in the block's receipt list and commit atomically with state.

use crate::rlp_codec;
use crate::{Name, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

/// An opaque transaction payload.
///
/// The consensus engine never interprets transaction contents; it only
/// threads them through `Finalize` into the assembled block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Raw encoded transaction bytes
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Creates a transaction from raw bytes.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Returns the transaction hash.
    pub fn hash(&self) -> H256 {
        H256::keccak256(&self.payload)
    }
}

/// The kind of an internal asset movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Asset transfer between two accounts
    Transfer,
    /// Asset issuance credited to an account
    IncreaseAsset,
}

impl ActionKind {
    fn as_u8(self) -> u8 {
        match self {
            ActionKind::Transfer => 0,
            ActionKind::IncreaseAsset => 1,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ActionKind::Transfer),
            1 => Some(ActionKind::IncreaseAsset),
            _ => None,
        }
    }
}

/// An internal asset movement performed by the consensus layer.
///
/// Vote-subsystem operations queue these for the block's receipt list so the
/// balance transfers apply atomically with the state commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// The kind of movement
    pub kind: ActionKind,
    /// Source account
    pub from: Name,
    /// Destination account
    pub to: Name,
    /// Asset being moved
    pub asset_id: u64,
    /// Amount in base asset units
    pub amount: u128,
}

impl Action {
    /// Creates a transfer action.
    pub fn transfer(from: Name, to: Name, asset_id: u64, amount: u128) -> Self {
        Self {
            kind: ActionKind::Transfer,
            from,
            to,
            asset_id,
            amount,
        }
    }

    /// Creates an asset-issuance action.
    pub fn increase_asset(from: Name, to: Name, asset_id: u64, amount: u128) -> Self {
        Self {
            kind: ActionKind::IncreaseAsset,
            from,
            to,
            asset_id,
            amount,
        }
    }
}

impl Encodable for Action {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.kind.as_u8());
        s.append(&self.from);
        s.append(&self.to);
        s.append(&self.asset_id);
        rlp_codec::append_u128(s, self.amount);
    }
}

impl Decodable for Action {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let kind = ActionKind::from_u8(rlp.val_at(0)?)
            .ok_or(DecoderError::Custom("unknown action kind"))?;
        Ok(Self {
            kind,
            from: rlp.val_at(1)?,
            to: rlp.val_at(2)?,
            asset_id: rlp.val_at(3)?,
            amount: rlp_codec::u128_at(rlp, 4)?,
        })
    }
}

/// A transaction receipt.
///
/// Only the consensus-relevant part is modelled: the internal actions the
/// engine attached while processing the block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Internal asset movements recorded against this block
    pub internal_actions: Vec<Action>,
}

impl Receipt {
    /// Creates a receipt carrying the given internal actions.
    pub fn with_actions(internal_actions: Vec<Action>) -> Self {
        Self { internal_actions }
    }
}
