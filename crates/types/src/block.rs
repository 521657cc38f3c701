//! Block and BlockHeader types for Meridian.
//!
//! The header carries the DPoS consensus fields: the producing account in
//! `coinbase`, the producer's declared `proposed_irreversible` height, the
//! fork id selecting the consensus dialect, and the `extra` field whose
//! trailing [`SEAL_LENGTH`] bytes hold the recoverable producer signature.

use crate::{Error, Name, Result, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the trailing producer seal in the header extra field
/// (`r ‖ s ‖ v` recoverable ECDSA signature).
pub const SEAL_LENGTH: usize = 65;

/// A block header.
///
/// The hash of a header is the Keccak256 of its RLP encoding. The signing
/// digest ([`BlockHeader::sign_hash`]) is computed with the trailing seal
/// bytes stripped from `extra`, so rewriting the seal never changes the
/// signed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the parent block
    pub parent_hash: H256,
    /// Account name of the block producer
    pub coinbase: Name,
    /// Merkle root of the world state after executing this block
    pub state_root: H256,
    /// Merkle root of the transactions in this block
    pub transactions_root: H256,
    /// Merkle root of the transaction receipts
    pub receipts_root: H256,
    /// Block height (genesis is 0)
    pub number: u64,
    /// Maximum gas allowed in this block
    pub gas_limit: u64,
    /// Total gas used by all transactions in this block
    pub gas_used: u64,
    /// Unix timestamp in milliseconds
    pub time: u64,
    /// Slot-based difficulty (informational; ordering is slot-based)
    pub difficulty: u64,
    /// Arbitrary producer data followed by the trailing fixed-size seal
    #[serde(with = "hex_bytes")]
    pub extra: Vec<u8>,
    /// Fork id selecting the consensus dialect for this block
    pub fork_id: u64,
    /// Highest block number this producer proposes as irreversible
    pub proposed_irreversible: u64,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            parent_hash: H256::NIL,
            coinbase: Name::default(),
            state_root: H256::NIL,
            transactions_root: H256::NIL,
            receipts_root: H256::NIL,
            number: 0,
            gas_limit: 30_000_000,
            gas_used: 0,
            time: 0,
            difficulty: 0,
            extra: Vec::new(),
            fork_id: 0,
            proposed_irreversible: 0,
        }
    }
}

impl BlockHeader {
    /// Computes the hash of this block header.
    ///
    /// The hash is the Keccak256 of the RLP-encoded header.
    pub fn hash(&self) -> H256 {
        H256::keccak256(&rlp::encode(self))
    }

    /// Computes the signing digest for this header.
    ///
    /// The digest covers the RLP encoding with the trailing seal stripped
    /// from `extra`, domain-separated by the chain id, so the signature can
    /// be written into the seal slot without invalidating itself.
    pub fn sign_hash(&self, chain_id: u64) -> H256 {
        let mut unsealed = self.clone();
        if unsealed.extra.len() >= SEAL_LENGTH {
            let keep = unsealed.extra.len() - SEAL_LENGTH;
            unsealed.extra.truncate(keep);
        }
        H256::keccak256_concat(&[&rlp::encode(&unsealed), &chain_id.to_be_bytes()])
    }

    /// Returns the trailing seal bytes, if the extra field is large enough
    /// to hold them.
    pub fn seal(&self) -> Option<&[u8]> {
        if self.extra.len() < SEAL_LENGTH {
            return None;
        }
        Some(&self.extra[self.extra.len() - SEAL_LENGTH..])
    }

    /// Writes the seal into the reserved trailing bytes of `extra`.
    ///
    /// Returns an error if `Prepare` has not reserved the seal space.
    pub fn set_seal(&mut self, seal: &[u8; SEAL_LENGTH]) -> Result<()> {
        if self.extra.len() < SEAL_LENGTH {
            return Err(Error::InvalidLength {
                expected: SEAL_LENGTH,
                actual: self.extra.len(),
            });
        }
        let start = self.extra.len() - SEAL_LENGTH;
        self.extra[start..].copy_from_slice(seal);
        Ok(())
    }
}

impl Encodable for BlockHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(13);
        s.append(&self.parent_hash);
        s.append(&self.coinbase);
        s.append(&self.state_root);
        s.append(&self.transactions_root);
        s.append(&self.receipts_root);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.time);
        s.append(&self.difficulty);
        s.append(&self.extra);
        s.append(&self.fork_id);
        s.append(&self.proposed_irreversible);
    }
}

impl Decodable for BlockHeader {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 13 {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        Ok(Self {
            parent_hash: rlp.val_at(0)?,
            coinbase: rlp.val_at(1)?,
            state_root: rlp.val_at(2)?,
            transactions_root: rlp.val_at(3)?,
            receipts_root: rlp.val_at(4)?,
            number: rlp.val_at(5)?,
            gas_limit: rlp.val_at(6)?,
            gas_used: rlp.val_at(7)?,
            time: rlp.val_at(8)?,
            difficulty: rlp.val_at(9)?,
            extra: rlp.val_at(10)?,
            fork_id: rlp.val_at(11)?,
            proposed_irreversible: rlp.val_at(12)?,
        })
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} (hash: {}, producer: {}, time: {})",
            self.number,
            self.hash(),
            self.coinbase,
            self.time
        )
    }
}

/// A complete block containing header and transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block header
    pub header: BlockHeader,
    /// The transactions in this block
    pub transactions: Vec<crate::Transaction>,
}

impl Block {
    /// Creates a new block with the given header and transactions.
    pub fn new(header: BlockHeader, transactions: Vec<crate::Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Returns the block hash (hash of the header).
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Returns the block height.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Returns the parent hash.
    pub fn parent_hash(&self) -> H256 {
        self.header.parent_hash
    }

    /// Returns a copy of this block carrying the given sealed header.
    pub fn with_seal(&self, header: BlockHeader) -> Self {
        Self {
            header,
            transactions: self.transactions.clone(),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} (hash: {}, {} txs)",
            self.header.number,
            self.hash(),
            self.transactions.len()
        )
    }
}

/// Serde helper for serializing bytes as hex.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        BlockHeader {
            parent_hash: H256::keccak256(b"parent"),
            coinbase: "alice".parse().unwrap(),
            number: 7,
            time: 21_000,
            difficulty: 8,
            extra: vec![0u8; SEAL_LENGTH],
            ..Default::default()
        }
    }

    #[test]
    fn test_header_rlp_roundtrip() {
        let h = header();
        let encoded = rlp::encode(&h);
        let decoded: BlockHeader = rlp::decode(&encoded).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn test_sign_hash_ignores_seal() {
        let mut h = header();
        let before = h.sign_hash(1);
        h.set_seal(&[0xab; SEAL_LENGTH]).unwrap();
        assert_eq!(before, h.sign_hash(1));
        // The full hash does change with the seal.
        assert_ne!(h.hash(), {
            let mut unsealed = h.clone();
            unsealed.set_seal(&[0u8; SEAL_LENGTH]).unwrap();
            unsealed.hash()
        });
    }

    #[test]
    fn test_sign_hash_is_chain_scoped() {
        let h = header();
        assert_ne!(h.sign_hash(1), h.sign_hash(2));
    }

    #[test]
    fn test_seal_requires_reserved_space() {
        let mut h = header();
        h.extra.clear();
        assert!(h.seal().is_none());
        assert!(h.set_seal(&[0u8; SEAL_LENGTH]).is_err());
    }
}
