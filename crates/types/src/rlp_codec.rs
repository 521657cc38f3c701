//! RLP helpers for 128-bit quantities.
//!
//! Stake amounts and quantities are `u128`; they are encoded as
//! big-endian byte strings with leading zeros stripped, matching the
//! canonical integer encoding of the surrounding codec.

use rlp::{DecoderError, Rlp, RlpStream};

/// Appends a `u128` to the stream as a trimmed big-endian byte string.
pub fn append_u128(s: &mut RlpStream, value: u128) {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    s.append(&&bytes[first..]);
}

/// Decodes a `u128` list item encoded by [`append_u128`].
pub fn u128_at(rlp: &Rlp<'_>, index: usize) -> Result<u128, DecoderError> {
    u128_from_bytes(&rlp.val_at::<Vec<u8>>(index)?)
}

/// Encodes a `u128` as a standalone RLP value.
pub fn encode_u128(value: u128) -> Vec<u8> {
    let mut s = RlpStream::new();
    append_u128(&mut s, value);
    s.out().to_vec()
}

/// Decodes a standalone RLP value produced by [`encode_u128`].
pub fn decode_u128(data: &[u8]) -> Result<u128, DecoderError> {
    u128_from_bytes(&Rlp::new(data).as_val::<Vec<u8>>()?)
}

fn u128_from_bytes(bytes: &[u8]) -> Result<u128, DecoderError> {
    if bytes.len() > 16 {
        return Err(DecoderError::RlpIsTooBig);
    }
    if bytes.first() == Some(&0) {
        return Err(DecoderError::RlpInvalidIndirection);
    }
    let mut buf = [0u8; 16];
    buf[16 - bytes.len()..].copy_from_slice(bytes);
    Ok(u128::from_be_bytes(buf))
}
