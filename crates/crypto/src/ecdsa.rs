//! ECDSA signatures over secp256k1 with public-key recovery.
//!
//! Producers seal block headers with a 65-byte `r ‖ s ‖ v` signature over
//! the header's signing digest; verifiers recover the public key from the
//! seal and check it against the producer account's registered keys.
//!
//! ## Example
//!
//! ```rust
//! use meridian_crypto::{keccak256, PrivateKey};
//!
//! let key = PrivateKey::random();
//! let digest = keccak256(b"header bytes");
//!
//! let sig = key.sign_prehash(&digest).unwrap();
//! let recovered = sig.recover_prehash(&digest).unwrap();
//! assert_eq!(recovered, key.public_key());
//! ```

use crate::{CryptoError, Result};
use k256::{
    ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    EncodedPoint, PublicKey as K256PublicKey, SecretKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Length of a recoverable signature in bytes (`r ‖ s ‖ v`).
pub const SIGNATURE_LENGTH: usize = 65;

/// ECDSA private key (32 bytes).
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generates a random private key using a cryptographically secure RNG.
    pub fn random() -> Self {
        let secret_key = SecretKey::random(&mut OsRng);
        Self {
            inner: SigningKey::from(secret_key),
        }
    }

    /// Creates a private key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes don't represent a valid scalar.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secret_key = SecretKey::from_bytes(bytes.into())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self {
            inner: SigningKey::from(secret_key),
        })
    }

    /// Creates a private key from a hex string (with or without 0x prefix).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    /// Returns the raw bytes of the private key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes().into()
    }

    /// Derives the public key from this private key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Signs a pre-hashed 32-byte digest, producing a recoverable signature.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<Signature> {
        let (sig, recovery_id) = self
            .inner
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

        let r: [u8; 32] = sig.r().to_bytes().into();
        let s: [u8; 32] = sig.s().to_bytes().into();

        Ok(Signature {
            r,
            s,
            v: recovery_id.to_byte(),
        })
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// ECDSA public key.
///
/// Carried as SEC1 bytes: 33-byte compressed or 64-byte uncompressed
/// (without the 0x04 prefix).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Creates a public key from uncompressed bytes (64 bytes, no prefix).
    pub fn from_uncompressed(bytes: &[u8; 64]) -> Result<Self> {
        let mut prefixed = [0u8; 65];
        prefixed[0] = 0x04;
        prefixed[1..].copy_from_slice(bytes);

        let point = EncodedPoint::from_bytes(prefixed)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

        let public_key = K256PublicKey::from_encoded_point(&point);
        if public_key.is_none().into() {
            return Err(CryptoError::InvalidPublicKey(
                "invalid point on curve".to_string(),
            ));
        }

        Ok(Self {
            inner: VerifyingKey::from(public_key.unwrap()),
        })
    }

    /// Creates a public key from SEC1-encoded bytes.
    ///
    /// Accepts 33-byte compressed or 65-byte (0x04-prefixed) uncompressed
    /// encodings.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self {
            inner: verifying_key,
        })
    }

    /// Returns the uncompressed public key bytes (64 bytes, no prefix).
    pub fn to_uncompressed(&self) -> [u8; 64] {
        let point = self.inner.to_encoded_point(false);
        let bytes = point.as_bytes();
        let mut result = [0u8; 64];
        result.copy_from_slice(&bytes[1..65]);
        result
    }

    /// Returns the compressed public key bytes (33 bytes).
    pub fn to_compressed(&self) -> [u8; 33] {
        let point = self.inner.to_encoded_point(true);
        let mut result = [0u8; 33];
        result.copy_from_slice(point.as_bytes());
        result
    }

    /// Verifies a signature against a pre-hashed digest.
    pub fn verify_prehash(&self, digest: &[u8; 32], signature: &Signature) -> Result<bool> {
        let sig = signature.to_k256_signature()?;

        use k256::ecdsa::signature::hazmat::PrehashVerifier;
        match self.inner.verify_prehash(digest, &sig) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("compressed", &hex::encode(self.to_compressed()))
            .finish()
    }
}

/// ECDSA signature with recovery id.
///
/// Serialized as 65 bytes: `r` (32) ‖ `s` (32) ‖ `v` (1, recovery id 0/1).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// The r component (32 bytes)
    pub r: [u8; 32],
    /// The s component (32 bytes)
    pub s: [u8; 32],
    /// Recovery id (0 or 1)
    pub v: u8,
}

impl Signature {
    /// Creates a signature from raw bytes (`r ‖ s ‖ v`).
    pub fn from_bytes(bytes: &[u8; SIGNATURE_LENGTH]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);
        Self { r, s, v: bytes[64] }
    }

    /// Creates a signature from a byte slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(CryptoError::InvalidLength {
                expected: SIGNATURE_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_LENGTH];
        arr.copy_from_slice(bytes);
        Ok(Self::from_bytes(&arr))
    }

    /// Returns the signature as raw bytes (`r ‖ s ‖ v`).
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v;
        bytes
    }

    fn to_k256_signature(&self) -> Result<K256Signature> {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        K256Signature::from_bytes((&bytes).into())
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }

    /// Recovers the public key from this signature and the signed digest.
    pub fn recover_prehash(&self, digest: &[u8; 32]) -> Result<PublicKey> {
        let sig = self.to_k256_signature()?;
        let recovery_id = RecoveryId::from_byte(self.v)
            .ok_or_else(|| CryptoError::RecoveryFailed("invalid recovery id".to_string()))?;

        let verifying_key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
            .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;

        Ok(PublicKey {
            inner: verifying_key,
        })
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signature")
            .field("r", &hex::encode(self.r))
            .field("s", &hex::encode(self.s))
            .field("v", &self.v)
            .finish()
    }
}
