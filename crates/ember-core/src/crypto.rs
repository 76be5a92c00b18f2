//! ECDSA (P-256) key material and the protocol's hash primitives.
//!
//! Public keys travel on the wire as the raw `X || Y` coordinate
//! concatenation (64 bytes, no SEC1 tag). Outputs are locked with the
//! 20-byte pubkey hash `RIPEMD-160(SHA-256(X || Y))`.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::ADDRESS_CHECKSUM_LEN;
use crate::error::CryptoError;

/// A P-256 keypair for signing transaction inputs.
///
/// Wraps [`p256::ecdsa::SigningKey`]. Use [`KeyPair::generate`] for random
/// keys or [`KeyPair::from_secret_bytes`] to restore a persisted one.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Restore a keypair from 32-byte secret scalar material.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// The raw secret scalar (32 bytes). Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// The public key as the `X || Y` coordinate concatenation (64 bytes).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        // Skip the SEC1 0x04 tag byte.
        point.as_bytes()[1..].to_vec()
    }

    /// Sign a message, returning the fixed `r || s` encoding (64 bytes).
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(message);
        signature.to_vec()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Verify an `r || s` signature over `message` with an `X || Y` public key.
///
/// Malformed key or signature bytes verify as `false` rather than erroring:
/// such inputs can arrive off the wire and are simply invalid spends.
pub fn verify_signature(pubkey_xy: &[u8], message: &[u8], sig_rs: &[u8]) -> bool {
    if pubkey_xy.len() != 64 {
        return false;
    }
    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(pubkey_xy);

    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&sec1) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(sig_rs) else {
        return false;
    };
    verifying_key.verify(message, &signature).is_ok()
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// The 20-byte pubkey hash: `RIPEMD-160(SHA-256(pubkey))`.
pub fn hash_pubkey(pubkey: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(pubkey);
    Ripemd160::digest(sha).to_vec()
}

/// First four bytes of `SHA-256(SHA-256(payload))`, the address checksum.
pub fn checksum(payload: &[u8]) -> Vec<u8> {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    second[..ADDRESS_CHECKSUM_LEN].to_vec()
}
