//! Proof of work: nonce search against a difficulty-derived target.
//!
//! The target is `1 << (256 - bits)` as an unsigned 256-bit integer. A block
//! hash wins when, read as a big-endian integer, it is strictly below the
//! target. The 32-byte array comparison is exactly that integer comparison.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::constants::{MAX_NONCE, TARGET_BITS};
use crate::crypto::sha256;
use crate::error::{EmberError, PowError, TxError};
use crate::types::Block;

/// The nonce puzzle for one block.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: [u8; 32],
    bits: u32,
}

impl<'a> ProofOfWork<'a> {
    /// Puzzle at the default difficulty.
    pub fn new(block: &'a Block) -> Self {
        Self::with_bits(block, TARGET_BITS)
    }

    /// Puzzle at an explicit difficulty.
    pub fn with_bits(block: &'a Block, bits: u32) -> Self {
        Self {
            block,
            target: target_bytes(bits),
            bits,
        }
    }

    /// Search for a winning nonce, checking `cancel` at every boundary.
    ///
    /// Mutates nothing; the caller installs the returned `(nonce, hash)`.
    pub fn run(&self, cancel: &AtomicBool) -> Result<(i64, [u8; 32]), EmberError> {
        let merkle = self.block.hash_transactions()?;
        debug!(height = self.block.height, bits = self.bits, "mining block");

        let mut nonce = 0i64;
        while nonce < MAX_NONCE {
            if cancel.load(Ordering::Relaxed) {
                return Err(PowError::Canceled.into());
            }
            let hash = sha256(&self.data(&merkle, nonce));
            if hash < self.target {
                debug!(nonce, hash = %hex::encode(hash), "found nonce");
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(PowError::Exhausted.into())
    }

    /// Recompute the hash with the stored nonce and compare to the target.
    pub fn validate(&self) -> Result<bool, TxError> {
        let merkle = self.block.hash_transactions()?;
        let hash = sha256(&self.data(&merkle, self.block.nonce));
        Ok(hash < self.target)
    }

    /// `prev_hash || merkle_root || BE64(timestamp) || BE64(bits) || BE64(nonce)`.
    fn data(&self, merkle: &[u8], nonce: i64) -> Vec<u8> {
        let mut data =
            Vec::with_capacity(self.block.prev_hash.len() + merkle.len() + 3 * 8);
        data.extend_from_slice(&self.block.prev_hash);
        data.extend_from_slice(merkle);
        data.extend_from_slice(&self.block.timestamp.to_be_bytes());
        data.extend_from_slice(&(self.bits as i64).to_be_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }
}

/// The 32-byte big-endian representation of `1 << (256 - bits)`.
///
/// `bits` must be in `1..=255`.
pub fn target_bytes(bits: u32) -> [u8; 32] {
    assert!((1..=255).contains(&bits), "difficulty bits out of range: {bits}");
    let position = 256 - bits;
    let mut target = [0u8; 32];
    target[31 - (position / 8) as usize] = 1 << (position % 8);
    target
}
