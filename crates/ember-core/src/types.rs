//! Core protocol types: transactions and blocks.
//!
//! Identifier fields (`id`, `prev_txid`, `prev_hash`, `hash`) are raw byte
//! strings so that the empty value can act as the coinbase and genesis
//! marker, matching the wire format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

use crate::constants::{COINBASE_RANDOM_LEN, SUBSIDY};
use crate::crypto::{hash_pubkey, sha256};
use crate::error::{AddressError, EmberError, TxError};
use crate::merkle::merkle_root;
use crate::{address, pow};

/// Marker output index carried by coinbase inputs.
pub const COINBASE_VOUT: i32 = -1;

/// A transaction input, spending one output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxIn {
    /// Id of the transaction whose output is being spent. Empty for coinbase.
    pub prev_txid: Vec<u8>,
    /// Index of the spent output. [`COINBASE_VOUT`] for coinbase.
    pub prev_vout: i32,
    /// ECDSA signature `r || s` over the trimmed-copy payload. Empty until signed.
    pub signature: Vec<u8>,
    /// Spender's public key `X || Y`. Coinbase inputs carry an arbitrary payload here.
    pub pubkey: Vec<u8>,
}

impl TxIn {
    /// True when the key embedded in this input hashes to `pubkey_hash`.
    pub fn unlockable_with(&self, pubkey_hash: &[u8]) -> bool {
        hash_pubkey(&self.pubkey) == pubkey_hash
    }
}

/// A transaction output, locking `value` coins to a pubkey hash.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOut {
    /// Output value in whole coins.
    pub value: u64,
    /// 20-byte pubkey hash of the recipient.
    pub pubkey_hash: Vec<u8>,
}

impl TxOut {
    /// Create an output paying `value` to the holder of `addr`.
    pub fn pay_to_address(value: u64, addr: &str) -> Result<Self, AddressError> {
        Ok(Self {
            value,
            pubkey_hash: address::pubkey_hash_of(addr)?,
        })
    }

    /// True when this output is locked with `pubkey_hash`.
    pub fn locked_with(&self, pubkey_hash: &[u8]) -> bool {
        self.pubkey_hash == pubkey_hash
    }
}

/// A transfer of coins, consuming previous outputs and creating new ones.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// SHA-256 of the serialized transaction with `id` empty. Stable after
    /// construction, including across network transfer.
    pub id: Vec<u8>,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// Canonical byte encoding used for hashing, Merkle leaves, and the wire.
    pub fn serialize(&self) -> Result<Vec<u8>, TxError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TxError::Serialization(e.to_string()))
    }

    /// Decode a transaction from its canonical encoding.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TxError> {
        let (tx, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| TxError::Serialization(e.to_string()))?;
        Ok(tx)
    }

    /// Compute the transaction id: SHA-256 of the encoding with `id` cleared.
    pub fn hash(&self) -> Result<Vec<u8>, TxError> {
        let mut copied = self.clone();
        copied.id = Vec::new();
        Ok(sha256(&copied.serialize()?).to_vec())
    }

    /// Hex form of the id, used as the mempool and prev-tx lookup key.
    pub fn hex_id(&self) -> String {
        hex::encode(&self.id)
    }

    /// True for the reward transaction: one input with no previous outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_txid.is_empty()
            && self.inputs[0].prev_vout == COINBASE_VOUT
    }

    /// Copy with signatures and pubkeys cleared, the base of the signing payload.
    pub fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: self.id.clone(),
            inputs: self
                .inputs
                .iter()
                .map(|input| TxIn {
                    prev_txid: input.prev_txid.clone(),
                    prev_vout: input.prev_vout,
                    signature: Vec::new(),
                    pubkey: Vec::new(),
                })
                .collect(),
            outputs: self.outputs.clone(),
        }
    }

    /// Build a coinbase transaction paying the subsidy to `to`.
    ///
    /// With no payload given, a random 20-byte salt is hex-encoded into the
    /// input so that every coinbase has a distinct id.
    pub fn new_coinbase(to: &str, data: Option<Vec<u8>>) -> Result<Self, TxError> {
        let payload = match data {
            Some(bytes) => bytes,
            None => {
                let mut salt = [0u8; COINBASE_RANDOM_LEN];
                rand::thread_rng().fill_bytes(&mut salt);
                hex::encode(salt).into_bytes()
            }
        };

        let input = TxIn {
            prev_txid: Vec::new(),
            prev_vout: COINBASE_VOUT,
            signature: Vec::new(),
            pubkey: payload,
        };
        let output = TxOut::pay_to_address(SUBSIDY, to)?;

        let mut tx = Transaction {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![output],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " - transaction {}", hex::encode(&self.id))?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     input {i}")?;
            writeln!(f, "       txid: {}", hex::encode(&input.prev_txid))?;
            writeln!(f, "       out: {}", input.prev_vout)?;
            writeln!(f, "       sig: {}", hex::encode(&input.signature))?;
            writeln!(f, "       pubkey: {}", hex::encode(&input.pubkey))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     output {i}")?;
            writeln!(f, "       value: {}", output.value)?;
            writeln!(f, "       pubkey_hash: {}", hex::encode(&output.pubkey_hash))?;
        }
        Ok(())
    }
}

/// A block of transactions chained by hash and sealed with proof of work.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Unix timestamp at mining time.
    pub timestamp: i64,
    /// Transactions committed by this block. First is the coinbase.
    pub transactions: Vec<Transaction>,
    /// Hash of the previous block. Empty for genesis.
    pub prev_hash: Vec<u8>,
    /// Proof-of-work hash of this block.
    pub hash: Vec<u8>,
    /// Winning nonce.
    pub nonce: i64,
    /// Distance from genesis.
    pub height: u64,
}

impl Block {
    /// Mine a new block on top of `prev_hash` at `height`.
    ///
    /// Runs the nonce search with the default difficulty; `cancel` aborts it
    /// at a nonce boundary.
    pub fn mine(
        transactions: Vec<Transaction>,
        prev_hash: Vec<u8>,
        height: u64,
        cancel: &AtomicBool,
    ) -> Result<Block, EmberError> {
        let mut block = Block {
            timestamp: unix_now(),
            transactions,
            prev_hash,
            hash: Vec::new(),
            nonce: 0,
            height,
        };

        let (nonce, hash) = pow::ProofOfWork::new(&block).run(cancel)?;
        block.nonce = nonce;
        block.hash = hash.to_vec();
        Ok(block)
    }

    /// Mine the genesis block around a coinbase transaction.
    pub fn genesis(coinbase: Transaction, cancel: &AtomicBool) -> Result<Block, EmberError> {
        Self::mine(vec![coinbase], Vec::new(), 0, cancel)
    }

    /// Merkle root over the serialized transactions. Empty bytes when the
    /// block has no transactions.
    pub fn hash_transactions(&self) -> Result<Vec<u8>, TxError> {
        let mut leaves = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            leaves.push(tx.serialize()?);
        }
        Ok(merkle_root(&leaves).map(|root| root.to_vec()).unwrap_or_default())
    }

    /// Canonical byte encoding used for storage and the wire.
    pub fn serialize(&self) -> Result<Vec<u8>, TxError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TxError::Serialization(e.to_string()))
    }

    /// Decode a block from its canonical encoding.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TxError> {
        let (block, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| TxError::Serialization(e.to_string()))?;
        Ok(block)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
