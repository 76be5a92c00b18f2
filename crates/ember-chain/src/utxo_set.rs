//! The UTXO set: a chainstate index derived from the chain, never
//! authoritative.
//!
//! Each entry maps a txid to the transaction's surviving outputs. Records
//! keep the original output index, so spending `vout` 1 of a two-output
//! transaction leaves `vout` 0 addressable under its original position.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ember_core::error::{EmberError, StoreError};
use ember_core::types::{Block, TxOut};

use crate::blockchain::Blockchain;

/// One unspent output together with its original position.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UtxoRecord {
    /// The output's index within its transaction.
    pub vout: i32,
    /// The unspent output.
    pub output: TxOut,
}

fn encode_records(records: &[UtxoRecord]) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(records, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_records(bytes: &[u8]) -> Result<Vec<UtxoRecord>, StoreError> {
    let (records, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(records)
}

/// The chainstate index over a shared [`Blockchain`].
pub struct UtxoSet {
    chain: Arc<Blockchain>,
}

impl UtxoSet {
    /// Index over `chain`.
    pub fn new(chain: Arc<Blockchain>) -> Self {
        Self { chain }
    }

    /// The chain this set indexes.
    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    /// Rebuild the index from scratch by walking the chain tip to genesis.
    ///
    /// The replacement is one atomic batch, so readers always observe a
    /// consistent snapshot. Transactions whose outputs are all spent get no
    /// entry.
    pub fn reindex(&self) -> Result<(), EmberError> {
        let mut spent: HashMap<String, Vec<i32>> = HashMap::new();
        let mut unspent: HashMap<String, Vec<UtxoRecord>> = HashMap::new();

        for block in self.chain.iter() {
            let block = block?;
            for tx in &block.transactions {
                let txid = tx.hex_id();

                for (idx, output) in tx.outputs.iter().enumerate() {
                    let vout = idx as i32;
                    if spent.get(&txid).is_some_and(|s| s.contains(&vout)) {
                        continue;
                    }
                    unspent
                        .entry(txid.clone())
                        .or_default()
                        .push(UtxoRecord { vout, output: output.clone() });
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent
                            .entry(hex::encode(&input.prev_txid))
                            .or_default()
                            .push(input.prev_vout);
                    }
                }
            }
        }

        let mut records = Vec::with_capacity(unspent.len());
        for (txid, outs) in unspent {
            let key = hex::decode(&txid).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            records.push((key, encode_records(&outs)?));
        }
        let count = records.len();
        self.chain.db().replace_chainstate(&records)?;
        info!(transactions = count, "reindexed UTXO set");
        Ok(())
    }

    /// Fold one block into the index: remove the outputs its inputs spend,
    /// dropping entries that become empty, then record every transaction's
    /// outputs under its id. Applied as one atomic batch.
    pub fn update(&self, block: &Block) -> Result<(), EmberError> {
        let db = self.chain.db();
        // Working copies of touched entries, so that several inputs spending
        // the same previous transaction compact one shared record list.
        let mut pending: HashMap<Vec<u8>, Vec<UtxoRecord>> = HashMap::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let key = input.prev_txid.clone();
                    let mut records = match pending.remove(&key) {
                        Some(records) => records,
                        None => match db.utxo_bytes(&key)? {
                            Some(bytes) => decode_records(&bytes)?,
                            None => Vec::new(),
                        },
                    };
                    records.retain(|r| r.vout != input.prev_vout);
                    pending.insert(key, records);
                }
            }

            let fresh: Vec<UtxoRecord> = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(idx, output)| UtxoRecord {
                    vout: idx as i32,
                    output: output.clone(),
                })
                .collect();
            pending.insert(tx.id.clone(), fresh);
        }

        let mut deletes = Vec::new();
        let mut puts = Vec::new();
        for (key, records) in pending {
            if records.is_empty() {
                deletes.push(key);
            } else {
                puts.push((key, encode_records(&records)?));
            }
        }
        db.apply_chainstate(&deletes, &puts)?;
        debug!(height = block.height, "updated UTXO set");
        Ok(())
    }

    /// Every unspent output locked with `pubkey_hash`.
    pub fn find_utxos(&self, pubkey_hash: &[u8]) -> Result<Vec<TxOut>, EmberError> {
        let mut outputs = Vec::new();
        for (_, bytes) in self.chain.db().scan_chainstate()? {
            for record in decode_records(&bytes)? {
                if record.output.locked_with(pubkey_hash) {
                    outputs.push(record.output);
                }
            }
        }
        Ok(outputs)
    }

    /// Greedily gather outputs of `pubkey_hash` until `amount` is covered.
    ///
    /// Returns the accumulated sum (which may fall short, signaling
    /// insufficient funds) and the chosen outputs as hex txid to vout list.
    /// The store's key order makes repeated calls deterministic.
    pub fn find_spendable(
        &self,
        pubkey_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<i32>>), EmberError> {
        let mut sum = 0u64;
        let mut chosen: HashMap<String, Vec<i32>> = HashMap::new();

        for (txid, bytes) in self.chain.db().scan_chainstate()? {
            for record in decode_records(&bytes)? {
                if sum >= amount {
                    break;
                }
                if record.output.locked_with(pubkey_hash) {
                    sum += record.output.value;
                    chosen
                        .entry(hex::encode(&txid))
                        .or_default()
                        .push(record.vout);
                }
            }
        }
        Ok((sum, chosen))
    }

    /// Number of distinct transactions with unspent outputs.
    pub fn count_txs(&self) -> Result<usize, EmberError> {
        Ok(self.chain.db().count_chainstate()?)
    }

    /// Sum of every output locked with `pubkey_hash`.
    pub fn balance(&self, pubkey_hash: &[u8]) -> Result<u64, EmberError> {
        Ok(self
            .find_utxos(pubkey_hash)?
            .iter()
            .map(|out| out.value)
            .sum())
    }
}
