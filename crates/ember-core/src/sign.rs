//! Trimmed-copy transaction signing and verification.
//!
//! Every input is signed over a copy of the transaction whose signatures and
//! pubkeys are cleared, with the current input's `pubkey` field temporarily
//! set to the pubkey hash that locks the output it spends. The signing
//! payload is the lowercase hex of that copy's serialization followed by a
//! newline; this stringly payload is kept for wire compatibility with
//! existing deployments.

use std::collections::HashMap;

use crate::crypto::{verify_signature, KeyPair};
use crate::error::TxError;
use crate::types::Transaction;

/// Byte payload an input signature covers.
fn signing_payload(trimmed: &Transaction) -> Result<Vec<u8>, TxError> {
    let mut payload = hex::encode(trimmed.serialize()?);
    payload.push('\n');
    Ok(payload.into_bytes())
}

/// Require that every input's previous transaction is present in `prev_txs`.
fn check_prev_txs(
    tx: &Transaction,
    prev_txs: &HashMap<String, Transaction>,
) -> Result<(), TxError> {
    for input in &tx.inputs {
        let key = hex::encode(&input.prev_txid);
        match prev_txs.get(&key) {
            Some(prev) if !prev.id.is_empty() => {}
            _ => return Err(TxError::DanglingInput(key)),
        }
    }
    Ok(())
}

/// Sign every input of `tx` with `keypair`.
///
/// `prev_txs` maps hex txid to the referenced transaction; a missing entry
/// is a [`TxError::DanglingInput`]. Coinbase transactions are left untouched.
pub fn sign_transaction(
    tx: &mut Transaction,
    prev_txs: &HashMap<String, Transaction>,
    keypair: &KeyPair,
) -> Result<(), TxError> {
    if tx.is_coinbase() {
        return Ok(());
    }
    check_prev_txs(tx, prev_txs)?;

    let mut trimmed = tx.trimmed_copy();
    for i in 0..trimmed.inputs.len() {
        let key = hex::encode(&trimmed.inputs[i].prev_txid);
        let prev = &prev_txs[&key];
        let vout = trimmed.inputs[i].prev_vout;
        let spent = prev
            .outputs
            .get(usize::try_from(vout).unwrap_or(usize::MAX))
            .ok_or_else(|| TxError::DanglingInput(key))?;

        trimmed.inputs[i].signature = Vec::new();
        trimmed.inputs[i].pubkey = spent.pubkey_hash.clone();
        let payload = signing_payload(&trimmed)?;
        tx.inputs[i].signature = keypair.sign(&payload);
        trimmed.inputs[i].pubkey = Vec::new();
    }
    Ok(())
}

/// Verify every input signature of `tx`.
///
/// Coinbase transactions verify trivially. A missing previous transaction is
/// a [`TxError::DanglingInput`]; an invalid signature yields `Ok(false)`.
pub fn verify_transaction(
    tx: &Transaction,
    prev_txs: &HashMap<String, Transaction>,
) -> Result<bool, TxError> {
    if tx.is_coinbase() {
        return Ok(true);
    }
    check_prev_txs(tx, prev_txs)?;

    let mut trimmed = tx.trimmed_copy();
    for (i, input) in tx.inputs.iter().enumerate() {
        let key = hex::encode(&input.prev_txid);
        let prev = &prev_txs[&key];
        let spent = prev
            .outputs
            .get(usize::try_from(input.prev_vout).unwrap_or(usize::MAX))
            .ok_or_else(|| TxError::DanglingInput(key))?;

        trimmed.inputs[i].signature = Vec::new();
        trimmed.inputs[i].pubkey = spent.pubkey_hash.clone();
        let payload = signing_payload(&trimmed)?;
        if !verify_signature(&input.pubkey, &payload, &input.signature) {
            return Ok(false);
        }
        trimmed.inputs[i].pubkey = Vec::new();
    }
    Ok(true)
}
