//! Building signed transfer transactions from spendable outputs.

use ember_core::crypto::{hash_pubkey, KeyPair};
use ember_core::error::{EmberError, StoreError, TxError};
use ember_core::types::{Transaction, TxIn, TxOut};

use crate::utxo_set::UtxoSet;

/// Build and sign a transaction moving `amount` coins to `to`.
///
/// Gathers the sender's spendable outputs greedily; when they fall short the
/// result is [`TxError::InsufficientFunds`]. A change output back to the
/// sender is added when the gathered sum exceeds the amount, since outputs
/// are indivisible.
pub fn new_transfer(
    keypair: &KeyPair,
    to: &str,
    amount: u64,
    utxos: &UtxoSet,
) -> Result<Transaction, EmberError> {
    let pubkey = keypair.public_key_bytes();
    let pubkey_hash = hash_pubkey(&pubkey);

    let (sum, spendable) = utxos.find_spendable(&pubkey_hash, amount)?;
    if sum < amount {
        return Err(TxError::InsufficientFunds { have: sum, need: amount }.into());
    }

    // Stable input order regardless of map iteration.
    let mut txids: Vec<&String> = spendable.keys().collect();
    txids.sort();

    let mut inputs = Vec::new();
    for txid in txids {
        let prev_txid =
            hex::decode(txid).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        for &vout in &spendable[txid] {
            inputs.push(TxIn {
                prev_txid: prev_txid.clone(),
                prev_vout: vout,
                signature: Vec::new(),
                pubkey: pubkey.clone(),
            });
        }
    }

    let mut outputs = vec![TxOut::pay_to_address(amount, to).map_err(TxError::from)?];
    if sum > amount {
        outputs.push(TxOut {
            value: sum - amount,
            pubkey_hash: pubkey_hash.clone(),
        });
    }

    let mut tx = Transaction { id: Vec::new(), inputs, outputs };
    tx.id = tx.hash()?;
    utxos.chain().sign_tx(&mut tx, keypair)?;
    Ok(tx)
}
