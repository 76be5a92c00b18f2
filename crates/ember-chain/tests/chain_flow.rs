//! End-to-end flows over a real store: send with local mining, duplicate
//! block delivery, and full reindex equivalence.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ember_chain::{new_transfer, Blockchain, UtxoSet};
use ember_core::address;
use ember_core::constants::SUBSIDY;
use ember_core::crypto::{hash_pubkey, KeyPair};
use ember_core::pow::ProofOfWork;
use ember_core::types::Transaction;

struct Node {
    chain: Arc<Blockchain>,
    utxos: UtxoSet,
    _dir: tempfile::TempDir,
}

fn node_with_genesis_to(addr: &str) -> Node {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(Blockchain::create(dir.path().join("chaindata"), addr).unwrap());
    let utxos = UtxoSet::new(chain.clone());
    utxos.reindex().unwrap();
    Node { chain, utxos, _dir: dir }
}

fn balance(node: &Node, keypair: &KeyPair) -> u64 {
    node.utxos
        .balance(&hash_pubkey(&keypair.public_key_bytes()))
        .unwrap()
}

#[test]
fn send_with_local_mining() {
    let alice = KeyPair::generate();
    let bob = KeyPair::generate();
    let miner = KeyPair::generate();
    let alice_addr = address::from_pubkey(&alice.public_key_bytes());
    let bob_addr = address::from_pubkey(&bob.public_key_bytes());
    let miner_addr = address::from_pubkey(&miner.public_key_bytes());

    let node = node_with_genesis_to(&alice_addr);
    assert_eq!(balance(&node, &alice), SUBSIDY);

    // Alice sends 4 to Bob; the block is mined locally with a coinbase first.
    let transfer = new_transfer(&alice, &bob_addr, 4, &node.utxos).unwrap();
    let coinbase = Transaction::new_coinbase(&miner_addr, None).unwrap();
    let block = node
        .chain
        .mine_block(vec![coinbase, transfer], &AtomicBool::new(false))
        .unwrap();
    node.utxos.update(&block).unwrap();

    assert_eq!(node.chain.best_height().unwrap(), 1);
    assert_eq!(balance(&node, &alice), 6);
    assert_eq!(balance(&node, &bob), 4);
    assert_eq!(balance(&node, &miner), SUBSIDY);
    assert!(ProofOfWork::new(&block).validate().unwrap());
}

#[test]
fn duplicate_add_block_changes_nothing() {
    let owner = KeyPair::generate();
    let owner_addr = address::from_pubkey(&owner.public_key_bytes());
    let node = node_with_genesis_to(&owner_addr);

    let coinbase = Transaction::new_coinbase(&owner_addr, None).unwrap();
    let block = node
        .chain
        .mine_block(vec![coinbase], &AtomicBool::new(false))
        .unwrap();
    node.utxos.reindex().unwrap();

    let height_before = node.chain.best_height().unwrap();
    let hashes_before = node.chain.block_hashes().unwrap();
    let state_before = node.chain.db().scan_chainstate().unwrap();

    // Deliver the same block again, as a duplicated network event would.
    node.chain.add_block(&block).unwrap();
    node.utxos.reindex().unwrap();

    assert_eq!(node.chain.best_height().unwrap(), height_before);
    assert_eq!(node.chain.block_hashes().unwrap(), hashes_before);
    assert_eq!(node.chain.db().scan_chainstate().unwrap(), state_before);
}

#[test]
fn incremental_updates_equal_full_reindex_over_many_blocks() {
    let owner = KeyPair::generate();
    let owner_addr = address::from_pubkey(&owner.public_key_bytes());
    let node = node_with_genesis_to(&owner_addr);

    let mut others = Vec::new();
    for _ in 0..3 {
        let recipient = KeyPair::generate();
        let recipient_addr = address::from_pubkey(&recipient.public_key_bytes());
        let transfer = new_transfer(&owner, &recipient_addr, 2, &node.utxos).unwrap();
        let coinbase = Transaction::new_coinbase(&owner_addr, None).unwrap();
        let block = node
            .chain
            .mine_block(vec![coinbase, transfer], &AtomicBool::new(false))
            .unwrap();
        node.utxos.update(&block).unwrap();
        others.push(recipient);
    }

    let incremental = node.chain.db().scan_chainstate().unwrap();
    node.utxos.reindex().unwrap();
    assert_eq!(node.chain.db().scan_chainstate().unwrap(), incremental);

    for recipient in &others {
        assert_eq!(balance(&node, recipient), 2);
    }
    // Genesis 10, minus 3 * 2 sent, plus 3 mined subsidies.
    assert_eq!(balance(&node, &owner), SUBSIDY - 6 + 3 * SUBSIDY);
}
