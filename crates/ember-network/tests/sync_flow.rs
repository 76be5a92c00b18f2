//! Two live nodes on loopback: a fresh node catches up to the central
//! node's chain through the version/getblocks/inv/getdata exchange.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use ember_chain::Blockchain;
use ember_core::address;
use ember_core::crypto::KeyPair;
use ember_core::types::Transaction;
use ember_network::{run, Node};

/// Clone a store directory so two nodes share the same genesis block.
fn copy_dir(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fresh_node_syncs_blocks_and_utxos_from_central() {
    let base = tempfile::tempdir().unwrap();
    let owner = KeyPair::generate();
    let owner_addr = address::from_pubkey(&owner.public_key_bytes());

    // Seed a genesis-only store, then clone it for both nodes.
    let seed_dir = base.path().join("seed");
    drop(Blockchain::create(&seed_dir, &owner_addr).unwrap());
    let x_dir = base.path().join("x");
    let y_dir = base.path().join("y");
    copy_dir(&seed_dir, &x_dir);
    copy_dir(&seed_dir, &y_dir);

    // X (the central node) mines ahead to height 3.
    let x_chain = Arc::new(Blockchain::open(&x_dir).unwrap());
    for _ in 0..3 {
        let coinbase = Transaction::new_coinbase(&owner_addr, None).unwrap();
        x_chain
            .mine_block(vec![coinbase], &AtomicBool::new(false))
            .unwrap();
    }
    assert_eq!(x_chain.best_height().unwrap(), 3);

    let x_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let x_addr = x_listener.local_addr().unwrap().to_string();
    let y_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let y_addr = y_listener.local_addr().unwrap().to_string();

    let x_node = Node::new(x_addr.clone(), None, x_chain.clone(), x_addr.clone());
    x_node.utxos().reindex().unwrap();
    let expected_chainstate = x_chain.db().scan_chainstate().unwrap();

    let y_chain = Arc::new(Blockchain::open(&y_dir).unwrap());
    assert_eq!(y_chain.best_height().unwrap(), 0);
    let y_node = Node::new(y_addr.clone(), None, y_chain.clone(), x_addr.clone());

    tokio::spawn(run(x_node.clone(), x_listener));
    // Y's startup handshake sends `version` to X, which kicks off the sync.
    tokio::spawn(run(y_node.clone(), y_listener));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let height = y_chain.best_height().unwrap();
        let chainstate = y_chain.db().scan_chainstate().unwrap();
        if height == 3 && chainstate == expected_chainstate {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "sync timed out at height {height}"
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // Both nodes agree on the chain and the derived index.
    assert_eq!(
        y_chain.block_hashes().unwrap(),
        x_chain.block_hashes().unwrap()
    );
    // The handshake registered each node with the other.
    assert!(x_node.peers().contains(&y_addr));
    assert!(y_node.peers().contains(&x_addr));
}
