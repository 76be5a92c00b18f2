//! The node context: every piece of shared state the handlers touch, plus
//! the outbound send helpers.
//!
//! Nothing here is ambient; handlers receive an `Arc<Node>` explicitly. The
//! guarded fields (mempool, blocks-in-transit, peer book) are locked only
//! for short synchronous sections, never across awaits.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use ember_chain::{Blockchain, UtxoSet};
use ember_core::constants::NODE_VERSION;
use ember_core::error::{EmberError, NetError, TxError};
use ember_core::types::{Block, Transaction};

use crate::peers::PeerBook;
use crate::protocol::{
    BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message, TxPayload,
    VersionPayload,
};

/// One running node's shared state.
pub struct Node {
    addr: String,
    miner: Option<String>,
    chain: Arc<Blockchain>,
    utxos: UtxoSet,
    peers: PeerBook,
    /// Unconfirmed transactions keyed by hex txid.
    mempool: Mutex<HashMap<String, Transaction>>,
    /// Block hashes pending download during sync.
    in_transit: Mutex<VecDeque<Vec<u8>>>,
    /// Set on shutdown; the miner checks it at nonce boundaries.
    shutdown: Arc<AtomicBool>,
}

impl Node {
    /// Assemble a node context.
    ///
    /// `central` names the relay node; a node whose own `addr` equals it
    /// takes the relay role.
    pub fn new(
        addr: impl Into<String>,
        miner: Option<String>,
        chain: Arc<Blockchain>,
        central: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.into(),
            miner,
            utxos: UtxoSet::new(chain.clone()),
            chain,
            peers: PeerBook::new(central),
            mempool: Mutex::new(HashMap::new()),
            in_transit: Mutex::new(VecDeque::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// This node's listen address, also its identity in messages.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The coinbase address of the mining loop, when mining is enabled.
    pub fn miner(&self) -> Option<&str> {
        self.miner.as_deref()
    }

    /// True when this node is the configured relay.
    pub fn is_central(&self) -> bool {
        self.peers.is_central(&self.addr)
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    pub fn peers(&self) -> &PeerBook {
        &self.peers
    }

    /// The shutdown flag shared with the miner.
    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown
    }

    // --- mempool ---

    /// Insert a transaction keyed by its hex id.
    pub fn mempool_insert(&self, tx: Transaction) {
        self.mempool.lock().insert(tx.hex_id(), tx);
    }

    /// True when the pool holds `hex_id`.
    pub fn mempool_contains(&self, hex_id: &str) -> bool {
        self.mempool.lock().contains_key(hex_id)
    }

    /// Fetch a pool transaction by hex id.
    pub fn mempool_get(&self, hex_id: &str) -> Option<Transaction> {
        self.mempool.lock().get(hex_id).cloned()
    }

    /// Drop a pool transaction by hex id.
    pub fn mempool_remove(&self, hex_id: &str) {
        self.mempool.lock().remove(hex_id);
    }

    /// Number of pooled transactions.
    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    /// Clone of every pooled transaction.
    pub fn mempool_snapshot(&self) -> Vec<Transaction> {
        self.mempool.lock().values().cloned().collect()
    }

    // --- blocks in transit ---

    /// Replace the download queue.
    pub fn set_in_transit(&self, items: Vec<Vec<u8>>) {
        *self.in_transit.lock() = VecDeque::from(items);
    }

    /// Pop the next block hash to fetch.
    pub fn pop_in_transit(&self) -> Option<Vec<u8>> {
        self.in_transit.lock().pop_front()
    }

    // --- outbound sends (best-effort) ---

    /// Send a message to `addr`; one connection per message, closed after
    /// writing. A failed connection evicts the peer from the book.
    pub async fn send(&self, addr: &str, msg: &Message) {
        let encoded = match msg.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(command = msg.command(), error = %e, "dropping unencodable message");
                return;
            }
        };

        let mut stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(peer = addr, error = %e, "connection failed, removing peer");
                self.peers.remove(addr);
                return;
            }
        };

        if let Err(e) = stream.write_all(&encoded).await {
            warn!(peer = addr, error = %e, "send failed");
            return;
        }
        if let Err(e) = stream.shutdown().await {
            debug!(peer = addr, error = %e, "shutdown after send failed");
        }
    }

    /// Advertise our chain height to `addr`.
    pub async fn send_version(&self, addr: &str) {
        let best_height = match self.chain.best_height() {
            Ok(height) => height,
            Err(e) => {
                warn!(error = %e, "cannot read best height for version message");
                return;
            }
        };
        self.send(
            addr,
            &Message::Version(VersionPayload {
                from: self.addr.clone(),
                version: NODE_VERSION,
                best_height,
            }),
        )
        .await;
    }

    /// Ask `addr` for its full block hash list.
    pub async fn send_getblocks(&self, addr: &str) {
        self.send(
            addr,
            &Message::GetBlocks(GetBlocksPayload { from: self.addr.clone() }),
        )
        .await;
    }

    /// Ask `addr` for one block or transaction.
    pub async fn send_getdata(&self, addr: &str, kind: InvKind, id: Vec<u8>) {
        self.send(
            addr,
            &Message::GetData(GetDataPayload { from: self.addr.clone(), kind, id }),
        )
        .await;
    }

    /// Advertise items to `addr`.
    pub async fn send_inv(&self, addr: &str, kind: InvKind, items: Vec<Vec<u8>>) {
        self.send(
            addr,
            &Message::Inv(InvPayload { from: self.addr.clone(), kind, items }),
        )
        .await;
    }

    /// Deliver a block to `addr`.
    pub async fn send_block(&self, addr: &str, block: &Block) {
        let bytes = match block.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "cannot serialize block for delivery");
                return;
            }
        };
        self.send(
            addr,
            &Message::Block(BlockPayload { from: self.addr.clone(), block: bytes }),
        )
        .await;
    }

    /// Deliver a transaction to `addr`.
    pub async fn send_tx(&self, addr: &str, tx: &Transaction) {
        let bytes = match tx.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "cannot serialize transaction for delivery");
                return;
            }
        };
        self.send(
            addr,
            &Message::Tx(TxPayload { from: self.addr.clone(), tx: bytes }),
        )
        .await;
    }

    /// Advertise items to every known peer except ourselves and `exclude`.
    pub async fn broadcast_inv(&self, kind: InvKind, items: Vec<Vec<u8>>, exclude: &[&str]) {
        for peer in self.peers.all() {
            if peer == self.addr || exclude.contains(&peer.as_str()) {
                continue;
            }
            self.send_inv(&peer, kind, items.clone()).await;
        }
    }
}

/// One-shot client: hand a freshly built transaction to a node.
///
/// Used by the CLI `send` path when local mining is off; unlike the gossip
/// sends this surfaces failure, since the caller must know the handoff
/// happened.
pub async fn submit_tx(addr: &str, from: &str, tx: &Transaction) -> Result<(), EmberError> {
    let msg = Message::Tx(TxPayload {
        from: from.to_string(),
        tx: tx.serialize()?,
    });
    let encoded = msg.encode().map_err(EmberError::from)?;

    let mut stream = TcpStream::connect(addr).await.map_err(NetError::Io)?;
    stream.write_all(&encoded).await.map_err(NetError::Io)?;
    stream.shutdown().await.map_err(NetError::Io)?;
    Ok(())
}

/// Collect and verify mempool transactions for a block template.
///
/// Transactions that fail verification (including dangling inputs) are
/// skipped, not fatal: stale pool entries must never wedge the miner.
pub fn verified_mempool_txs(node: &Node) -> Vec<Transaction> {
    let mut txs = Vec::new();
    for tx in node.mempool_snapshot() {
        match node.chain().verify_tx(&tx) {
            Ok(true) => txs.push(tx),
            Ok(false) => {
                warn!(txid = %tx.hex_id(), "mempool transaction failed verification");
            }
            Err(EmberError::Tx(TxError::DanglingInput(prev))) => {
                warn!(txid = %tx.hex_id(), prev = %prev, "mempool transaction dangles");
            }
            Err(e) => {
                warn!(txid = %tx.hex_id(), error = %e, "mempool verification error");
            }
        }
    }
    txs
}
