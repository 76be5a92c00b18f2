//! The blockchain façade: high-level operations over the block store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, info};

use ember_core::constants::GENESIS_COINBASE_DATA;
use ember_core::crypto::KeyPair;
use ember_core::error::{EmberError, StoreError, TxError};
use ember_core::sign;
use ember_core::types::{Block, Transaction};

use crate::store::{ChainDb, StoreSnapshot};

/// A chain of blocks backed by a [`ChainDb`].
///
/// All operations read the tip from the store, so clones of the surrounding
/// [`Arc`] observe each other's writes immediately.
pub struct Blockchain {
    db: Arc<ChainDb>,
}

impl Blockchain {
    /// Create a new chain at `path`, mining the genesis block whose coinbase
    /// credits `addr`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the store already holds
    /// a chain.
    pub fn create(path: impl AsRef<Path>, addr: &str) -> Result<Self, EmberError> {
        let db = ChainDb::open(path)?;
        if db.tip_hash()?.is_some() {
            return Err(StoreError::AlreadyExists.into());
        }

        let coinbase =
            Transaction::new_coinbase(addr, Some(GENESIS_COINBASE_DATA.as_bytes().to_vec()))?;
        let genesis = Block::genesis(coinbase, &AtomicBool::new(false))?;
        db.write_block(&genesis.hash, &genesis.serialize()?, Some(&genesis.hash))?;
        info!(hash = %hex::encode(&genesis.hash), "created blockchain");

        Ok(Self { db: Arc::new(db) })
    }

    /// Open the existing chain at `path`.
    ///
    /// Fails with [`StoreError::NotFound`] when the store is empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EmberError> {
        let db = ChainDb::open(path)?;
        if db.tip_hash()?.is_none() {
            return Err(StoreError::NotFound("blockchain".into()).into());
        }
        Ok(Self { db: Arc::new(db) })
    }

    /// The underlying store.
    pub fn db(&self) -> &ChainDb {
        &self.db
    }

    /// The block at the current tip.
    pub fn tip_block(&self) -> Result<Block, EmberError> {
        let tip = self
            .db
            .tip_hash()?
            .ok_or_else(|| StoreError::NotFound("tip".into()))?;
        self.get_block(&tip)
    }

    /// Height of the current tip.
    pub fn best_height(&self) -> Result<u64, EmberError> {
        Ok(self.tip_block()?.height)
    }

    /// Fetch a block by hash. [`StoreError::NotFound`] when absent.
    pub fn get_block(&self, hash: &[u8]) -> Result<Block, EmberError> {
        let bytes = self
            .db
            .block_bytes(hash)?
            .ok_or_else(|| StoreError::NotFound(format!("block {}", hex::encode(hash))))?;
        Ok(Block::deserialize(&bytes)?)
    }

    /// Hashes of every block, tip to genesis.
    pub fn block_hashes(&self) -> Result<Vec<Vec<u8>>, EmberError> {
        let mut hashes = Vec::new();
        for block in self.iter() {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Walk the chain from tip to genesis over a store snapshot.
    ///
    /// The iterator is not restartable; take a fresh one to walk again.
    pub fn iter(&self) -> BlockIter<'_> {
        let snapshot = self.db.snapshot();
        let current = snapshot.tip_hash().unwrap_or(None).unwrap_or_default();
        BlockIter { snapshot, current }
    }

    /// Store a block received from a peer. Idempotent: a known hash is a
    /// no-op. The tip advances only when the new block is higher; lower or
    /// equal forks are stored but not adopted.
    pub fn add_block(&self, block: &Block) -> Result<(), EmberError> {
        if self.db.has_block(&block.hash)? {
            debug!(hash = %hex::encode(&block.hash), "block already stored");
            return Ok(());
        }

        let tip_height = self.best_height()?;
        let new_tip = (block.height > tip_height).then_some(block.hash.as_slice());
        self.db
            .write_block(&block.hash, &block.serialize()?, new_tip)?;
        debug!(
            hash = %hex::encode(&block.hash),
            height = block.height,
            adopted = new_tip.is_some(),
            "stored block"
        );
        Ok(())
    }

    /// Verify `txs`, then mine and append a new block containing them.
    ///
    /// The tip is read first; the proof-of-work search runs without touching
    /// the store; the block and tip pointer are then written in one batch.
    pub fn mine_block(
        &self,
        txs: Vec<Transaction>,
        cancel: &AtomicBool,
    ) -> Result<Block, EmberError> {
        for tx in &txs {
            if !self.verify_tx(tx)? {
                return Err(TxError::VerificationFailed.into());
            }
        }

        let tip = self.tip_block()?;
        let block = Block::mine(txs, tip.hash, tip.height + 1, cancel)?;

        self.db
            .write_block(&block.hash, &block.serialize()?, Some(&block.hash))?;
        info!(hash = %hex::encode(&block.hash), height = block.height, "mined block");
        Ok(block)
    }

    /// Linear-scan the chain for a transaction by id.
    pub fn find_tx(&self, id: &[u8]) -> Result<Transaction, EmberError> {
        for block in self.iter() {
            for tx in block?.transactions {
                if tx.id == id {
                    return Ok(tx);
                }
            }
        }
        Err(TxError::NotFound(hex::encode(id)).into())
    }

    /// Sign every input of `tx` with `keypair`.
    pub fn sign_tx(&self, tx: &mut Transaction, keypair: &KeyPair) -> Result<(), EmberError> {
        let prev_txs = self.gather_prev_txs(tx)?;
        sign::sign_transaction(tx, &prev_txs, keypair)?;
        Ok(())
    }

    /// Verify `tx` against the chain. Coinbase transactions verify as true.
    pub fn verify_tx(&self, tx: &Transaction) -> Result<bool, EmberError> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.gather_prev_txs(tx)?;
        Ok(sign::verify_transaction(tx, &prev_txs)?)
    }

    /// Collect the previous transaction of every input, keyed by hex id.
    ///
    /// An input referencing an unknown transaction is a hard
    /// [`TxError::DanglingInput`] error.
    fn gather_prev_txs(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<String, Transaction>, EmberError> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            let prev = self
                .find_tx(&input.prev_txid)
                .map_err(|_| TxError::DanglingInput(hex::encode(&input.prev_txid)))?;
            prev_txs.insert(prev.hex_id(), prev);
        }
        Ok(prev_txs)
    }
}

/// Snapshot-backed iterator from tip to genesis.
pub struct BlockIter<'a> {
    snapshot: StoreSnapshot<'a>,
    current: Vec<u8>,
}

impl Iterator for BlockIter<'_> {
    type Item = Result<Block, EmberError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_empty() {
            return None;
        }
        let bytes = match self.snapshot.block_bytes(&self.current) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                let missing = hex::encode(&self.current);
                self.current = Vec::new();
                return Some(Err(StoreError::Corrupt(format!("missing block {missing}")).into()));
            }
            Err(e) => {
                self.current = Vec::new();
                return Some(Err(e.into()));
            }
        };
        match Block::deserialize(&bytes) {
            Ok(block) => {
                self.current = block.prev_hash.clone();
                Some(Ok(block))
            }
            Err(e) => {
                self.current = Vec::new();
                Some(Err(e.into()))
            }
        }
    }
}
