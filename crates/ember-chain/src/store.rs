//! RocksDB-backed persistence for the chain.
//!
//! One database per node with two column families: `blocks` maps block hash
//! to serialized block and holds the tip pointer under the key `l`;
//! `chainstate` maps txid to that transaction's surviving outputs. Every
//! mutation goes through an atomic [`WriteBatch`]; readers that must see a
//! stable view take a [`StoreSnapshot`].

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use ember_core::error::StoreError;

const CF_BLOCKS: &str = "blocks";
const CF_CHAINSTATE: &str = "chainstate";

/// Key of the tip pointer inside the `blocks` column family.
const TIP_KEY: &[u8] = b"l";

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Handle to one node's on-disk chain data.
pub struct ChainDb {
    db: DB,
}

impl ChainDb {
    /// Open or create the database at `path` with both column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_CHAINSTATE, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cfs).map_err(backend)?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    // --- blocks ---

    /// Hash of the current tip, or `None` for an empty store.
    pub fn tip_hash(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_BLOCKS)?;
        self.db.get_cf(cf, TIP_KEY).map_err(backend)
    }

    /// Serialized block bytes for `hash`.
    pub fn block_bytes(&self, hash: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_BLOCKS)?;
        self.db.get_cf(cf, hash).map_err(backend)
    }

    /// True when a block with `hash` is stored.
    pub fn has_block(&self, hash: &[u8]) -> Result<bool, StoreError> {
        Ok(self.block_bytes(hash)?.is_some())
    }

    /// Store a block, optionally advancing the tip pointer, in one batch.
    pub fn write_block(
        &self,
        hash: &[u8],
        bytes: &[u8],
        new_tip: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        let cf = self.cf(CF_BLOCKS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, hash, bytes);
        if let Some(tip) = new_tip {
            batch.put_cf(cf, TIP_KEY, tip);
        }
        self.db.write(batch).map_err(backend)
    }

    /// A read view pinned to the current state of the store.
    pub fn snapshot(&self) -> StoreSnapshot<'_> {
        StoreSnapshot {
            snap: self.db.snapshot(),
            db: self,
        }
    }

    // --- chainstate ---

    /// Serialized UTXO records for `txid`.
    pub fn utxo_bytes(&self, txid: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_CHAINSTATE)?;
        self.db.get_cf(cf, txid).map_err(backend)
    }

    /// All chainstate entries in key order.
    pub fn scan_chainstate(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let cf = self.cf(CF_CHAINSTATE)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(backend)?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    /// Number of chainstate entries (distinct txids with UTXOs).
    pub fn count_chainstate(&self) -> Result<usize, StoreError> {
        let cf = self.cf(CF_CHAINSTATE)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item.map_err(backend)?;
            count += 1;
        }
        Ok(count)
    }

    /// Apply deletions and insertions to the chainstate in one batch.
    pub fn apply_chainstate(
        &self,
        deletes: &[Vec<u8>],
        puts: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<(), StoreError> {
        let cf = self.cf(CF_CHAINSTATE)?;
        let mut batch = WriteBatch::default();
        for key in deletes {
            batch.delete_cf(cf, key);
        }
        for (key, value) in puts {
            batch.put_cf(cf, key, value);
        }
        self.db.write(batch).map_err(backend)
    }

    /// Replace the entire chainstate with `records`, atomically.
    ///
    /// Existing keys are deleted and the new records written in the same
    /// batch, so a reader never observes a half-built index.
    pub fn replace_chainstate(&self, records: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        let cf = self.cf(CF_CHAINSTATE)?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(backend)?;
            batch.delete_cf(cf, key);
        }
        for (key, value) in records {
            batch.put_cf(cf, key, value);
        }
        self.db.write(batch).map_err(backend)
    }
}

/// A point-in-time view over the `blocks` column family.
///
/// Backs the chain iterator so that concurrent writes cannot tear a walk
/// from tip to genesis.
pub struct StoreSnapshot<'a> {
    snap: rocksdb::Snapshot<'a>,
    db: &'a ChainDb,
}

impl StoreSnapshot<'_> {
    /// Tip hash as of the snapshot.
    pub fn tip_hash(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.db.cf(CF_BLOCKS)?;
        self.snap.get_cf(cf, TIP_KEY).map_err(backend)
    }

    /// Block bytes as of the snapshot.
    pub fn block_bytes(&self, hash: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.db.cf(CF_BLOCKS)?;
        self.snap.get_cf(cf, hash).map_err(backend)
    }
}
