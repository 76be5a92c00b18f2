//! Wallets: a P-256 keypair per address, persisted per node id.
//!
//! The wallet file `wallet_<node_id>.dat` is a self-describing JSON dump of
//! the collection keyed by address, with hex-encoded key material. It is not
//! encrypted; it namespaces keys per node the same way the block store is
//! namespaced.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use ember_core::address;
use ember_core::crypto::KeyPair;
use ember_core::error::CryptoError;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("wallet file: {0}")] Malformed(String),
    #[error("no wallet for address {0}")] UnknownAddress(String),
    #[error(transparent)] Key(#[from] CryptoError),
}

/// A single keypair and its cached public key bytes.
#[derive(Debug)]
pub struct Wallet {
    keypair: KeyPair,
    public_key: Vec<u8>,
}

impl Wallet {
    /// Generate a fresh wallet.
    pub fn new() -> Self {
        let keypair = KeyPair::generate();
        let public_key = keypair.public_key_bytes();
        Self { keypair, public_key }
    }

    /// Restore a wallet from its secret scalar.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, WalletError> {
        let keypair = KeyPair::from_secret_bytes(secret)?;
        let public_key = keypair.public_key_bytes();
        Ok(Self { keypair, public_key })
    }

    /// The signing keypair.
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// The raw `X || Y` public key bytes.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The wallet's Base58Check address, derived deterministically.
    pub fn address(&self) -> String {
        address::from_pubkey(&self.public_key)
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized form of one wallet inside the file dump.
#[derive(Serialize, Deserialize)]
struct WalletRecord {
    secret_key: String,
    public_key: String,
}

/// On-disk shape of the whole collection.
#[derive(Serialize, Deserialize)]
struct WalletsFile {
    wallets: HashMap<String, WalletRecord>,
}

/// The address-keyed wallet collection of one node.
#[derive(Debug)]
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
}

impl Wallets {
    /// Path of the wallet file for a node id, in the working directory.
    pub fn file_for_node(node_id: &str) -> PathBuf {
        PathBuf::from(format!("wallet_{node_id}.dat"))
    }

    /// Load the collection from `path`. A missing file yields an empty
    /// collection: the file only appears once the first wallet is created.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        if !path.exists() {
            return Ok(Self { wallets: HashMap::new() });
        }

        let content = std::fs::read(path)?;
        let file: WalletsFile = serde_json::from_slice(&content)
            .map_err(|e| WalletError::Malformed(e.to_string()))?;

        let mut wallets = HashMap::with_capacity(file.wallets.len());
        for (addr, record) in file.wallets {
            let secret = hex::decode(&record.secret_key)
                .map_err(|e| WalletError::Malformed(e.to_string()))?;
            wallets.insert(addr, Wallet::from_secret_bytes(&secret)?);
        }
        Ok(Self { wallets })
    }

    /// Write the collection to `path`.
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let records: HashMap<String, WalletRecord> = self
            .wallets
            .iter()
            .map(|(addr, wallet)| {
                (
                    addr.clone(),
                    WalletRecord {
                        secret_key: hex::encode(wallet.keypair.secret_bytes()),
                        public_key: hex::encode(&wallet.public_key),
                    },
                )
            })
            .collect();

        let json = serde_json::to_vec_pretty(&WalletsFile { wallets: records })
            .map_err(|e| WalletError::Malformed(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Generate a new wallet, add it, and return its address.
    pub fn create_wallet(&mut self) -> String {
        let wallet = Wallet::new();
        let addr = wallet.address();
        info!(address = %addr, "created wallet");
        self.wallets.insert(addr.clone(), wallet);
        addr
    }

    /// Look up the wallet for an address.
    pub fn get(&self, addr: &str) -> Result<&Wallet, WalletError> {
        self.wallets
            .get(addr)
            .ok_or_else(|| WalletError::UnknownAddress(addr.to_string()))
    }

    /// All addresses in the collection, sorted for stable listing.
    pub fn addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.wallets.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Number of wallets held.
    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    /// True when the collection holds no wallets.
    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_address_validates() {
        let wallet = Wallet::new();
        assert!(address::validate(&wallet.address()));
    }

    #[test]
    fn wallet_address_is_deterministic() {
        let wallet = Wallet::new();
        let restored = Wallet::from_secret_bytes(&wallet.keypair().secret_bytes()).unwrap();
        assert_eq!(wallet.address(), restored.address());
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let wallets = Wallets::load(&dir.path().join("wallet_x.dat")).unwrap();
        assert!(wallets.is_empty());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_3000.dat");

        let mut wallets = Wallets::load(&path).unwrap();
        let a = wallets.create_wallet();
        let b = wallets.create_wallet();
        wallets.save(&path).unwrap();

        let loaded = Wallets::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(loaded.addresses(), expected);
        assert_eq!(loaded.get(&a).unwrap().address(), a);
    }

    #[test]
    fn loaded_wallet_keeps_key_material() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_k.dat");

        let mut wallets = Wallets::load(&path).unwrap();
        let addr = wallets.create_wallet();
        let original_pubkey = wallets.get(&addr).unwrap().public_key().to_vec();
        wallets.save(&path).unwrap();

        let loaded = Wallets::load(&path).unwrap();
        assert_eq!(loaded.get(&addr).unwrap().public_key(), original_pubkey);
    }

    #[test]
    fn unknown_address_errors() {
        let dir = tempfile::tempdir().unwrap();
        let wallets = Wallets::load(&dir.path().join("wallet_u.dat")).unwrap();
        assert!(matches!(
            wallets.get("1BoatSLRHtKNngkdXEeobR76b53LETtpyT").unwrap_err(),
            WalletError::UnknownAddress(_)
        ));
    }

    #[test]
    fn corrupted_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_bad.dat");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            Wallets::load(&path).unwrap_err(),
            WalletError::Malformed(_)
        ));
    }

    #[test]
    fn file_name_is_namespaced_by_node() {
        assert_eq!(
            Wallets::file_for_node("3000"),
            PathBuf::from("wallet_3000.dat")
        );
    }
}
