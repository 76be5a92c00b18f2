//! The peer book: the guarded, ordered set of known peer addresses.
//!
//! The relay ("central") node is explicit configuration rather than a
//! position in the list. The book seeds itself with that address; the
//! handshake adds newcomers and failed sends evict them.

use parking_lot::Mutex;

/// Known peers of one node.
pub struct PeerBook {
    central: String,
    peers: Mutex<Vec<String>>,
}

impl PeerBook {
    /// Create a book seeded with the central node's address.
    pub fn new(central: impl Into<String>) -> Self {
        let central = central.into();
        let peers = Mutex::new(vec![central.clone()]);
        Self { central, peers }
    }

    /// The configured relay address.
    pub fn central(&self) -> &str {
        &self.central
    }

    /// True when `addr` is the configured relay.
    pub fn is_central(&self, addr: &str) -> bool {
        self.central == addr
    }

    /// True when `addr` is already known.
    pub fn contains(&self, addr: &str) -> bool {
        self.peers.lock().iter().any(|a| a == addr)
    }

    /// Add `addr` if unknown. Returns whether it was added.
    pub fn add(&self, addr: &str) -> bool {
        let mut peers = self.peers.lock();
        if peers.iter().any(|a| a == addr) {
            return false;
        }
        peers.push(addr.to_string());
        true
    }

    /// Add every unknown address from `addrs`, preserving arrival order.
    pub fn extend(&self, addrs: &[String]) {
        let mut peers = self.peers.lock();
        for addr in addrs {
            if !peers.iter().any(|a| a == addr) {
                peers.push(addr.clone());
            }
        }
    }

    /// Drop `addr` from the book.
    pub fn remove(&self, addr: &str) {
        self.peers.lock().retain(|a| a != addr);
    }

    /// Snapshot of all known addresses, in insertion order.
    pub fn all(&self) -> Vec<String> {
        self.peers.lock().clone()
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// True when no peers are known.
    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}
