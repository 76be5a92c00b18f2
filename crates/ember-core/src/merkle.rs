//! SHA-256 Merkle tree over opaque byte strings.
//!
//! Leaves hash the raw item bytes; internal nodes hash the concatenation of
//! their children. A layer with an odd number of nodes duplicates the hash
//! of its last node before pairing. An empty input has no root.

use crate::crypto::sha256;

/// Compute the Merkle root of `items`, or `None` for an empty slice.
///
/// A single-item tree's root is the SHA-256 of that item.
pub fn merkle_root(items: &[Vec<u8>]) -> Option<[u8; 32]> {
    if items.is_empty() {
        return None;
    }

    let mut layer: Vec<[u8; 32]> = items.iter().map(|item| sha256(item)).collect();
    while layer.len() > 1 {
        layer = next_layer(&layer);
    }
    Some(layer[0])
}

/// Pair up a layer, duplicating the last hash when the count is odd.
fn next_layer(layer: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        let mut joined = Vec::with_capacity(64);
        joined.extend_from_slice(left);
        joined.extend_from_slice(right);
        next.push(sha256(&joined));
        i += 2;
    }
    next
}
