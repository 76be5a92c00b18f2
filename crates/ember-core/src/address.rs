//! Base58Check addressing.
//!
//! An address payload is 25 bytes: a version byte (`0x00`), the 20-byte
//! pubkey hash, and a 4-byte double-SHA-256 checksum. The payload is
//! Base58-encoded with the Bitcoin alphabet (no `0OIl+/`).

use crate::constants::{ADDRESS_CHECKSUM_LEN, ADDRESS_VERSION};
use crate::crypto::{checksum, hash_pubkey};
use crate::error::AddressError;

/// Length of a decoded address payload: version + pkhash + checksum.
const PAYLOAD_LEN: usize = 1 + 20 + ADDRESS_CHECKSUM_LEN;

/// Encode a 20-byte pubkey hash as a Base58Check address.
pub fn from_pubkey_hash(pubkey_hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(PAYLOAD_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pubkey_hash);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Derive the address of a raw `X || Y` public key.
pub fn from_pubkey(pubkey: &[u8]) -> String {
    from_pubkey_hash(&hash_pubkey(pubkey))
}

/// Decode an address into its raw 25-byte payload, verifying the checksum.
pub fn decode(addr: &str) -> Result<Vec<u8>, AddressError> {
    let payload = bs58::decode(addr)
        .into_vec()
        .map_err(|_| AddressError::InvalidCharacter)?;
    if payload.len() != PAYLOAD_LEN {
        return Err(AddressError::InvalidLength(payload.len()));
    }

    let (versioned, actual) = payload.split_at(payload.len() - ADDRESS_CHECKSUM_LEN);
    if checksum(versioned) != actual {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload)
}

/// Extract the 20-byte pubkey hash locked by an address.
pub fn pubkey_hash_of(addr: &str) -> Result<Vec<u8>, AddressError> {
    let payload = decode(addr)?;
    Ok(payload[1..payload.len() - ADDRESS_CHECKSUM_LEN].to_vec())
}

/// True iff the address decodes and its checksum matches.
pub fn validate(addr: &str) -> bool {
    decode(addr).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    /// The first Bitcoin address, the canonical Base58Check vector.
    const SATOSHI_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    const SATOSHI_PAYLOAD_HEX: &str = "0062e907b15cbf27d5425399ebf6f0fb50ebb88f18c29b7d93";

    #[test]
    fn decode_known_vector() {
        let payload = decode(SATOSHI_ADDR).unwrap();
        assert_eq!(hex::encode(payload), SATOSHI_PAYLOAD_HEX);
    }

    #[test]
    fn encode_known_vector() {
        let payload = hex::decode(SATOSHI_PAYLOAD_HEX).unwrap();
        let pkhash = &payload[1..21];
        assert_eq!(from_pubkey_hash(pkhash), SATOSHI_ADDR);
    }

    #[test]
    fn generated_addresses_validate() {
        for _ in 0..8 {
            let kp = KeyPair::generate();
            let addr = from_pubkey(&kp.public_key_bytes());
            assert!(validate(&addr), "address failed validation: {addr}");
        }
    }

    #[test]
    fn pubkey_hash_roundtrip() {
        let kp = KeyPair::generate();
        let pkhash = hash_pubkey(&kp.public_key_bytes());
        let addr = from_pubkey_hash(&pkhash);
        assert_eq!(pubkey_hash_of(&addr).unwrap(), pkhash);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let mut addr = from_pubkey(&KeyPair::generate().public_key_bytes());
        // Flip the final character to a different alphabet member.
        let last = addr.pop().unwrap();
        addr.push(if last == '2' { '3' } else { '2' });
        assert_eq!(decode(&addr).unwrap_err(), AddressError::InvalidChecksum);
    }

    #[test]
    fn invalid_character_rejected() {
        // '0' is not in the Base58 alphabet.
        assert_eq!(
            decode("0A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap_err(),
            AddressError::InvalidCharacter
        );
    }

    #[test]
    fn short_payload_rejected() {
        assert!(matches!(
            decode("1A1zP1").unwrap_err(),
            AddressError::InvalidLength(_)
        ));
    }

    #[test]
    fn leading_zero_version_keeps_leading_one() {
        let addr = from_pubkey(&KeyPair::generate().public_key_bytes());
        assert!(addr.starts_with('1'));
    }
}
