//! Identifier minting and content addressing.
//!
//! Every opaque identifier in the protocol is lowercase RFC 4648 Base32
//! without padding: entity ids and tokens are 128 random bits (26 chars),
//! content ids are the SHA-256 of the blob (52 chars).

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Base32 alphabet (RFC 4648 without padding, lowercase).
const BASE32_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Length of a Base32-encoded 128-bit identifier.
pub const ENTITY_ID_LEN: usize = 26;

/// Encode bytes to base32 (RFC 4648 style, lowercase, no padding).
///
/// More compact than hex (1.6 bytes per char vs 2 bytes per char).
pub fn base32_encode(data: &[u8]) -> String {
    let mut result = String::new();
    let mut bits = 0u32;
    let mut bit_count = 0u8;

    for &byte in data {
        bits = (bits << 8) | (byte as u32);
        bit_count += 8;

        while bit_count >= 5 {
            bit_count -= 5;
            let index = ((bits >> bit_count) & 0x1F) as usize;
            result.push(BASE32_ALPHABET[index] as char);
        }
    }

    // Flush remaining bits
    if bit_count > 0 {
        let index = ((bits << (5 - bit_count)) & 0x1F) as usize;
        result.push(BASE32_ALPHABET[index] as char);
    }

    result
}

/// Mint a fresh 128-bit entity identifier (user/room/message id).
pub fn entity_id() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    base32_encode(&raw)
}

/// Mint an opaque access token or RTM ticket.
///
/// Same shape as entity ids; kept separate so call sites say what they mean.
pub fn token() -> String {
    entity_id()
}

/// Content id for a blob: Base32 of its SHA-256.
pub fn cid_for(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    base32_encode(&digest)
}

/// Hex SHA-256 of a blob, reported alongside the cid in upload metadata.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether `s` has the exact shape of an entity id.
///
/// Used to disambiguate room addressing: ids are 26 chars of the Base32
/// alphabet, room names are unrestricted.
pub fn looks_like_entity_id(s: &str) -> bool {
    s.len() == ENTITY_ID_LEN && s.bytes().all(|b| BASE32_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base32_known_vectors() {
        // RFC 4648 test vectors, lowercased and unpadded
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "my");
        assert_eq!(base32_encode(b"fo"), "mzxq");
        assert_eq!(base32_encode(b"foo"), "mzxw6");
        assert_eq!(base32_encode(b"foob"), "mzxw6yq");
        assert_eq!(base32_encode(b"fooba"), "mzxw6ytb");
        assert_eq!(base32_encode(b"foobar"), "mzxw6ytboi");
    }

    #[test]
    fn test_entity_id_shape() {
        let id = entity_id();
        assert_eq!(id.len(), ENTITY_ID_LEN);
        assert!(looks_like_entity_id(&id));
    }

    #[test]
    fn test_entity_ids_unique() {
        let a = entity_id();
        let b = entity_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_cid_deterministic() {
        let a = cid_for(b"hello");
        let b = cid_for(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 52);
        assert_ne!(a, cid_for(b"hello!"));
    }

    #[test]
    fn test_looks_like_entity_id_rejects_names() {
        assert!(!looks_like_entity_id("general"));
        assert!(!looks_like_entity_id("Lobby"));
        // right length, wrong alphabet (digits 0 and 1 are excluded)
        assert!(!looks_like_entity_id("abcdefghijklmnopqrstuvwx01"));
    }
}
