//! Bucketing hashes.
use sha2::{Digest, Sha256};

pub trait Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// The default (and only) sharder: the first 8 bytes of SHA-256, taken as a big-endian unsigned
/// 64-bit integer, modulo the shard count.
pub struct Sha256Sharder;

impl Sharder for Sha256Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        sha256_prefix_u64(input) % total_shards
    }
}

/// The first 8 bytes of SHA-256(input) as a big-endian u64.
pub fn sha256_prefix_u64(input: impl AsRef<[u8]>) -> u64 {
    let hash = Sha256::digest(input.as_ref());
    u64::from_be_bytes(hash[0..8].try_into().expect("sha256 digest is 32 bytes"))
}

/// DJB2 over the UTF-8 bytes of the input, folded to 32 bits and returned as its decimal string.
///
/// Used for SDK-key fingerprints (`hashed_sdk_key_used`) and name hashing.
pub fn djb2(input: &str) -> String {
    let mut hash: u32 = 0;
    for c in input.as_bytes() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(*c as u32);
    }
    hash.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_prefix_is_stable() {
        // Bucketing must never change between releases; pin a couple of inputs.
        let a = sha256_prefix_u64("salt.rule_salt.123");
        let b = sha256_prefix_u64("salt.rule_salt.123");
        assert_eq!(a, b);
        assert_ne!(a, sha256_prefix_u64("salt.rule_salt.124"));
    }

    #[test]
    fn shard_is_under_modulus() {
        for id in ["a", "b", "user-42", ""] {
            assert!(Sha256Sharder.get_shard(id, 10_000) < 10_000);
            assert!(Sha256Sharder.get_shard(id, 1_000) < 1_000);
        }
    }

    #[test]
    fn djb2_is_decimal_and_stable() {
        let h = djb2("secret-key");
        assert_eq!(h, djb2("secret-key"));
        assert!(h.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(djb2("a"), djb2("b"));
    }

    #[test]
    fn djb2_empty_input() {
        assert_eq!(djb2(""), "0");
    }
}
