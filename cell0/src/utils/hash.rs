//! Hash utilities used for intent fingerprinting and checkpoint checksums.

use sha2::{Digest, Sha256};

/// Simple FNV-1a 64-bit hash, used where a fast non-cryptographic hash is
/// enough (e.g. bucketing, cache keys).
pub fn fnv1a64(s: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for b in s.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// SHA-256 hex digest over the given parts, joined by `\u{1f}` (unit
/// separator) so that `hash("a", "bc")` differs from `hash("ab", "c")`.
pub fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Minimal hex encoding so we don't need an extra crate dependency.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a64_is_deterministic() {
        assert_eq!(fnv1a64("hello"), fnv1a64("hello"));
        assert_ne!(fnv1a64("hello"), fnv1a64("world"));
    }

    #[test]
    fn sha256_hex_distinguishes_part_boundaries() {
        let a = sha256_hex(&["a", "bc"]);
        let b = sha256_hex(&["ab", "c"]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn sha256_hex_is_deterministic() {
        let a = sha256_hex(&["sovereign-1", "finance", "summarize file X"]);
        let b = sha256_hex(&["sovereign-1", "finance", "summarize file X"]);
        assert_eq!(a, b);
    }
}
