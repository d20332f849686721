//! Hash slot calculation

use crc16::{State, XMODEM};

/// Total number of hash slots in Redis Cluster
pub const CLUSTER_SLOTS: u16 = 16384;

/// Calculate the hash slot for a given key
///
/// - If the key contains `{...}` with at least one byte between the first
///   `{` and the next `}`, only that part is hashed
/// - Otherwise, the entire key is hashed
/// - The hash is CRC16 (XMODEM) mod 16384
pub fn calculate_slot(key: &[u8]) -> u16 {
    State::<XMODEM>::calculate(extract_hash_tag(key)) % CLUSTER_SLOTS
}

/// The part of `key` that determines its slot.
///
/// `{user1000}.following` and `{user1000}.followers` share the tag
/// `user1000` and therefore a slot.
pub fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_vector() {
        assert_eq!(calculate_slot(b"123456789"), 12739);
        assert_eq!(calculate_slot(b""), 0);
    }

    #[test]
    fn test_known_slots() {
        assert_eq!(calculate_slot(b"foo"), 12182);
        assert_eq!(calculate_slot(b"bar"), 5061);
    }

    #[test]
    fn test_hash_tags() {
        assert_eq!(
            calculate_slot(b"{user1000}.following"),
            calculate_slot(b"{user1000}.followers")
        );
        assert_eq!(calculate_slot(b"{user1000}.following"), calculate_slot(b"user1000"));
    }

    #[test]
    fn test_tag_precedence() {
        assert_eq!(extract_hash_tag(b"foo{bar}{zap}"), b"bar");
        assert_eq!(extract_hash_tag(b"foo{{bar}}zap"), b"{bar");
        assert_eq!(extract_hash_tag(b"foo{}{bar}"), b"foo{}{bar}");
        assert_eq!(extract_hash_tag(b"foo{bar"), b"foo{bar");
        assert_eq!(extract_hash_tag(b"plain"), b"plain");
    }
}
