//! Identifier hashing.
//!
//! User names, train codes, and station names are addressed everywhere by
//! a 64-bit hash so B+ tree keys keep a fixed width. The hash must be
//! stable across process restarts because it is persisted inside keys;
//! xxh3 is seedless and byte-stable.

use xxhash_rust::xxh3::xxh3_64;

/// 64-bit identifier hash of a user / train / station name.
pub type Id = u64;

/// Hashes an identifier's content bytes.
pub fn id_of(bytes: &[u8]) -> Id {
    xxh3_64(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(id_of(b"G1234"), id_of(b"G1234"));
    }

    #[test]
    fn test_discriminates() {
        assert_ne!(id_of(b"G1234"), id_of(b"G1235"));
        assert_ne!(id_of(b""), id_of(b"0"));
    }

    #[test]
    fn test_content_addressed() {
        // Equal content hashes equally regardless of the buffer it came
        // from; persisted keys depend on this.
        let owned = String::from("Shang") + "hai";
        assert_eq!(id_of(owned.as_bytes()), id_of(b"Shanghai"));
        assert_ne!(id_of(b"Shanghai"), id_of(b"shanghai"));
    }
}
