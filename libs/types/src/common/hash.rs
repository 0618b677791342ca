//! Keccak-256 hashing and the 32-byte digest type
//!
//! The same digest width is used for actor ids and for the state root, so both
//! share [`Hash32`].

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// A 32-byte keccak digest
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

/// Root hash summarising the committed state of every actor
pub type StateRoot = Hash32;

impl Hash32 {
    /// The all-zero digest
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32(0x{})", self.to_hex())
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// Hash a sequence of byte slices as one contiguous input
pub fn keccak256<I, B>(parts: I) -> Hash32
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    Hash32(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_of_empty_input() {
        // Well-known keccak256("")
        let empty = keccak256(std::iter::empty::<&[u8]>());
        assert_eq!(
            empty.to_hex(),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_parts_are_concatenated() {
        assert_eq!(keccak256([b"ab".as_slice(), b"c"]), keccak256([b"abc"]));
    }
}
