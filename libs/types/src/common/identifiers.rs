//! # Content-Addressed Actor Identifiers
//!
//! An [`ActorId`] is an opaque 32-byte value. Two ids are reserved:
//!
//! - [`ActorId::ROOT`]: the distinguished root actor
//! - [`ActorId::EXTERNAL`]: the external driver submitting messages from outside
//!   the system; it never owns a mailbox
//!
//! Every other id is minted by [`ActorId::derive`] from the parent's id and the
//! parent's nonce at spawn time:
//!
//! ```text
//! id = keccak256(nonce as u64 little-endian || parent bytes)
//! ```
//!
//! Ids are immutable once minted. Ordering is plain byte-wise comparison, which is
//! the tie-breaker for messages stamped with the same tick.

use super::errors::IdError;
use super::hash::keccak256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of every actor identifier in bytes
pub const ID_LEN: usize = 32;

/// Opaque, fixed-size actor address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId([u8; ID_LEN]);

impl ActorId {
    /// The distinguished root actor
    pub const ROOT: ActorId = ActorId([0u8; ID_LEN]);

    /// Address of the external driver
    pub const EXTERNAL: ActorId = ActorId([0xff; ID_LEN]);

    /// Wrap raw bytes as an id
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the id of the child minted by `parent` with `nonce`
    pub fn derive(parent: &ActorId, nonce: u64) -> Self {
        // nonce (u64 little-endian) followed by the parent bytes
        Self(keccak256([nonce.to_le_bytes().as_slice(), parent.0.as_slice()]).0)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    pub fn is_external(&self) -> bool {
        *self == Self::EXTERNAL
    }

    /// Full lowercase hex encoding without prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from hex, with or without a `0x` prefix
    pub fn from_hex(input: &str) -> Result<Self, IdError> {
        let trimmed = input.strip_prefix("0x").unwrap_or(input);
        let bytes = hex::decode(trimmed).map_err(|e| IdError::InvalidHex {
            reason: e.to_string(),
        })?;
        let array: [u8; ID_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdError::InvalidLength {
                expected: ID_LEN,
                got: bytes.len(),
            })?;
        Ok(Self(array))
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.short())
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId(0x{})", self.to_hex())
    }
}

impl FromStr for ActorId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for ActorId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
