//! # Hypervisor Types
//!
//! Identifier and hashing primitives shared by every hypervisor crate.
//!
//! ## Design Philosophy
//!
//! - **Content addressing**: every actor id except the two reserved ones is
//!   `keccak256(nonce || parent)`, so identical `(parent, nonce)` pairs
//!   always produce identical ids on every run
//! - **Opaque bytes**: ids are fixed 32-byte values compared byte-wise, which is
//!   also the tie-breaker of the delivery order
//! - **No registries**: deriving an id never consults shared state
//!
//! ## Quick Start
//!
//! ```rust
//! use types::ActorId;
//!
//! let parent = ActorId::EXTERNAL;
//! let first = ActorId::derive(&parent, 0);
//! let second = ActorId::derive(&parent, 1);
//!
//! assert_ne!(first, second);
//! assert_eq!(first, ActorId::derive(&parent, 0));
//! ```

pub mod common;

pub use common::errors::IdError;
pub use common::hash::{keccak256, Hash32, StateRoot};
pub use common::identifiers::ActorId;
