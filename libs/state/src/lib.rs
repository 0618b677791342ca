//! # State Core
//!
//! Content-addressed key/value store holding every persisted actor record.
//!
//! ## Record Layout
//!
//! ```text
//! <actor id>/meta        type tag, nonce, ticks, code chunk count
//! <actor id>/code/<i>    code payload, chunked
//! <actor id>/storage     container key/value storage
//! <actor id>/bindings    address book name -> address bindings
//! ```
//!
//! Writes for one actor are grouped in a [`StateBatch`] and applied atomically
//! with [`StateTree::commit`]. [`StateTree::flush`] folds the whole tree into a
//! single [`StateRoot`] that changes whenever any committed byte changes.

pub mod memory;
pub mod path;
pub mod traits;

pub use memory::MemoryStateTree;
pub use path::StatePath;
pub use traits::{StateBatch, StateError, StateOp, StateTree};
