//! State Tree Traits
//!
//! Core trait for the content-addressed store behind actor records.

use crate::path::StatePath;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use types::StateRoot;

/// Error types for state tree operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Failed to decode record at {path}: {reason}")]
    Codec { path: String, reason: String },

    #[error("Missing record at {path}")]
    MissingRecord { path: String },

    #[error("State backend failure: {reason}")]
    Backend { reason: String },
}

/// One write inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum StateOp {
    Set(StatePath, Bytes),
    Delete(StatePath),
}

/// Ordered group of writes committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateBatch {
    ops: Vec<StateOp>,
}

impl StateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: StatePath, value: impl Into<Bytes>) -> &mut Self {
        self.ops.push(StateOp::Set(path, value.into()));
        self
    }

    pub fn delete(&mut self, path: StatePath) -> &mut Self {
        self.ops.push(StateOp::Delete(path));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[StateOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StateOp> {
        self.ops
    }
}

/// Content-addressed key/value store
///
/// Implementations must apply a [`StateBatch`] atomically: readers observe either
/// none or all of its writes. [`StateTree::flush`] must be a pure function of the
/// committed contents so identical histories produce identical roots.
#[async_trait]
pub trait StateTree: Send + Sync {
    /// Read the value stored at `path`
    async fn get(&self, path: &StatePath) -> Result<Option<Bytes>, StateError>;

    /// Write a single value
    async fn set(&self, path: StatePath, value: Bytes) -> Result<(), StateError> {
        let mut batch = StateBatch::new();
        batch.set(path, value);
        self.commit(batch).await
    }

    /// Remove a single value; removing an absent path is not an error
    async fn delete(&self, path: StatePath) -> Result<(), StateError> {
        let mut batch = StateBatch::new();
        batch.delete(path);
        self.commit(batch).await
    }

    /// Apply every write of `batch` atomically, in order
    async fn commit(&self, batch: StateBatch) -> Result<(), StateError>;

    /// Compute the root hash summarising all committed values
    async fn flush(&self) -> Result<StateRoot, StateError>;

    /// True when any value lives at or below `prefix`
    async fn contains_prefix(&self, prefix: &StatePath) -> Result<bool, StateError>;
}
