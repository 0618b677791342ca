//! In-memory state tree
//!
//! Values live in an ordered map; the root hash is recomputed from the sorted
//! entries, which keeps it independent of insertion order.

use crate::path::StatePath;
use crate::traits::{StateBatch, StateError, StateOp, StateTree};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;
use types::{keccak256, StateRoot};

/// Ordered in-memory store suitable for tests and single-process runs
#[derive(Debug, Default)]
pub struct MemoryStateTree {
    entries: RwLock<BTreeMap<StatePath, Bytes>>,
}

impl MemoryStateTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Paths currently stored, in order
    pub fn paths(&self) -> Vec<StatePath> {
        self.entries.read().keys().cloned().collect()
    }

    fn root_of(entries: &BTreeMap<StatePath, Bytes>) -> StateRoot {
        // Each leaf is hash(path) || hash(value); the root hashes the leaves in order
        let leaves: Vec<[u8; 64]> = entries
            .iter()
            .map(|(path, value)| {
                let mut leaf = [0u8; 64];
                leaf[..32].copy_from_slice(keccak256([path.encode()]).as_bytes());
                leaf[32..].copy_from_slice(keccak256([value.as_ref()]).as_bytes());
                leaf
            })
            .collect();
        keccak256(leaves.iter().map(|leaf| leaf.as_slice()))
    }
}

#[async_trait]
impl StateTree for MemoryStateTree {
    async fn get(&self, path: &StatePath) -> Result<Option<Bytes>, StateError> {
        Ok(self.entries.read().get(path).cloned())
    }

    async fn commit(&self, batch: StateBatch) -> Result<(), StateError> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                StateOp::Set(path, value) => {
                    entries.insert(path, value);
                }
                StateOp::Delete(path) => {
                    entries.remove(&path);
                }
            }
        }
        debug!(ops = count, entries = entries.len(), "State batch committed");
        Ok(())
    }

    async fn flush(&self) -> Result<StateRoot, StateError> {
        Ok(Self::root_of(&self.entries.read()))
    }

    async fn contains_prefix(&self, prefix: &StatePath) -> Result<bool, StateError> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.clone()..)
            .next()
            .map(|(path, _)| path.starts_with(prefix))
            .unwrap_or(false))
    }
}
