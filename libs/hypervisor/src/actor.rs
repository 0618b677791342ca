//! Actor instances and their persisted records
//!
//! An [`Actor`] pairs a container with the working copy of its state:
//! key/value storage, address book, and nonce. Each message runs as a small
//! transaction over that working copy:
//!
//! 1. raise the actor's ticks to the message's `from_ticks`
//! 2. snapshot storage and address book
//! 3. run the container's handler
//! 4. on success, commit changed state to the tree, then release buffered sends
//! 5. on failure, restore the snapshot and drop buffered sends
//!
//! Ticks and the nonce are not part of the snapshot. A failed message still
//! consumes the ticks it used and any ids it minted are never reused.
//!
//! A synchronous call that loops back to an actor already on the call chain
//! re-enters the same instance inline. The nested frame rolls back to its own
//! snapshot on failure; on success its sends and spent ticks fold into the
//! calling frame, which alone decides whether they take effect.

use crate::address_book::AddressBook;
use crate::container::Container;
use crate::context::ActorContext;
use crate::error::ExecutionError;
use crate::inbox::Inbox;
use crate::message::{Message, Outcome};
use crate::runtime::Runtime;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use state_core::{StateBatch, StateError, StatePath, StateTree};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, warn};
use types::ActorId;

const META: &str = "meta";
const CODE: &str = "code";
const STORAGE: &str = "storage";
const BINDINGS: &str = "bindings";

/// Container key/value storage
pub type Storage = BTreeMap<Vec<u8>, Vec<u8>>;

/// Fixed-size header of an actor record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorMeta {
    pub type_tag: u32,
    pub nonce: u64,
    pub ticks: u64,
    pub code_chunks: u32,
}

/// Everything persisted for one actor
#[derive(Debug, Clone, PartialEq)]
pub struct ActorRecord {
    pub meta: ActorMeta,
    pub code: Bytes,
    pub storage: Storage,
    pub bindings: BTreeMap<String, ActorId>,
}

fn record_path(id: &ActorId, field: &str) -> StatePath {
    StatePath::actor(id).join(field)
}

fn code_path(id: &ActorId, index: u32) -> StatePath {
    StatePath::actor(id).join(CODE).join(index.to_le_bytes())
}

fn encode<T: Serialize>(path: &StatePath, value: &T) -> Result<Bytes, StateError> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(|e| StateError::Codec {
            path: format!("{:?}", path),
            reason: e.to_string(),
        })
}

fn decode<T: DeserializeOwned>(path: &StatePath, bytes: &[u8]) -> Result<T, StateError> {
    bincode::deserialize(bytes).map_err(|e| StateError::Codec {
        path: format!("{:?}", path),
        reason: e.to_string(),
    })
}

fn chunk_count(code_len: usize, max_inline: usize) -> Result<u32, StateError> {
    let chunks = code_len.div_ceil(max_inline.max(1));
    u32::try_from(chunks).map_err(|_| StateError::Codec {
        path: "code".to_string(),
        reason: format!("{} code chunks exceed the u32 chunk index", chunks),
    })
}

impl ActorRecord {
    /// Read an actor's record; `None` if it was never persisted
    pub async fn read(tree: &dyn StateTree, id: &ActorId) -> Result<Option<Self>, StateError> {
        let meta_path = record_path(id, META);
        let Some(meta_bytes) = tree.get(&meta_path).await? else {
            return Ok(None);
        };
        let meta: ActorMeta = decode(&meta_path, &meta_bytes)?;

        let mut code = BytesMut::new();
        for index in 0..meta.code_chunks {
            let path = code_path(id, index);
            let chunk = tree
                .get(&path)
                .await?
                .ok_or_else(|| StateError::MissingRecord {
                    path: format!("{:?}", path),
                })?;
            code.extend_from_slice(&chunk);
        }

        let storage_path = record_path(id, STORAGE);
        let storage = match tree.get(&storage_path).await? {
            Some(bytes) => decode(&storage_path, &bytes)?,
            None => Storage::new(),
        };

        let bindings_path = record_path(id, BINDINGS);
        let bindings = match tree.get(&bindings_path).await? {
            Some(bytes) => decode(&bindings_path, &bytes)?,
            None => BTreeMap::new(),
        };

        Ok(Some(Self {
            meta,
            code: code.freeze(),
            storage,
            bindings,
        }))
    }
}

/// Mutable working copy guarded by the actor's lock
#[derive(Debug, Clone, Default)]
pub(crate) struct ActorState {
    pub nonce: u64,
    pub storage: Storage,
    pub book: AddressBook,
}

/// Pre-message copy used for rollback
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    storage: Storage,
    book: AddressBook,
}

impl Snapshot {
    /// Whether the persisted parts differ
    fn same_record(&self, other: &Snapshot) -> bool {
        self.storage == other.storage && self.book.bindings() == other.book.bindings()
    }
}

/// What a re-entrant frame hands back to the frame that called it
pub(crate) struct InlineFrame {
    /// Budget spent by the whole message, caller's share included
    pub used_ticks: u64,
    /// Sends to release when the caller's transaction commits
    pub sends: Vec<Message>,
}

/// A live actor
pub struct Actor {
    id: ActorId,
    type_tag: u32,
    code: Bytes,
    container: Arc<dyn Container>,
    ticks: AtomicU64,
    state: Mutex<ActorState>,
    inbox: Inbox,
}

impl Actor {
    pub(crate) fn new(
        id: ActorId,
        type_tag: u32,
        code: Bytes,
        container: Arc<dyn Container>,
        ticks: u64,
    ) -> Self {
        Self {
            id,
            type_tag,
            code,
            container,
            ticks: AtomicU64::new(ticks),
            state: Mutex::new(ActorState::default()),
            inbox: Inbox::new(),
        }
    }

    fn from_record(id: ActorId, record: ActorRecord, container: Arc<dyn Container>) -> Self {
        let actor = Self::new(id, record.meta.type_tag, record.code, container, record.meta.ticks);
        {
            let mut state = actor.state.lock();
            state.nonce = record.meta.nonce;
            state.storage = record.storage;
            state.book = AddressBook::from_bindings(record.bindings);
        }
        actor
    }

    /// Load a persisted actor and build its container
    pub(crate) async fn load(runtime: &Runtime, id: ActorId) -> Result<Arc<Actor>, ExecutionError> {
        let record = ActorRecord::read(runtime.tree.as_ref(), &id)
            .await?
            .ok_or(ExecutionError::UnknownActor { id })?;
        let container = runtime
            .containers
            .instantiate(record.meta.type_tag, &record.code)?;
        debug!(
            actor_id = %id,
            type_tag = record.meta.type_tag,
            ticks = record.meta.ticks,
            "Actor loaded from state tree"
        );
        Ok(Arc::new(Self::from_record(id, record, container)))
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn type_tag(&self) -> u32 {
        self.type_tag
    }

    pub fn code(&self) -> &Bytes {
        &self.code
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Only the scheduler moves ticks, so the tick index stays in sync
    pub(crate) fn store_ticks(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    pub fn nonce(&self) -> u64 {
        self.state.lock().nonce
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub(crate) fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }

    pub fn has_bindings(&self) -> bool {
        self.state.lock().book.has_bindings()
    }

    /// Current nonce, then increment
    pub(crate) fn next_nonce(&self) -> u64 {
        let mut state = self.state.lock();
        let nonce = state.nonce;
        state.nonce += 1;
        nonce
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ActorState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            storage: state.storage.clone(),
            book: state.book.clone(),
        }
    }

    pub(crate) fn restore(&self, snapshot: Snapshot) {
        let mut state = self.state.lock();
        state.storage = snapshot.storage;
        state.book = snapshot.book;
    }

    fn meta(&self, max_inline_code: usize) -> Result<ActorMeta, StateError> {
        Ok(ActorMeta {
            type_tag: self.type_tag,
            nonce: self.nonce(),
            ticks: self.ticks(),
            code_chunks: chunk_count(self.code.len(), max_inline_code)?,
        })
    }

    /// Write the record in one batch; code only on creation
    pub(crate) async fn commit(&self, runtime: &Runtime, include_code: bool) -> Result<(), StateError> {
        let max_inline = runtime.config.actors.max_inline_code;
        let mut batch = StateBatch::new();

        let meta_path = record_path(&self.id, META);
        batch.set(meta_path.clone(), encode(&meta_path, &self.meta(max_inline)?)?);

        if include_code {
            let chunk = max_inline.max(1);
            for (index, start) in (0..self.code.len()).step_by(chunk).enumerate() {
                let end = (start + chunk).min(self.code.len());
                let index = u32::try_from(index).map_err(|_| StateError::Codec {
                    path: format!("{:?}", record_path(&self.id, CODE)),
                    reason: format!("code chunk index {} exceeds u32", index),
                })?;
                batch.set(code_path(&self.id, index), self.code.slice(start..end));
            }
        }

        let (storage, bindings) = {
            let state = self.state.lock();
            (state.storage.clone(), state.book.bindings().clone())
        };
        let storage_path = record_path(&self.id, STORAGE);
        batch.set(storage_path.clone(), encode(&storage_path, &storage)?);
        let bindings_path = record_path(&self.id, BINDINGS);
        batch.set(bindings_path.clone(), encode(&bindings_path, &bindings)?);

        runtime.tree.commit(batch).await
    }

    /// Persist metadata when the scheduler goes idle
    pub(crate) async fn shutdown(&self, runtime: &Runtime) {
        let path = record_path(&self.id, META);
        let result = match self
            .meta(runtime.config.actors.max_inline_code)
            .and_then(|meta| encode(&path, &meta))
        {
            Ok(bytes) => runtime.tree.set(path, bytes).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(actor_id = %self.id, ticks = self.ticks(), "Actor shut down"),
            Err(e) => error!(actor_id = %self.id, error = %e, "Failed to persist actor metadata"),
        }
    }

    /// Mailbox loop; exits when the inbox drains
    pub(crate) async fn run_loop(self: Arc<Self>, runtime: Arc<Runtime>) {
        debug!(actor_id = %self.id, "Actor loop started");
        loop {
            match self.inbox.next_message(&self, &runtime.scheduler, 0).await {
                Some(message) => {
                    let permit = runtime.scheduler.acquire_worker().await;
                    self.run_message(&runtime, message, permit).await;
                }
                None => {
                    if runtime.scheduler.retire(&self) {
                        break;
                    }
                }
            }
        }
        debug!(actor_id = %self.id, ticks = self.ticks(), "Actor loop retired");
    }

    async fn run_message(
        self: &Arc<Self>,
        runtime: &Arc<Runtime>,
        mut message: Message,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let outcome = self.execute(runtime, &mut message, Some(self.id), permit).await;
        runtime.complete(message, outcome);
    }

    /// Run one message as a transaction over the working copy
    ///
    /// `task` is the actor whose loop executes this frame.
    pub(crate) async fn execute(
        self: &Arc<Self>,
        runtime: &Arc<Runtime>,
        message: &mut Message,
        task: Option<ActorId>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Outcome {
        let ctx = ActorContext::for_message(self.clone(), runtime.clone(), message, task, permit);
        self.transact(runtime, message, ctx, false).await.0
    }

    /// Run a re-entrant message inside the caller's frame
    ///
    /// Nothing is committed and buffered sends are handed back instead of
    /// released; the caller's transaction owns both. `used_ticks` is what the
    /// caller has already spent of the message's budget.
    pub(crate) async fn execute_inline(
        self: &Arc<Self>,
        runtime: &Arc<Runtime>,
        message: &mut Message,
        task: Option<ActorId>,
        used_ticks: u64,
    ) -> (Outcome, InlineFrame) {
        let ctx = ActorContext::for_inline(self.clone(), runtime.clone(), message, task, used_ticks);
        self.transact(runtime, message, ctx, true).await
    }

    async fn transact(
        self: &Arc<Self>,
        runtime: &Arc<Runtime>,
        message: &mut Message,
        mut ctx: ActorContext,
        inline: bool,
    ) -> (Outcome, InlineFrame) {
        let start = Instant::now();
        runtime.scheduler.raise_ticks(self, message.from_ticks());
        let snapshot = self.snapshot();

        let result = match self.container.on_message(&mut ctx, message).await {
            Ok(response) => ctx.settle().await.map(|sends| (response, sends)),
            Err(error) => Err(error),
        };
        let mut frame = InlineFrame {
            used_ticks: ctx.used_ticks(),
            sends: Vec::new(),
        };
        drop(ctx);

        let result = if inline {
            match result {
                Ok((response, sends)) => {
                    frame.sends = sends;
                    Ok(response)
                }
                Err(error) => {
                    self.restore(snapshot);
                    Err(error)
                }
            }
        } else {
            let result = self.finish_transaction(runtime, snapshot, result).await;
            self.with_state(|state| state.book.clear_unbound());
            result
        };

        let ticks = self.ticks();
        runtime
            .metrics
            .record_message_handled(start.elapsed(), result.is_ok());
        let outcome = match result {
            Ok(response) => {
                debug!(
                    actor_id = %self.id,
                    from = %message.from(),
                    ticks,
                    sync = message.is_sync(),
                    inline,
                    processing_duration_ns = start.elapsed().as_nanos() as u64,
                    "Message handled"
                );
                Outcome::Completed { response, ticks }
            }
            Err(error) => {
                warn!(
                    actor_id = %self.id,
                    from = %message.from(),
                    ticks,
                    inline,
                    error = %error,
                    category = error.category(),
                    "Message failed, state rolled back"
                );
                Outcome::Failed { error, ticks }
            }
        };
        (outcome, frame)
    }

    /// Run `on_startup` after a load
    pub(crate) async fn startup(self: &Arc<Self>, runtime: &Arc<Runtime>) {
        let snapshot = self.snapshot();
        let mut ctx = ActorContext::for_startup(self.clone(), runtime.clone());
        let result = match self.container.on_startup(&mut ctx).await {
            Ok(()) => ctx.settle().await.map(|sends| (Bytes::new(), sends)),
            Err(error) => Err(error),
        };
        drop(ctx);

        if let Err(error) = self.finish_transaction(runtime, snapshot, result).await {
            warn!(actor_id = %self.id, error = %error, "Startup hook failed, state rolled back");
        }
        self.with_state(|state| state.book.clear_unbound());
    }

    /// Commit or roll back, then release buffered sends
    pub(crate) async fn finish_transaction(
        &self,
        runtime: &Arc<Runtime>,
        snapshot: Snapshot,
        result: Result<(Bytes, Vec<Message>), ExecutionError>,
    ) -> Result<Bytes, ExecutionError> {
        match result {
            Ok((response, sends)) => {
                if !self.snapshot().same_record(&snapshot) {
                    if let Err(error) = self.commit(runtime, false).await {
                        self.restore(snapshot);
                        return Err(error.into());
                    }
                }
                runtime.queue(sends, None);
                Ok(response)
            }
            Err(error) => {
                self.restore(snapshot);
                Err(error)
            }
        }
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("type_tag", &self.type_tag)
            .field("ticks", &self.ticks())
            .field("code_len", &self.code.len())
            .field("inbox_len", &self.inbox.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{idle_actor, NoopContainer};
    use state_core::MemoryStateTree;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 4).unwrap(), 0);
        assert_eq!(chunk_count(4, 4).unwrap(), 1);
        assert_eq!(chunk_count(5, 4).unwrap(), 2);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_chunk_count_overflow_is_an_error() {
        let len = u32::MAX as usize + 1;
        assert_eq!(chunk_count(len - 1, 1).unwrap(), u32::MAX);
        assert!(matches!(chunk_count(len, 1), Err(StateError::Codec { .. })));
    }

    #[test]
    fn test_snapshot_restore_keeps_nonce() {
        let actor = idle_actor(1, 0);
        let snapshot = actor.snapshot();

        actor.with_state(|state| {
            state.storage.insert(b"k".to_vec(), b"v".to_vec());
        });
        assert_eq!(actor.next_nonce(), 0);
        assert!(!actor.snapshot().same_record(&snapshot));

        actor.restore(snapshot.clone());
        assert!(actor.snapshot().same_record(&snapshot));
        assert_eq!(actor.nonce(), 1);
    }

    #[tokio::test]
    async fn test_record_round_trip_with_chunked_code() {
        let tree = MemoryStateTree::new();
        let id = ActorId::derive(&ActorId::EXTERNAL, 3);
        let code = Bytes::from_static(b"0123456789");

        let meta_path = record_path(&id, META);
        let mut batch = StateBatch::new();
        let meta = ActorMeta {
            type_tag: 9,
            nonce: 2,
            ticks: 40,
            code_chunks: chunk_count(code.len(), 4).unwrap(),
        };
        batch.set(meta_path.clone(), encode(&meta_path, &meta).unwrap());
        for (index, start) in (0..code.len()).step_by(4).enumerate() {
            let end = (start + 4).min(code.len());
            batch.set(code_path(&id, index as u32), code.slice(start..end));
        }
        tree.commit(batch).await.unwrap();

        let record = ActorRecord::read(&tree, &id).await.unwrap().unwrap();
        assert_eq!(record.meta, meta);
        assert_eq!(record.meta.code_chunks, 3);
        assert_eq!(record.code, code);
        assert!(record.storage.is_empty());
        assert!(record.bindings.is_empty());

        let actor = Actor::from_record(id, record, Arc::new(NoopContainer));
        assert_eq!(actor.ticks(), 40);
        assert_eq!(actor.nonce(), 2);
    }

    #[tokio::test]
    async fn test_missing_record_reads_as_none() {
        let tree = MemoryStateTree::new();
        let id = ActorId::derive(&ActorId::EXTERNAL, 0);
        assert!(ActorRecord::read(&tree, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_code_chunk_is_an_error() {
        let tree = MemoryStateTree::new();
        let id = ActorId::derive(&ActorId::EXTERNAL, 0);
        let meta_path = record_path(&id, META);
        let meta = ActorMeta {
            type_tag: 1,
            nonce: 0,
            ticks: 0,
            code_chunks: 1,
        };
        tree.set(meta_path.clone(), encode(&meta_path, &meta).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            ActorRecord::read(&tree, &id).await,
            Err(StateError::MissingRecord { .. })
        ));
    }
}
