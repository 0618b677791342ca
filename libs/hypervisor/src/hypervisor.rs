//! Driver-facing entry point
//!
//! A [`Hypervisor`] owns one state tree, one container registry, and one
//! scheduler. The external driver creates actors, submits messages, waits for
//! the system to go idle, and reads the resulting state root.
//!
//! All methods that submit work must be called from within a Tokio runtime.

use crate::actor::ActorRecord;
use crate::container::ContainerRegistry;
use crate::creation::{CreateRequest, CreationService};
use crate::error::{HypervisorError, Result};
use crate::message::{Message, Receipt};
use crate::metrics::MetricsSnapshot;
use crate::runtime::Runtime;
use crate::scheduler::Scheduler;
use bytes::Bytes;
use hypervisor_config::HypervisorConfig;
use state_core::{MemoryStateTree, StatePath, StateTree};
use std::sync::Arc;
use tracing::info;
use types::{ActorId, StateRoot};

pub struct Hypervisor {
    runtime: Arc<Runtime>,
}

impl Hypervisor {
    pub fn new(
        tree: Arc<dyn StateTree>,
        containers: ContainerRegistry,
        config: HypervisorConfig,
    ) -> Result<Self> {
        config.validate().map_err(|e| HypervisorError::Config {
            reason: e.to_string(),
        })?;
        info!(
            workers = config.scheduler.workers,
            max_hops = config.actors.max_hops,
            tick_budget = ?config.actors.tick_budget,
            containers = ?containers,
            "Hypervisor initialized"
        );
        Ok(Self {
            runtime: Arc::new(Runtime::new(tree, containers, config)),
        })
    }

    /// Hypervisor over a fresh in-memory tree
    pub fn in_memory(containers: ContainerRegistry, config: HypervisorConfig) -> Result<Self> {
        Self::new(Arc::new(MemoryStateTree::new()), containers, config)
    }

    pub fn config(&self) -> &HypervisorConfig {
        &self.runtime.config
    }

    pub fn tree(&self) -> &Arc<dyn StateTree> {
        &self.runtime.tree
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.runtime.scheduler
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.runtime.metrics.snapshot()
    }

    /// Submit a message; the receipt resolves with its outcome
    pub fn send(&self, mut message: Message) -> Result<Receipt> {
        self.runtime.validate(&message)?;
        let receipt = message.receipt(None);
        self.runtime.queue(vec![message], None);
        Ok(receipt)
    }

    /// Submit several messages in order without receipts
    ///
    /// Nothing is queued if any message is malformed.
    pub fn send_all(&self, messages: impl IntoIterator<Item = Message>) -> Result<()> {
        let messages: Vec<_> = messages.into_iter().collect();
        for message in &messages {
            self.runtime.validate(message)?;
        }
        self.runtime.queue(messages, None);
        Ok(())
    }

    /// Create an actor on behalf of the external driver
    ///
    /// Its id derives from [`ActorId::EXTERNAL`] and a persisted driver nonce.
    /// Driver-created actors are roots: they are persisted even if they bind
    /// nothing.
    pub async fn create_actor(
        &self,
        type_tag: u32,
        code: impl Into<Bytes>,
        payload: impl Into<Bytes>,
        caps: Vec<ActorId>,
    ) -> Result<ActorId> {
        let nonce = self.runtime.next_driver_nonce().await?;
        let id = ActorId::derive(&ActorId::EXTERNAL, nonce);
        self.create_rooted(id, type_tag, code.into(), payload.into(), caps)
            .await
    }

    /// Create the distinguished actor at [`ActorId::ROOT`]
    pub async fn create_root_actor(
        &self,
        type_tag: u32,
        code: impl Into<Bytes>,
        payload: impl Into<Bytes>,
        caps: Vec<ActorId>,
    ) -> Result<ActorId> {
        let id = ActorId::ROOT;
        if self.runtime.tree.contains_prefix(&StatePath::actor(&id)).await? {
            return Err(HypervisorError::ActorExists { id });
        }
        self.create_rooted(id, type_tag, code.into(), payload.into(), caps)
            .await
    }

    async fn create_rooted(
        &self,
        id: ActorId,
        type_tag: u32,
        code: Bytes,
        payload: Bytes,
        caps: Vec<ActorId>,
    ) -> Result<ActorId> {
        let request = CreateRequest {
            id,
            type_tag,
            code,
            payload,
            caps,
            from: ActorId::EXTERNAL,
            ticks: 0,
            hops: 0,
            call_stack: Vec::new(),
            task: None,
            rooted: true,
        };
        CreationService::create(&self.runtime, request).await?;
        self.runtime.scheduler.release_if_idle(&id);
        Ok(id)
    }

    /// Wait until every queued message has been processed and actors shut down
    pub async fn idle(&self) {
        while let Some(mut watcher) = self.runtime.scheduler.idle_watcher() {
            if watcher.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait for idle, then fold the tree into its root hash
    pub async fn create_state_root(&self) -> Result<StateRoot> {
        self.idle().await;
        let root = self.runtime.tree.flush().await?;
        info!(root = %root, "State root created");
        Ok(root)
    }

    /// Persisted record of `id`, if any
    pub async fn actor_record(&self, id: &ActorId) -> Result<Option<ActorRecord>> {
        Ok(ActorRecord::read(self.runtime.tree.as_ref(), id).await?)
    }
}
