//! Shared internals of one hypervisor instance
//!
//! Every actor, context, and loop holds an `Arc<Runtime>`; there is no global
//! state, so independent hypervisors can coexist in one process.

use crate::actor::Actor;
use crate::container::ContainerRegistry;
use crate::error::{ExecutionError, HypervisorError};
use crate::message::{Message, Outcome};
use crate::metrics::SystemMetrics;
use crate::scheduler::Scheduler;
use bytes::Bytes;
use hypervisor_config::HypervisorConfig;
use state_core::{StateError, StatePath, StateTree};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use types::ActorId;

pub(crate) struct Runtime {
    pub(crate) scheduler: Scheduler,
    pub(crate) tree: Arc<dyn StateTree>,
    pub(crate) containers: ContainerRegistry,
    pub(crate) config: HypervisorConfig,
    pub(crate) metrics: Arc<SystemMetrics>,
    driver_nonce: Mutex<Option<u64>>,
}

impl Runtime {
    pub(crate) fn new(
        tree: Arc<dyn StateTree>,
        containers: ContainerRegistry,
        config: HypervisorConfig,
    ) -> Self {
        let metrics = Arc::new(SystemMetrics::default());
        Self {
            scheduler: Scheduler::new(config.scheduler.workers, metrics.clone()),
            tree,
            containers,
            config,
            metrics,
            driver_nonce: Mutex::new(None),
        }
    }

    /// Where the external driver's creation nonce is kept
    pub(crate) fn driver_nonce_path() -> StatePath {
        StatePath::new().join("hypervisor").join("driver_nonce")
    }

    pub(crate) fn validate(&self, message: &Message) -> Result<(), HypervisorError> {
        message.validate(self.config.actors.max_hops)
    }

    /// Hand messages to the scheduler
    ///
    /// Anything failing validation is completed as rejected instead.
    /// `suspend` names the sender's task when it is about to block on a reply.
    pub(crate) fn queue(self: &Arc<Self>, messages: Vec<Message>, suspend: Option<ActorId>) {
        let mut accepted = Vec::with_capacity(messages.len());
        for message in messages {
            match self.validate(&message) {
                Ok(()) => accepted.push(message),
                Err(error) => {
                    self.metrics.record_rejected();
                    warn!(to = %message.to(), error = %error, "Message rejected");
                    let ticks = message.from_ticks();
                    self.complete(
                        message,
                        Outcome::Failed {
                            error: ExecutionError::rejected(error.to_string()),
                            ticks,
                        },
                    );
                }
            }
        }
        self.scheduler.enqueue(self, accepted, suspend);
    }

    /// Load (or fetch) the live instance of `id`, running `on_startup` on load
    pub(crate) async fn resolve(self: &Arc<Self>, id: &ActorId) -> Result<Arc<Actor>, ExecutionError> {
        if id.is_external() {
            return Err(ExecutionError::UnknownActor { id: *id });
        }
        let (actor, fresh) = self
            .scheduler
            .instantiate(id, Actor::load(self, *id))
            .await?;
        if fresh {
            self.metrics.record_loaded();
            actor.startup(self).await;
        }
        Ok(actor)
    }

    /// Wake the waiting caller, if any, then deliver the outcome
    pub(crate) fn complete(&self, mut message: Message, outcome: Outcome) {
        if let Some(task) = message.resume_target() {
            self.scheduler.resume(&task);
        }
        message.finish(outcome);
    }

    /// Next nonce for driver-created actors, persisted immediately
    pub(crate) async fn next_driver_nonce(&self) -> Result<u64, StateError> {
        let mut guard = self.driver_nonce.lock().await;
        let path = Self::driver_nonce_path();
        let current = match *guard {
            Some(nonce) => nonce,
            None => match self.tree.get(&path).await? {
                Some(bytes) => {
                    let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| StateError::Codec {
                        path: format!("{:?}", path),
                        reason: format!("expected 8 bytes, got {}", bytes.len()),
                    })?;
                    u64::from_le_bytes(raw)
                }
                None => 0,
            },
        };
        let next = current + 1;
        self.tree
            .set(path, Bytes::copy_from_slice(&next.to_le_bytes()))
            .await?;
        *guard = Some(next);
        Ok(current)
    }
}
