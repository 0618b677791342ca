//! Host interface handed to container code
//!
//! An [`ActorContext`] lives for exactly one handler invocation. Through it a
//! container reads and writes its storage, manages its address book, spends
//! ticks, and talks to other actors.
//!
//! # Ordered Effects
//!
//! Outgoing asynchronous sends and deferred host work are buffered in
//! registration order. They are released only after the handler succeeds and
//! its state is committed; a failing handler discards them. A synchronous
//! [`ActorContext::call`] first releases everything buffered before it, so the
//! callee observes the same order the caller issued.
//!
//! # Synchronous Calls
//!
//! A call to an actor not on the current call chain goes through the
//! destination's mailbox like any other message; the caller's task is
//! suspended (and gives up its worker slot) until the reply arrives. A call to
//! an actor already on the chain runs that actor's handler inline, in the
//! caller's task, over the same actor instance. The inline frame draws on the
//! caller's tick budget, and its sends join the caller's buffer.

use crate::actor::Actor;
use crate::creation::{CreateRequest, CreationService};
use crate::error::{CapabilityError, ExecutionError};
use crate::message::Message;
use crate::runtime::Runtime;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, trace};
use types::ActorId;

enum PendingOp {
    Send(Message),
    Deferred(BoxFuture<'static, Result<(), ExecutionError>>),
}

/// Per-invocation host interface
pub struct ActorContext {
    actor: Arc<Actor>,
    runtime: Arc<Runtime>,
    call_stack: Vec<ActorId>,
    hops: u32,
    /// Actor whose loop executes this frame
    task: Option<ActorId>,
    ops: VecDeque<PendingOp>,
    used_ticks: u64,
    tick_budget: Option<u64>,
    permit: Option<OwnedSemaphorePermit>,
    calls_allowed: bool,
}

impl ActorContext {
    fn new(actor: Arc<Actor>, runtime: Arc<Runtime>, call_stack: Vec<ActorId>, hops: u32) -> Self {
        let tick_budget = runtime.config.actors.tick_budget;
        Self {
            actor,
            runtime,
            call_stack,
            hops,
            task: None,
            ops: VecDeque::new(),
            used_ticks: 0,
            tick_budget,
            permit: None,
            calls_allowed: true,
        }
    }

    pub(crate) fn for_message(
        actor: Arc<Actor>,
        runtime: Arc<Runtime>,
        message: &Message,
        task: Option<ActorId>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        let call_stack = if message.is_sync() {
            message.call_stack().to_vec()
        } else {
            vec![actor.id()]
        };
        let mut ctx = Self::new(actor, runtime, call_stack, message.hops());
        ctx.task = task;
        ctx.permit = permit;
        ctx
    }

    /// Frame for a re-entrant call; continues the caller's tick budget
    pub(crate) fn for_inline(
        actor: Arc<Actor>,
        runtime: Arc<Runtime>,
        message: &Message,
        task: Option<ActorId>,
        used_ticks: u64,
    ) -> Self {
        let mut ctx = Self::for_message(actor, runtime, message, task, None);
        ctx.used_ticks = used_ticks;
        ctx
    }

    pub(crate) fn for_creation(
        actor: Arc<Actor>,
        runtime: Arc<Runtime>,
        call_stack: Vec<ActorId>,
        hops: u32,
        task: Option<ActorId>,
    ) -> Self {
        let mut ctx = Self::new(actor, runtime, call_stack, hops);
        ctx.task = task;
        ctx
    }

    /// Startup runs inside the drain loop, which a sync call would deadlock
    pub(crate) fn for_startup(actor: Arc<Actor>, runtime: Arc<Runtime>) -> Self {
        let call_stack = vec![actor.id()];
        let mut ctx = Self::new(actor, runtime, call_stack, 0);
        ctx.calls_allowed = false;
        ctx
    }

    pub fn id(&self) -> ActorId {
        self.actor.id()
    }

    pub fn ticks(&self) -> u64 {
        self.actor.ticks()
    }

    pub fn nonce(&self) -> u64 {
        self.actor.nonce()
    }

    /// Actors awaiting a reply, outermost first; ends with this actor
    pub fn call_stack(&self) -> &[ActorId] {
        &self.call_stack
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    /// Ticks spent by this message so far, inline calls included
    pub fn used_ticks(&self) -> u64 {
        self.used_ticks
    }

    /// Advance this actor's logical clock
    ///
    /// The ticks are spent even when the budget is exceeded and the message
    /// fails.
    pub fn use_ticks(&mut self, amount: u64) -> Result<(), ExecutionError> {
        self.used_ticks = self.used_ticks.saturating_add(amount);
        let target = self.actor.ticks().saturating_add(amount);
        self.runtime.scheduler.raise_ticks(&self.actor, target);
        self.check_budget()
    }

    fn check_budget(&self) -> Result<(), ExecutionError> {
        match self.tick_budget {
            Some(limit) if self.used_ticks > limit => Err(ExecutionError::OutOfTicks {
                used: self.used_ticks,
                limit,
            }),
            _ => Ok(()),
        }
    }

    // Storage

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.actor
            .with_state(|state| state.storage.get(key).cloned())
            .map(Bytes::from)
    }

    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let (key, value) = (key.into(), value.into());
        self.actor.with_state(|state| {
            state.storage.insert(key, value);
        });
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.actor
            .with_state(|state| state.storage.remove(key).is_some())
    }

    // Address book

    /// Bind an address held in hand under `name`
    pub fn store(&mut self, name: impl Into<String>, address: ActorId) -> Result<(), ExecutionError> {
        let name = name.into();
        self.actor
            .with_state(|state| state.book.store(name, address))
            .map_err(Into::into)
    }

    pub fn lookup(&self, name: &str) -> Option<ActorId> {
        self.actor.with_state(|state| state.book.lookup(name))
    }

    /// Unbind `name`, putting its address in hand
    pub fn load(&mut self, name: &str) -> Result<ActorId, ExecutionError> {
        self.actor
            .with_state(|state| state.book.load(name))
            .map_err(Into::into)
    }

    pub fn delete_binding(&mut self, name: &str) -> Option<ActorId> {
        self.actor.with_state(|state| state.book.delete(name))
    }

    /// Whether `address` is in hand
    pub fn holds(&self, address: &ActorId) -> bool {
        self.actor.with_state(|state| state.book.is_unbound(address))
    }

    /// Put this actor's own address in hand so it can be handed out
    pub fn self_address(&mut self) -> ActorId {
        let id = self.actor.id();
        self.actor.with_state(|state| state.book.hold(id));
        id
    }

    /// Take a capability off an incoming message into hand
    pub fn get_address_from_message(
        &mut self,
        message: &mut Message,
        index: usize,
    ) -> Result<ActorId, ExecutionError> {
        self.actor
            .with_state(|state| state.book.get_address_from_message(message, index))
            .map_err(Into::into)
    }

    // Messaging

    /// Queue an asynchronous message, released when this handler commits
    pub fn send(
        &mut self,
        to: ActorId,
        payload: impl Into<Bytes>,
        caps: &[ActorId],
    ) -> Result<(), ExecutionError> {
        let message = self.outgoing(to, payload.into(), caps, None)?;
        trace!(actor_id = %self.id(), to = %to, "Send buffered");
        self.ops.push_back(PendingOp::Send(message));
        Ok(())
    }

    /// Call another actor and wait for its reply
    ///
    /// The callee's failure comes back as `Err` and does not roll back the
    /// caller unless the caller propagates it.
    pub async fn call(
        &mut self,
        to: ActorId,
        payload: impl Into<Bytes>,
        caps: &[ActorId],
    ) -> Result<Bytes, ExecutionError> {
        if !self.calls_allowed {
            return Err(ExecutionError::rejected("synchronous calls are not available during startup"));
        }
        self.flush().await?;

        let reentrant = self.call_stack.contains(&to);
        let mut chain = self.call_stack.clone();
        chain.push(to);
        let mut message = self.outgoing(to, payload.into(), caps, Some(chain))?;
        self.runtime.metrics.record_call(reentrant);

        let outcome = if reentrant {
            let target = if to == self.actor.id() {
                self.actor.clone()
            } else {
                self.runtime
                    .scheduler
                    .actor(&to)
                    .ok_or(ExecutionError::UnknownActor { id: to })?
            };
            debug!(
                actor_id = %self.id(),
                to = %to,
                depth = message.call_stack().len(),
                "Re-entrant call executing inline"
            );
            let (outcome, frame) = target
                .execute_inline(&self.runtime, &mut message, self.task, self.used_ticks)
                .await;
            message.finish(outcome.clone());
            self.used_ticks = frame.used_ticks;
            self.ops.extend(frame.sends.into_iter().map(PendingOp::Send));
            outcome
        } else {
            let receipt = message.receipt(self.task);
            let had_permit = self.permit.take().is_some();
            self.runtime.queue(vec![message], self.task);
            let outcome = receipt.await;
            if let Some(task) = self.task {
                self.runtime.scheduler.resume(&task);
            }
            if had_permit {
                self.permit = self.runtime.scheduler.acquire_worker().await;
            }
            outcome
        };

        self.runtime
            .scheduler
            .raise_ticks(&self.actor, outcome.ticks());
        self.check_budget()?;
        outcome.into_result()
    }

    /// Create a child actor; its address is returned in hand
    pub async fn spawn(
        &mut self,
        type_tag: u32,
        code: impl Into<Bytes>,
        payload: impl Into<Bytes>,
        caps: &[ActorId],
    ) -> Result<ActorId, ExecutionError> {
        self.check_in_hand(caps)?;
        let nonce = self.actor.next_nonce();
        let id = ActorId::derive(&self.actor.id(), nonce);
        self.actor.with_state(|state| {
            caps.iter().try_for_each(|cap| state.book.release(cap))
        })?;

        let request = CreateRequest {
            id,
            type_tag,
            code: code.into(),
            payload: payload.into(),
            caps: caps.to_vec(),
            from: self.actor.id(),
            ticks: self.actor.ticks(),
            hops: self.hops.saturating_add(1),
            call_stack: self.call_stack.clone(),
            task: self.task,
            rooted: false,
        };
        match CreationService::create(&self.runtime, request).await {
            Ok(_) => {
                self.actor.with_state(|state| state.book.hold(id));
                Ok(id)
            }
            Err(error) => {
                // Give the transferred capabilities back
                self.actor.with_state(|state| caps.iter().for_each(|cap| state.book.hold(*cap)));
                Err(error)
            }
        }
    }

    /// Register asynchronous host work, completed in order before commit
    pub fn defer<F>(&mut self, work: F)
    where
        F: Future<Output = Result<(), ExecutionError>> + Send + 'static,
    {
        self.ops.push_back(PendingOp::Deferred(Box::pin(work)));
    }

    /// Resolve buffered operations in order; returns the sends to release
    ///
    /// A message over its tick budget never settles, even if the handler
    /// swallowed the error.
    pub(crate) async fn settle(&mut self) -> Result<Vec<Message>, ExecutionError> {
        self.check_budget()?;
        let mut sends = Vec::new();
        while let Some(op) = self.ops.pop_front() {
            match op {
                PendingOp::Send(message) => sends.push(message),
                PendingOp::Deferred(work) => work.await?,
            }
        }
        Ok(sends)
    }

    async fn flush(&mut self) -> Result<(), ExecutionError> {
        let sends = self.settle().await?;
        if !sends.is_empty() {
            self.runtime.queue(sends, None);
        }
        Ok(())
    }

    fn check_in_hand(&self, caps: &[ActorId]) -> Result<(), ExecutionError> {
        self.actor.with_state(|state| {
            for (index, cap) in caps.iter().enumerate() {
                if !state.book.is_unbound(cap) || caps[..index].contains(cap) {
                    return Err(CapabilityError::InvalidCapability { address: *cap }.into());
                }
            }
            Ok(())
        })
    }

    /// Build, stamp, and validate an outgoing message, then move caps onto it
    fn outgoing(
        &mut self,
        to: ActorId,
        payload: Bytes,
        caps: &[ActorId],
        call_stack: Option<Vec<ActorId>>,
    ) -> Result<Message, ExecutionError> {
        let mut message = Message::new(to, payload);
        message.stamp(self.actor.id(), self.actor.ticks(), self.hops.saturating_add(1));
        if let Some(chain) = call_stack {
            message.make_sync(chain);
        }
        if let Err(error) = self.runtime.validate(&message) {
            self.runtime.metrics.record_rejected();
            return Err(ExecutionError::rejected(error.to_string()));
        }

        self.check_in_hand(caps)?;
        self.actor.with_state(|state| {
            caps.iter()
                .try_for_each(|cap| state.book.add_address_to_message(&mut message, *cap).map(|_| ()))
        })?;
        Ok(message)
    }
}
