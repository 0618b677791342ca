//! Message envelope
//!
//! Every message carries the causal stamp `(from_ticks, from_id)` used for
//! inbox ordering, the capabilities it transfers, and, for synchronous calls,
//! the chain of actors currently awaiting a reply.
//!
//! # Validation
//!
//! A message is rejected before it reaches any mailbox when:
//!
//! - it is addressed to [`ActorId::EXTERNAL`]
//! - its hop count exceeds the configured maximum
//! - it is asynchronous but carries a call stack
//! - it is synchronous but its call stack does not end at the destination
//!
//! # Completion
//!
//! A sender that wants the result attaches a [`Receipt`]. Exactly one
//! [`Outcome`] is delivered through it: the handler's response, or the error
//! that rolled the handler back.

use crate::error::{ExecutionError, HypervisorError};
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use types::ActorId;

/// Result of processing one message
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed { response: Bytes, ticks: u64 },
    Failed { error: ExecutionError, ticks: u64 },
}

impl Outcome {
    /// Receiver's tick count when the handler finished
    pub fn ticks(&self) -> u64 {
        match self {
            Self::Completed { ticks, .. } | Self::Failed { ticks, .. } => *ticks,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn response(&self) -> Option<&Bytes> {
        match self {
            Self::Completed { response, .. } => Some(response),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<Bytes, ExecutionError> {
        match self {
            Self::Completed { response, .. } => Ok(response),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

/// Sending half attached to a message
struct Completion {
    sender: oneshot::Sender<Outcome>,
    /// Actor task to mark runnable again before the outcome is delivered
    resume: Option<ActorId>,
}

/// Resolves to the [`Outcome`] of one message
#[derive(Debug)]
pub struct Receipt {
    to: ActorId,
    receiver: oneshot::Receiver<Outcome>,
}

impl Receipt {
    pub fn destination(&self) -> ActorId {
        self.to
    }
}

impl Future for Receipt {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let to = self.to;
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or(Outcome::Failed {
                error: ExecutionError::Dropped { to },
                ticks: 0,
            })
        })
    }
}

/// Envelope routed through the scheduler
pub struct Message {
    to: ActorId,
    from: ActorId,
    from_id: ActorId,
    from_ticks: u64,
    payload: Bytes,
    caps: Vec<Option<ActorId>>,
    sync: bool,
    call_stack: Vec<ActorId>,
    hops: u32,
    completion: Option<Completion>,
}

impl Message {
    /// New asynchronous message from the external driver at tick 0
    pub fn new(to: ActorId, payload: impl Into<Bytes>) -> Self {
        Self {
            to,
            from: ActorId::EXTERNAL,
            from_id: ActorId::EXTERNAL,
            from_ticks: 0,
            payload: payload.into(),
            caps: Vec::new(),
            sync: false,
            call_stack: Vec::new(),
            hops: 0,
            completion: None,
        }
    }

    /// Grant an address to the receiver
    ///
    /// Actors attach capabilities through their address book; this builder is
    /// for the external driver, which may hand out any address.
    pub fn with_capability(mut self, address: ActorId) -> Self {
        self.caps.push(Some(address));
        self
    }

    /// Stamp the message as sent at `ticks` by the external driver
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.from_ticks = ticks;
        self
    }

    pub fn with_hops(mut self, hops: u32) -> Self {
        self.hops = hops;
        self
    }

    pub fn to(&self) -> ActorId {
        self.to
    }

    pub fn from(&self) -> ActorId {
        self.from
    }

    pub fn from_id(&self) -> ActorId {
        self.from_id
    }

    pub fn from_ticks(&self) -> u64 {
        self.from_ticks
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_sync(&self) -> bool {
        self.sync
    }

    pub fn call_stack(&self) -> &[ActorId] {
        &self.call_stack
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    /// Number of capability slots, taken or not
    pub fn capability_count(&self) -> usize {
        self.caps.len()
    }

    /// Address at `index` if the slot has not been taken
    pub fn capability(&self, index: usize) -> Option<ActorId> {
        self.caps.get(index).copied().flatten()
    }

    /// Inbox ordering key
    pub fn sort_key(&self) -> (u64, ActorId) {
        (self.from_ticks, self.from_id)
    }

    pub fn validate(&self, max_hops: u32) -> Result<(), HypervisorError> {
        let reason = if self.to.is_external() {
            "destination is the external driver".to_string()
        } else if self.hops > max_hops {
            format!("hop count {} exceeds limit {}", self.hops, max_hops)
        } else if !self.sync && !self.call_stack.is_empty() {
            "asynchronous message carries a call stack".to_string()
        } else if self.sync && self.call_stack.last() != Some(&self.to) {
            "call stack does not end at the destination".to_string()
        } else {
            return Ok(());
        };
        Err(HypervisorError::MalformedMessage { reason })
    }

    pub(crate) fn stamp(&mut self, from: ActorId, ticks: u64, hops: u32) {
        self.from = from;
        self.from_id = from;
        self.from_ticks = ticks;
        self.hops = hops;
    }

    pub(crate) fn make_sync(&mut self, call_stack: Vec<ActorId>) {
        self.sync = true;
        self.call_stack = call_stack;
    }

    pub(crate) fn attach(&mut self, address: ActorId) -> usize {
        self.caps.push(Some(address));
        self.caps.len() - 1
    }

    /// Take the address out of a slot, leaving it empty
    pub(crate) fn take_capability(&mut self, index: usize) -> Option<ActorId> {
        self.caps.get_mut(index).and_then(Option::take)
    }

    /// Attach a completion channel; `resume` is the suspended task to wake
    pub(crate) fn receipt(&mut self, resume: Option<ActorId>) -> Receipt {
        let (sender, receiver) = oneshot::channel();
        self.completion = Some(Completion { sender, resume });
        Receipt {
            to: self.to,
            receiver,
        }
    }

    pub(crate) fn resume_target(&self) -> Option<ActorId> {
        self.completion.as_ref().and_then(|c| c.resume)
    }

    /// Pop the receiver's call frame and deliver the outcome, if anyone listens
    pub(crate) fn finish(&mut self, outcome: Outcome) {
        if self.sync {
            self.call_stack.pop();
        }
        if let Some(completion) = self.completion.take() {
            let _ = completion.sender.send(outcome);
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("to", &self.to)
            .field("from", &self.from)
            .field("from_ticks", &self.from_ticks)
            .field("payload_len", &self.payload.len())
            .field("caps", &self.caps)
            .field("sync", &self.sync)
            .field("call_stack", &self.call_stack)
            .field("hops", &self.hops)
            .field("has_receipt", &self.completion.is_some())
            .finish()
    }
}
