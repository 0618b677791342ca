//! Sorted per-actor inbox
//!
//! Messages are ordered by `(from_ticks, from_id)`. Equal keys keep arrival
//! order, which for a single sender is send order.
//!
//! [`Inbox::next_message`] only hands out the head once the tick barrier
//! guarantees no other actor can still produce a message that sorts before it.

use crate::actor::Actor;
use crate::message::Message;
use crate::scheduler::{Barrier, Scheduler, TickKey};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::trace;

#[derive(Debug, Default)]
pub struct Inbox {
    queue: Mutex<VecDeque<Message>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in order; returns true if the message became the new head
    pub fn push(&self, message: Message) -> bool {
        let mut queue = self.queue.lock();
        let key = message.sort_key();
        let position = queue.partition_point(|queued| queued.sort_key() <= key);
        queue.insert(position, message);
        position == 0
    }

    pub fn peek_key(&self) -> Option<TickKey> {
        self.queue.lock().front().map(Message::sort_key)
    }

    pub fn pop(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Wait for the next deliverable message
    ///
    /// With `timeout == 0` an empty inbox returns `None` immediately. Otherwise
    /// the actor waits until its own ticks plus `timeout`; if nothing became
    /// deliverable by then its ticks are advanced to that deadline and `None`
    /// is returned.
    pub async fn next_message(
        &self,
        actor: &Actor,
        scheduler: &Scheduler,
        timeout: u64,
    ) -> Option<Message> {
        let limit = (timeout > 0).then(|| actor.ticks().saturating_add(timeout));
        loop {
            match scheduler.barrier(actor, limit) {
                Barrier::Empty => return None,
                Barrier::Ready { deadline } => return self.take_due(actor, scheduler, deadline),
                Barrier::Pending { deadline, wait } => match wait.await {
                    Ok(()) => return self.take_due(actor, scheduler, deadline),
                    // Cancelled by an earlier arrival; re-evaluate
                    Err(_) => {
                        trace!(actor_id = %actor.id(), "Inbox wait cancelled");
                        continue;
                    }
                },
            }
        }
    }

    fn take_due(&self, actor: &Actor, scheduler: &Scheduler, deadline: TickKey) -> Option<Message> {
        let mut queue = self.queue.lock();
        match queue.front() {
            Some(head) if head.sort_key() <= deadline => queue.pop_front(),
            _ => {
                drop(queue);
                scheduler.raise_ticks(actor, deadline.0);
                None
            }
        }
    }
}
