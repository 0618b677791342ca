//! Tick-based scheduler
//!
//! Owns everything the hypervisor needs to decide *when* an actor may run:
//!
//! - the registry of live actors, indexed by `(ticks, id)`
//! - the global queue of messages waiting to be routed to mailboxes
//! - the running set (actors executing or able to make progress)
//! - the sorted list of actors waiting for the tick barrier
//! - the instantiate-once table for actors being loaded or created
//!
//! # Tick Barrier
//!
//! An actor may deliver the message at the head of its inbox, stamped
//! `(from_ticks, from_id)`, once every *other* registered actor and every
//! message still in the global queue is strictly past `from_ticks`. Nothing can
//! then produce a message that sorts before it. An actor sitting exactly at
//! `from_ticks` could still send at that tick, or spawn a child that does, so
//! equal ticks do not count.
//!
//! When no actor is running, nothing is queued, and at least one actor is
//! waiting, the system is quiescent: the waiter with the lowest
//! `(from_ticks, from_id)` has its ticks forced up to that tick and is
//! released. This is also how ties at the same tick are broken, in key order.
//!
//! # Idle
//!
//! The drain loop routes queued messages one at a time. When the queue is
//! empty and no actor loop is active, every registered actor is shut down
//! (persisting its metadata), the registry is cleared, and idle watchers are
//! notified exactly once.
//!
//! # Locking
//!
//! All bookkeeping sits behind one mutex that is never held across `.await`.
//! When an inbox is inspected under it, the order is always scheduler then
//! inbox.

use crate::actor::Actor;
use crate::message::{Message, Outcome};
use crate::metrics::SystemMetrics;
use crate::runtime::Runtime;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Notify, OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use types::ActorId;

/// `(ticks, id)` ordering key shared by messages and actors
pub type TickKey = (u64, ActorId);

/// Answer to "may this actor deliver now?"
#[derive(Debug)]
pub enum Barrier {
    /// Inbox empty and no timeout requested
    Empty,
    /// Everything up to `deadline` is safe to deliver
    Ready { deadline: TickKey },
    /// Registered as a waiter. `Ok` means the barrier reached `deadline`;
    /// a closed channel means an earlier message arrived
    Pending {
        deadline: TickKey,
        wait: oneshot::Receiver<()>,
    },
}

struct Waiter {
    /// Release order under quiescence
    key: TickKey,
    /// Ready once the floor reaches this tick
    threshold: u64,
    id: ActorId,
    sender: oneshot::Sender<()>,
}

enum Step {
    Dispatch(Message),
    Sleep,
    Idle(Vec<Arc<Actor>>),
}

#[derive(Default)]
struct SchedulerState {
    pending: VecDeque<Message>,
    /// `from_ticks` of messages popped but not yet in an inbox
    dispatching: Vec<u64>,
    actors: HashMap<ActorId, Arc<Actor>>,
    ticks: BTreeSet<TickKey>,
    running: HashSet<ActorId>,
    active: HashSet<ActorId>,
    loading: HashMap<ActorId, Arc<OnceCell<Arc<Actor>>>>,
    waits: Vec<Waiter>,
    draining: bool,
}

impl SchedulerState {
    fn is_registered(&self, actor: &Actor) -> bool {
        self.actors
            .get(&actor.id())
            .is_some_and(|registered| std::ptr::eq(registered.as_ref(), actor))
    }

    fn register(&mut self, actor: Arc<Actor>) {
        let id = actor.id();
        if self.actors.contains_key(&id) {
            return;
        }
        self.ticks.insert((actor.ticks(), id));
        self.actors.insert(id, actor);
    }

    fn unregister(&mut self, id: &ActorId) -> Option<Arc<Actor>> {
        let actor = self.actors.remove(id)?;
        self.ticks.remove(&(actor.ticks(), *id));
        self.running.remove(id);
        self.active.remove(id);
        Some(actor)
    }

    fn set_ticks(&mut self, actor: &Actor, ticks: u64) {
        if self.is_registered(actor) {
            self.ticks.remove(&(actor.ticks(), actor.id()));
            self.ticks.insert((ticks, actor.id()));
        }
        actor.store_ticks(ticks);
    }

    /// Lowest ticks among registered actors other than `exclude`
    fn least_ticks(&self, exclude: &ActorId) -> Option<u64> {
        self.ticks
            .iter()
            .find(|(_, id)| id != exclude)
            .map(|(ticks, _)| *ticks)
    }

    /// Earliest tick at which anything other than `exclude` may still send
    fn floor(&self, exclude: &ActorId) -> Option<u64> {
        let in_transit = self
            .pending
            .iter()
            .map(Message::from_ticks)
            .chain(self.dispatching.iter().copied())
            .min();
        match (self.least_ticks(exclude), in_transit) {
            (Some(actors), Some(queued)) => Some(actors.min(queued)),
            (actors, queued) => actors.or(queued),
        }
    }

    fn is_ready(&self, exclude: &ActorId, threshold: u64) -> bool {
        self.floor(exclude).map_or(true, |floor| floor >= threshold)
    }

    fn add_waiter(&mut self, id: ActorId, key: TickKey, threshold: u64) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        self.running.remove(&id);
        let position = self
            .waits
            .partition_point(|waiter| (waiter.key, waiter.id) <= (key, id));
        self.waits.insert(
            position,
            Waiter {
                key,
                threshold,
                id,
                sender,
            },
        );
        receiver
    }

    /// Drop the waiter for `id` (its receiver sees a closed channel)
    fn cancel_wait(&mut self, id: &ActorId) {
        let before = self.waits.len();
        self.waits.retain(|waiter| waiter.id != *id);
        if self.waits.len() != before {
            self.running.insert(*id);
        }
    }

    fn is_quiescent(&self) -> bool {
        self.running.is_empty()
            && self.pending.is_empty()
            && self.dispatching.is_empty()
            && self.loading.is_empty()
    }

    fn check_waits(&mut self, metrics: &SystemMetrics) {
        loop {
            let mut index = 0;
            while index < self.waits.len() {
                let waiter = &self.waits[index];
                if self.is_ready(&waiter.id, waiter.threshold) {
                    let waiter = self.waits.remove(index);
                    self.running.insert(waiter.id);
                    let _ = waiter.sender.send(());
                } else {
                    index += 1;
                }
            }

            if self.waits.is_empty() || !self.is_quiescent() {
                break;
            }

            // Nobody can produce an earlier message: release the lowest waiter
            let waiter = self.waits.remove(0);
            if let Some(actor) = self.actors.get(&waiter.id).cloned() {
                if actor.ticks() < waiter.key.0 {
                    self.set_ticks(&actor, waiter.key.0);
                }
            }
            debug!(
                actor_id = %waiter.id,
                ticks = waiter.key.0,
                "Quiescent: releasing lowest waiter"
            );
            metrics.record_quiescence();
            self.running.insert(waiter.id);
            let _ = waiter.sender.send(());
        }

        if self.waits.is_empty() && self.is_quiescent() && !self.active.is_empty() {
            warn!(
                active = self.active.len(),
                "No actor can make progress: every active actor is suspended in a call"
            );
        }
    }

    fn finish_dispatch(&mut self, from_ticks: u64) {
        if let Some(index) = self.dispatching.iter().position(|t| *t == from_ticks) {
            self.dispatching.swap_remove(index);
        }
    }

    fn take_registry(&mut self) -> Vec<Arc<Actor>> {
        let mut actors: Vec<_> = self.actors.drain().map(|(_, actor)| actor).collect();
        actors.sort_by_key(|actor| actor.id());
        self.ticks.clear();
        self.running.clear();
        self.waits.clear();
        actors
    }
}

/// Tick-ordered scheduler for one hypervisor instance
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    wake: Notify,
    idle: watch::Sender<u64>,
    workers: Arc<Semaphore>,
    metrics: Arc<SystemMetrics>,
}

impl Scheduler {
    pub fn new(workers: usize, metrics: Arc<SystemMetrics>) -> Self {
        let (idle, _) = watch::channel(0);
        Self {
            state: Mutex::new(SchedulerState::default()),
            wake: Notify::new(),
            idle,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            metrics,
        }
    }

    /// Live actor by id
    pub fn actor(&self, id: &ActorId) -> Option<Arc<Actor>> {
        self.state.lock().actors.get(id).cloned()
    }

    /// Number of registered actors
    pub fn registered(&self) -> usize {
        self.state.lock().actors.len()
    }

    pub fn is_draining(&self) -> bool {
        self.state.lock().draining
    }

    /// Minimum ticks over registered actors other than `exclude`
    ///
    /// `u64::MAX` when no other actor is registered.
    pub fn least_number_of_ticks(&self, exclude: &ActorId) -> u64 {
        self.state
            .lock()
            .least_ticks(exclude)
            .unwrap_or(u64::MAX)
    }

    /// Resolve once every other actor has reached `threshold`, or the system
    /// goes quiescent with this as the lowest waiter
    pub async fn wait(&self, threshold: u64, id: ActorId) {
        let receiver = {
            let mut state = self.state.lock();
            if state.is_ready(&id, threshold) {
                return;
            }
            let receiver = state.add_waiter(id, (threshold, ActorId::ROOT), threshold);
            state.check_waits(&self.metrics);
            receiver
        };
        let _ = receiver.await;
    }

    /// Raise an actor's ticks; ticks never move backwards
    pub fn raise_ticks(&self, actor: &Actor, ticks: u64) {
        let mut state = self.state.lock();
        if ticks <= actor.ticks() {
            return;
        }
        state.set_ticks(actor, ticks);
        state.check_waits(&self.metrics);
    }

    /// Remove an actor from the registry without shutting it down
    pub fn done(&self, id: &ActorId) {
        let mut state = self.state.lock();
        if state.unregister(id).is_some() {
            debug!(actor_id = %id, "Actor released from registry");
        }
        state.check_waits(&self.metrics);
        drop(state);
        self.wake.notify_one();
    }

    /// Unregister `id` right away unless a run is in progress
    pub(crate) fn release_if_idle(&self, id: &ActorId) {
        let mut state = self.state.lock();
        if !state.draining && !state.active.contains(id) {
            state.unregister(id);
        }
    }

    /// Add actors directly to the registry
    pub(crate) fn register(&self, actor: Arc<Actor>) {
        let mut state = self.state.lock();
        state.register(actor);
        state.check_waits(&self.metrics);
    }

    pub(crate) fn barrier(&self, actor: &Actor, limit: Option<u64>) -> Barrier {
        let id = actor.id();
        let mut state = self.state.lock();
        let head = actor.inbox().peek_key();
        let deadline = match (head, limit.map(|ticks| (ticks, ActorId::EXTERNAL))) {
            (None, None) => return Barrier::Empty,
            (Some(head), None) => head,
            (None, Some(limit)) => limit,
            (Some(head), Some(limit)) => head.min(limit),
        };
        // Strictly past the deadline tick
        let threshold = deadline.0.saturating_add(1);
        if state.is_ready(&id, threshold) {
            return Barrier::Ready { deadline };
        }
        let wait = state.add_waiter(id, deadline, threshold);
        state.check_waits(&self.metrics);
        Barrier::Pending { deadline, wait }
    }

    /// The actor's task blocked on something other than the barrier
    pub(crate) fn suspend(&self, id: &ActorId) {
        let mut state = self.state.lock();
        state.running.remove(id);
        state.check_waits(&self.metrics);
    }

    pub(crate) fn resume(&self, id: &ActorId) {
        let mut state = self.state.lock();
        if state.active.contains(id) {
            state.running.insert(*id);
        }
    }

    /// Stop an actor loop if its inbox is still empty
    pub(crate) fn retire(&self, actor: &Actor) -> bool {
        let id = actor.id();
        let mut state = self.state.lock();
        if !actor.inbox().is_empty() {
            return false;
        }
        state.active.remove(&id);
        state.running.remove(&id);
        state.check_waits(&self.metrics);
        drop(state);
        self.wake.notify_one();
        true
    }

    pub(crate) async fn acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        self.workers.clone().acquire_owned().await.ok()
    }

    /// Queue messages for routing, optionally suspending the sender's task
    /// in the same step so the system cannot look quiescent in between
    pub(crate) fn enqueue(
        &self,
        runtime: &Arc<Runtime>,
        messages: Vec<Message>,
        suspend: Option<ActorId>,
    ) {
        let mut state = self.state.lock();
        state.pending.extend(messages);
        if let Some(id) = suspend {
            state.running.remove(&id);
        }
        if !state.draining && !state.pending.is_empty() {
            state.draining = true;
            tokio::spawn(Self::drain(runtime.clone()));
        }
        state.check_waits(&self.metrics);
        drop(state);
        self.wake.notify_one();
    }

    /// Idle watcher, or `None` if the scheduler is already idle
    pub(crate) fn idle_watcher(&self) -> Option<watch::Receiver<u64>> {
        let state = self.state.lock();
        state.draining.then(|| self.idle.subscribe())
    }

    /// Load or create `id` at most once
    ///
    /// Concurrent callers share one `init`; the boolean is true only for the
    /// caller whose `init` produced the actor, which is then registered.
    pub(crate) async fn instantiate<F, E>(
        &self,
        id: &ActorId,
        init: F,
    ) -> Result<(Arc<Actor>, bool), E>
    where
        F: Future<Output = Result<Arc<Actor>, E>>,
    {
        let cell = {
            let mut state = self.state.lock();
            if let Some(actor) = state.actors.get(id) {
                return Ok((actor.clone(), false));
            }
            state
                .loading
                .entry(*id)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let mut fresh = false;
        let flag = &mut fresh;
        let result = cell
            .get_or_try_init(move || async move {
                let actor = init.await?;
                *flag = true;
                Ok(actor)
            })
            .await
            .map(Arc::clone);

        let mut state = self.state.lock();
        if state
            .loading
            .get(id)
            .is_some_and(|loading| Arc::ptr_eq(loading, &cell))
            && (fresh || result.is_err())
        {
            state.loading.remove(id);
        }
        if let Ok(actor) = &result {
            if fresh {
                state.register(actor.clone());
            }
        }
        state.check_waits(&self.metrics);
        result.map(|actor| (actor, fresh))
    }

    async fn drain(runtime: Arc<Runtime>) {
        let scheduler = &runtime.scheduler;
        debug!("Drain loop started");
        loop {
            let step = {
                let mut state = scheduler.state.lock();
                if let Some(message) = state.pending.pop_front() {
                    state.dispatching.push(message.from_ticks());
                    Step::Dispatch(message)
                } else if state.dispatching.is_empty()
                    && state.active.is_empty()
                    && state.loading.is_empty()
                {
                    Step::Idle(state.take_registry())
                } else {
                    Step::Sleep
                }
            };

            match step {
                Step::Dispatch(message) => scheduler.dispatch(&runtime, message).await,
                Step::Sleep => scheduler.wake.notified().await,
                Step::Idle(actors) => {
                    let count = actors.len();
                    for actor in actors {
                        actor.shutdown(&runtime).await;
                    }
                    scheduler.metrics.record_shutdown(count as u64);

                    let mut state = scheduler.state.lock();
                    if state.pending.is_empty() {
                        state.draining = false;
                        scheduler.idle.send_modify(|epoch| *epoch += 1);
                        scheduler.metrics.record_idle();
                        info!(actors_shutdown = count, "Hypervisor idle");
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, runtime: &Arc<Runtime>, message: Message) {
        let to = message.to();
        match runtime.resolve(&to).await {
            Ok(actor) => self.deliver(runtime, actor, message),
            Err(error) => {
                warn!(
                    actor_id = %to,
                    error = %error,
                    category = error.category(),
                    "Destination unavailable, failing message"
                );
                let ticks = message.from_ticks();
                runtime.complete(message, Outcome::Failed { error, ticks });
                let mut state = self.state.lock();
                state.finish_dispatch(ticks);
                state.check_waits(&self.metrics);
            }
        }
    }

    fn deliver(&self, runtime: &Arc<Runtime>, actor: Arc<Actor>, message: Message) {
        let id = actor.id();
        let mut state = self.state.lock();
        state.finish_dispatch(message.from_ticks());
        let became_head = actor.inbox().push(message);
        if state.active.insert(id) {
            state.running.insert(id);
            tokio::spawn(Actor::run_loop(actor, runtime.clone()));
        } else if became_head {
            state.cancel_wait(&id);
        }
        state.check_waits(&self.metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::idle_actor;
    use std::time::Duration;

    fn scheduler() -> Scheduler {
        Scheduler::new(2, Arc::new(SystemMetrics::default()))
    }

    #[test]
    fn test_least_ticks_excludes_self() {
        let scheduler = scheduler();
        let a = idle_actor(1, 5);
        let b = idle_actor(2, 9);

        assert_eq!(scheduler.least_number_of_ticks(&a.id()), u64::MAX);
        scheduler.register(a.clone());
        assert_eq!(scheduler.least_number_of_ticks(&a.id()), u64::MAX);
        scheduler.register(b.clone());
        assert_eq!(scheduler.least_number_of_ticks(&a.id()), 9);
        assert_eq!(scheduler.least_number_of_ticks(&b.id()), 5);
    }

    #[test]
    fn test_raise_ticks_never_lowers() {
        let scheduler = scheduler();
        let a = idle_actor(1, 5);
        let b = idle_actor(2, 0);
        scheduler.register(a.clone());
        scheduler.register(b.clone());

        scheduler.raise_ticks(&a, 3);
        assert_eq!(a.ticks(), 5);
        scheduler.raise_ticks(&a, 12);
        assert_eq!(a.ticks(), 12);
        assert_eq!(scheduler.least_number_of_ticks(&b.id()), 12);
    }

    #[tokio::test]
    async fn test_wait_resolves_when_others_advance() {
        let scheduler = Arc::new(scheduler());
        let a = idle_actor(1, 0);
        let b = idle_actor(2, 0);
        scheduler.register(a.clone());
        scheduler.register(b.clone());
        // Keep b running so quiescence cannot kick in
        scheduler.resume_for_test(&b.id());

        let waiting = {
            let scheduler = scheduler.clone();
            let id = a.id();
            tokio::spawn(async move { scheduler.wait(10, id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        scheduler.raise_ticks(&b, 10);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_quiescence_releases_lowest_waiter_first() {
        let scheduler = Arc::new(scheduler());
        let a = idle_actor(1, 0);
        let b = idle_actor(2, 0);
        scheduler.register(a.clone());
        scheduler.register(b.clone());
        scheduler.resume_for_test(&a.id());
        scheduler.resume_for_test(&b.id());

        let wait_b = {
            let scheduler = scheduler.clone();
            let id = b.id();
            tokio::spawn(async move { scheduler.wait(20, id).await })
        };
        let wait_a = {
            let scheduler = scheduler.clone();
            let id = a.id();
            tokio::spawn(async move { scheduler.wait(10, id).await })
        };

        // Both waiting, nothing running: a (threshold 10) goes first
        tokio::time::timeout(Duration::from_secs(1), wait_a)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.ticks(), 10);
        assert!(!wait_b.is_finished());

        // a stops running; b is now the only waiter
        scheduler.suspend(&a.id());
        tokio::time::timeout(Duration::from_secs(1), wait_b)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.ticks(), 20);
    }

    #[tokio::test]
    async fn test_done_unblocks_waiters() {
        let scheduler = Arc::new(scheduler());
        let a = idle_actor(1, 0);
        let b = idle_actor(2, 0);
        scheduler.register(a.clone());
        scheduler.register(b.clone());
        scheduler.resume_for_test(&a.id());
        scheduler.resume_for_test(&b.id());

        let waiting = {
            let scheduler = scheduler.clone();
            let id = a.id();
            tokio::spawn(async move { scheduler.wait(50, id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        scheduler.done(&b.id());
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scheduler.registered(), 1);
        assert_eq!(a.ticks(), 0);
    }

    #[tokio::test]
    async fn test_instantiate_runs_init_once() {
        let scheduler = scheduler();
        let a = idle_actor(1, 0);

        let (first, fresh) = scheduler
            .instantiate(&a.id(), async { Ok::<_, ()>(a.clone()) })
            .await
            .unwrap();
        assert!(fresh);
        assert!(Arc::ptr_eq(&first, &a));

        let (second, fresh) = scheduler
            .instantiate(&a.id(), async { Err::<Arc<Actor>, ()>(()) })
            .await
            .unwrap();
        assert!(!fresh);
        assert!(Arc::ptr_eq(&second, &a));
        assert_eq!(scheduler.registered(), 1);
    }

    impl Scheduler {
        /// Mark an actor active and running as if its loop had started
        fn resume_for_test(&self, id: &ActorId) {
            let mut state = self.state.lock();
            state.active.insert(*id);
            state.running.insert(*id);
        }
    }
}
