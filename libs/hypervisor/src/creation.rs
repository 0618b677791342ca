//! Actor creation
//!
//! Ids are content-addressed: a child minted by `parent` with the parent's
//! current nonce is `ActorId::derive(parent, nonce)`, so the same history
//! always produces the same ids.
//!
//! Creation runs inside the creator's task:
//!
//! 1. build the container for `type_tag` from `code`
//! 2. register the actor through the instantiate-once table
//! 3. run `on_creation` with the init payload and transferred capabilities
//! 4. if the new actor bound anything (or is a root), persist its full record;
//!    otherwise drop it without ever touching the tree
//!
//! Sends made during creation are released after step 4 either way.

use crate::actor::Actor;
use crate::context::ActorContext;
use crate::error::ExecutionError;
use crate::message::Message;
use crate::runtime::Runtime;
use bytes::Bytes;
use state_core::{StatePath, StateTree};
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::ActorId;

/// Everything needed to bring one actor into existence
pub(crate) struct CreateRequest {
    pub id: ActorId,
    pub type_tag: u32,
    pub code: Bytes,
    pub payload: Bytes,
    /// Capabilities already released by the creator
    pub caps: Vec<ActorId>,
    pub from: ActorId,
    pub ticks: u64,
    pub hops: u32,
    /// Creator's chain; the new actor is pushed on top
    pub call_stack: Vec<ActorId>,
    pub task: Option<ActorId>,
    /// Persisted even without bindings
    pub rooted: bool,
}

pub(crate) struct CreationService;

impl CreationService {
    pub(crate) async fn create(
        runtime: &Arc<Runtime>,
        request: CreateRequest,
    ) -> Result<Arc<Actor>, ExecutionError> {
        let CreateRequest {
            id,
            type_tag,
            code,
            payload,
            caps,
            from,
            ticks,
            hops,
            mut call_stack,
            task,
            rooted,
        } = request;

        if runtime.tree.contains_prefix(&StatePath::actor(&id)).await? {
            return Err(ExecutionError::rejected(format!("actor {} already exists", id)));
        }
        let container = runtime.containers.instantiate(type_tag, &code)?;
        let fresh_actor = Arc::new(Actor::new(id, type_tag, code, container, ticks));
        let (actor, fresh) = runtime
            .scheduler
            .instantiate(&id, async { Ok::<_, ExecutionError>(fresh_actor) })
            .await?;
        if !fresh {
            return Err(ExecutionError::rejected(format!("actor {} already live", id)));
        }

        let mut init = Message::new(id, payload);
        init.stamp(from, ticks, hops);
        for cap in caps {
            init.attach(cap);
        }
        call_stack.push(id);

        let snapshot = actor.snapshot();
        let mut ctx = ActorContext::for_creation(actor.clone(), runtime.clone(), call_stack, hops, task);
        let result = match actor.container().on_creation(&mut ctx, &mut init).await {
            Ok(()) => ctx.settle().await,
            Err(error) => Err(error),
        };
        drop(ctx);

        let sends = match result {
            Ok(sends) => sends,
            Err(error) => {
                actor.restore(snapshot);
                runtime.scheduler.done(&id);
                warn!(
                    actor_id = %id,
                    parent = %from,
                    error = %error,
                    "Creation failed, actor discarded"
                );
                return Err(error);
            }
        };

        let reachable = rooted || actor.has_bindings();
        if reachable {
            if let Err(error) = actor.commit(runtime, true).await {
                runtime.scheduler.done(&id);
                return Err(error.into());
            }
            info!(actor_id = %id, parent = %from, type_tag, "Actor created");
        } else {
            runtime.scheduler.done(&id);
            debug!(actor_id = %id, parent = %from, "Created actor bound nothing, not persisted");
        }
        if !rooted {
            runtime.metrics.record_spawn(reachable);
        }
        actor.with_state(|state| state.book.clear_unbound());

        runtime.queue(sends, None);
        Ok(actor)
    }
}
