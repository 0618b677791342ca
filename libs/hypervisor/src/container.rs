//! Container abstraction
//!
//! A container is the code an actor runs. The hypervisor never looks inside
//! it: it hands the container an [`ActorContext`] for host calls and the
//! incoming [`Message`], and acts on the returned result.
//!
//! Containers are stateless from the hypervisor's point of view. Everything
//! that must survive a message goes through the context's storage or address
//! book, which the hypervisor snapshots, commits, and rolls back.
//!
//! A [`ContainerRegistry`] maps the numeric type tag stored in an actor's
//! record to a factory that builds the container from the actor's code.

use crate::context::ActorContext;
use crate::error::ExecutionError;
use crate::message::Message;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Code executed on behalf of an actor
///
/// Handlers take `&self` so the same container may be re-entered by a
/// synchronous call that loops back to this actor.
#[async_trait]
pub trait Container: Send + Sync {
    /// Runs once when the actor is created; `message` carries the init payload
    async fn on_creation(
        &self,
        ctx: &mut ActorContext,
        message: &mut Message,
    ) -> Result<(), ExecutionError>;

    /// Handle one message; the returned bytes are the reply to a sync caller
    async fn on_message(
        &self,
        ctx: &mut ActorContext,
        message: &mut Message,
    ) -> Result<Bytes, ExecutionError>;

    /// Runs whenever the actor is loaded back from the state tree
    async fn on_startup(&self, _ctx: &mut ActorContext) -> Result<(), ExecutionError> {
        Ok(())
    }
}

/// Builds a container from an actor's code
pub trait ContainerFactory: Send + Sync {
    fn instantiate(&self, code: &Bytes) -> Result<Arc<dyn Container>, ExecutionError>;
}

impl<F> ContainerFactory for F
where
    F: Fn(&Bytes) -> Result<Arc<dyn Container>, ExecutionError> + Send + Sync,
{
    fn instantiate(&self, code: &Bytes) -> Result<Arc<dyn Container>, ExecutionError> {
        self(code)
    }
}

/// Type tag to factory table
#[derive(Default, Clone)]
pub struct ContainerRegistry {
    factories: HashMap<u32, Arc<dyn ContainerFactory>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; replaces any previous one for the tag
    pub fn register(&mut self, type_tag: u32, factory: impl ContainerFactory + 'static) -> &mut Self {
        self.factories.insert(type_tag, Arc::new(factory));
        self
    }

    /// Register a container that ignores its code and is shared by all actors
    pub fn register_shared(&mut self, type_tag: u32, container: Arc<dyn Container>) -> &mut Self {
        self.register(type_tag, move |_: &Bytes| {
            Ok::<_, ExecutionError>(Arc::clone(&container))
        })
    }

    pub fn contains(&self, type_tag: u32) -> bool {
        self.factories.contains_key(&type_tag)
    }

    pub fn instantiate(&self, type_tag: u32, code: &Bytes) -> Result<Arc<dyn Container>, ExecutionError> {
        self.factories
            .get(&type_tag)
            .ok_or(ExecutionError::UnknownContainer { type_tag })?
            .instantiate(code)
    }
}

impl fmt::Debug for ContainerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.factories.keys().collect();
        tags.sort();
        f.debug_struct("ContainerRegistry").field("type_tags", &tags).finish()
    }
}
