//! # Hypervisor
//!
//! Deterministic actor runtime. Actors run opaque container code, exchange
//! messages, create children, and persist their state into a content-addressed
//! state tree. Given the same initial tree and the same driver input, every run
//! produces the same state root regardless of how many workers execute it.
//!
//! ## Architecture
//!
//! ```text
//! driver ──► Hypervisor ──► Scheduler (global queue, tick index, waiters)
//!                               │
//!                               ▼
//!                 Actor ◄── Inbox (sorted by from_ticks, from_id)
//!                   │
//!                   ├── Container::on_message(ActorContext, Message)
//!                   │       send / call / spawn / storage / address book
//!                   └── commit ──► StateTree
//! ```
//!
//! ## Ordering Guarantees
//!
//! - Each actor has a logical clock (`ticks`) advanced by the work it does
//! - Messages carry the sender's ticks and id; inboxes deliver in that order
//! - A message is delivered only once no other actor can still send one that
//!   sorts before it (the tick barrier)
//! - If every actor is waiting, the lowest waiter is released (quiescence)
//!
//! ## Failure Model
//!
//! Container errors never escape their actor. A failing handler's storage and
//! address book changes are rolled back, its buffered sends are dropped, and
//! the error is reported to whoever awaits the message's [`Receipt`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use hypervisor::{ContainerRegistry, Hypervisor, Message};
//! use hypervisor_config::HypervisorConfig;
//!
//! # async fn run(containers: ContainerRegistry) -> hypervisor::Result<()> {
//! let hypervisor = Hypervisor::in_memory(containers, HypervisorConfig::default())?;
//! let counter = hypervisor.create_actor(1, Bytes::new(), Bytes::new(), vec![]).await?;
//!
//! let receipt = hypervisor.send(Message::new(counter, "increment"))?;
//! let outcome = receipt.await;
//! assert!(outcome.is_completed());
//!
//! let root = hypervisor.create_state_root().await?;
//! println!("state root {}", root);
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod address_book;
pub mod container;
pub mod context;
pub mod error;
pub mod hypervisor;
pub mod inbox;
pub mod message;
pub mod metrics;
pub mod scheduler;

mod creation;
mod runtime;

pub use actor::{Actor, ActorMeta, ActorRecord, Storage};
pub use address_book::AddressBook;
pub use container::{Container, ContainerFactory, ContainerRegistry};
pub use context::ActorContext;
pub use error::{CapabilityError, ExecutionError, HypervisorError, Result};
pub use hypervisor::Hypervisor;
pub use inbox::Inbox;
pub use message::{Message, Outcome, Receipt};
pub use metrics::{MetricsSnapshot, SystemMetrics};
pub use scheduler::{Scheduler, TickKey};

pub use types::{ActorId, StateRoot};
