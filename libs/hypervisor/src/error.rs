//! Hypervisor error types
//!
//! Two layers:
//!
//! - [`ExecutionError`]: anything that goes wrong while an actor handles a
//!   message. Always recovered at actor granularity: the message's state effects
//!   are rolled back and the error is reported through its completion channel.
//! - [`HypervisorError`]: returned by driver-facing APIs only. The scheduler
//!   never aborts because of one actor.

use state_core::StateError;
use thiserror::Error;
use types::ActorId;

/// Capability bookkeeping violations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CapabilityError {
    /// Address is not currently held unbound by the actor
    #[error("Invalid capability {address}: address is not held unbound")]
    InvalidCapability { address: ActorId },

    /// No binding exists under this name
    #[error("No address bound to name '{name}'")]
    UnknownName { name: String },

    /// Incoming message has no capability at this slot (or it was already taken)
    #[error("Message carries no capability at index {index}")]
    MissingAttachment { index: usize },
}

/// Failure while executing an actor's container code
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    /// Container code raised an error
    #[error("Container trapped: {reason}")]
    Trap { reason: String },

    /// Per-message tick budget exceeded
    #[error("Tick budget exhausted: used {used}, limit {limit}")]
    OutOfTicks { used: u64, limit: u64 },

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("No container registered for type tag {type_tag}")]
    UnknownContainer { type_tag: u32 },

    #[error("Unknown actor {id}")]
    UnknownActor { id: ActorId },

    /// Envelope or host call rejected before execution
    #[error("Rejected: {reason}")]
    Rejected { reason: String },

    #[error("State tree failure: {0}")]
    State(#[from] StateError),

    /// Completion channel closed without an outcome
    #[error("Message to {to} was dropped before completing")]
    Dropped { to: ActorId },
}

impl ExecutionError {
    pub fn trap(reason: impl Into<String>) -> Self {
        Self::Trap {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Short label for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::Trap { .. } => "trap",
            Self::OutOfTicks { .. } => "out_of_ticks",
            Self::Capability(_) => "capability",
            Self::UnknownContainer { .. } => "unknown_container",
            Self::UnknownActor { .. } => "unknown_actor",
            Self::Rejected { .. } => "rejected",
            Self::State(_) => "state",
            Self::Dropped { .. } => "dropped",
        }
    }

    /// Resource exhaustion is a specialization of execution failure
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::OutOfTicks { .. })
    }
}

/// Errors surfaced to the external driver
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// Envelope failed validation and never entered a mailbox
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Actor {id} already exists")]
    ActorExists { id: ActorId },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub type Result<T, E = HypervisorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_converts() {
        let err: ExecutionError = CapabilityError::UnknownName {
            name: "parent".to_string(),
        }
        .into();
        assert_eq!(err.category(), "capability");
        assert_eq!(err.to_string(), "No address bound to name 'parent'");
    }

    #[test]
    fn test_out_of_ticks_is_resource_exhaustion() {
        let err = ExecutionError::OutOfTicks { used: 11, limit: 10 };
        assert!(err.is_resource_exhaustion());
        assert!(!ExecutionError::trap("boom").is_resource_exhaustion());
    }
}
