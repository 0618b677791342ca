//! Per-actor capability table
//!
//! An actor may only send to addresses it holds. Every held address is in
//! exactly one place:
//!
//! - **bound** under a name (persisted with the actor's record)
//! - **unbound** (in hand for the current message, discarded at the end of it
//!   unless stored)
//! - **attached** to an outgoing message (moved to the receiver)
//!
//! Moving an address between these places never copies it, so a capability
//! handed to another actor is gone from the sender.

use crate::error::CapabilityError;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use types::ActorId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBook {
    bindings: BTreeMap<String, ActorId>,
    #[serde(skip)]
    unbound: BTreeSet<ActorId>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted bindings
    pub fn from_bindings(bindings: BTreeMap<String, ActorId>) -> Self {
        Self {
            bindings,
            unbound: BTreeSet::new(),
        }
    }

    pub fn bindings(&self) -> &BTreeMap<String, ActorId> {
        &self.bindings
    }

    /// Any address bound under a name; decides whether a new actor is kept
    pub fn has_bindings(&self) -> bool {
        !self.bindings.is_empty()
    }

    pub fn is_unbound(&self, address: &ActorId) -> bool {
        self.unbound.contains(address)
    }

    pub fn unbound(&self) -> impl Iterator<Item = &ActorId> {
        self.unbound.iter()
    }

    /// Put an address in hand (spawned child, self address, returned slot)
    pub(crate) fn hold(&mut self, address: ActorId) {
        self.unbound.insert(address);
    }

    /// Remove an unbound address from hand
    pub(crate) fn release(&mut self, address: &ActorId) -> Result<(), CapabilityError> {
        if self.unbound.remove(address) {
            Ok(())
        } else {
            Err(CapabilityError::InvalidCapability { address: *address })
        }
    }

    /// Forget everything in hand; called when a message completes
    pub(crate) fn clear_unbound(&mut self) {
        self.unbound.clear();
    }

    /// Bind an unbound address under `name`
    ///
    /// An address previously bound under the same name goes back in hand.
    pub fn store(&mut self, name: impl Into<String>, address: ActorId) -> Result<(), CapabilityError> {
        self.release(&address)?;
        if let Some(previous) = self.bindings.insert(name.into(), address) {
            self.unbound.insert(previous);
        }
        Ok(())
    }

    /// Peek at a binding without moving it
    pub fn lookup(&self, name: &str) -> Option<ActorId> {
        self.bindings.get(name).copied()
    }

    /// Unbind `name`, putting its address in hand
    pub fn load(&mut self, name: &str) -> Result<ActorId, CapabilityError> {
        let address = self
            .bindings
            .remove(name)
            .ok_or_else(|| CapabilityError::UnknownName {
                name: name.to_string(),
            })?;
        self.unbound.insert(address);
        Ok(address)
    }

    /// Drop a binding entirely
    pub fn delete(&mut self, name: &str) -> Option<ActorId> {
        self.bindings.remove(name)
    }

    /// Move an unbound address onto an outgoing message; returns its slot
    pub fn add_address_to_message(
        &mut self,
        message: &mut Message,
        address: ActorId,
    ) -> Result<usize, CapabilityError> {
        self.release(&address)?;
        Ok(message.attach(address))
    }

    /// Take the address at `index` off an incoming message into hand
    pub fn get_address_from_message(
        &mut self,
        message: &mut Message,
        index: usize,
    ) -> Result<ActorId, CapabilityError> {
        let address = message
            .take_capability(index)
            .ok_or(CapabilityError::MissingAttachment { index })?;
        self.unbound.insert(address);
        Ok(address)
    }
}
