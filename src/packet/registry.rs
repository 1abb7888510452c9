//! Packet id to factory table.

use crate::error::RegistrationError;
use crate::packet::{Packet, PacketId, PacketType};
use crate::packets::{ClosePacket, HandshakePacket, KeepAlivePacket};
use std::collections::HashMap;
use tracing::debug;

/// Produces a fresh, empty packet ready to be decoded.
pub type PacketFactory = fn() -> Box<dyn Packet>;

#[derive(Clone, Copy)]
struct Entry {
    name: &'static str,
    factory: PacketFactory,
}

/// Mapping from packet id to the type that decodes it.
///
/// Registering an id twice replaces the earlier entry.
#[derive(Clone, Default)]
pub struct Registry {
    entries: HashMap<PacketId, Entry>,
}

fn create<P: PacketType>() -> Box<dyn Packet> {
    Box::new(P::default())
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding Handshake, Close and KeepAlive.
    pub fn with_control_packets() -> Self {
        let mut registry = Self::new();
        registry.insert(HandshakePacket::ID, "HandshakePacket", create::<HandshakePacket>);
        registry.insert(ClosePacket::ID, "ClosePacket", create::<ClosePacket>);
        registry.insert(KeepAlivePacket::ID, "KeepAlivePacket", create::<KeepAlivePacket>);
        registry
    }

    /// Register a packet type under its declared id.
    pub fn register<P: PacketType>(&mut self) -> Result<(), RegistrationError> {
        self.register_factory(P::ID, std::any::type_name::<P>(), create::<P>)
    }

    /// Register an explicit factory.
    ///
    /// Fails if the factory produces packets with a different id.
    pub fn register_factory(
        &mut self,
        id: PacketId,
        name: &'static str,
        factory: PacketFactory,
    ) -> Result<(), RegistrationError> {
        let actual = factory().id();
        if actual != id {
            return Err(RegistrationError::IdMismatch {
                name,
                declared: id,
                actual,
            });
        }
        self.insert(id, name, factory);
        Ok(())
    }

    fn insert(&mut self, id: PacketId, name: &'static str, factory: PacketFactory) {
        if let Some(previous) = self.entries.insert(id, Entry { name, factory }) {
            debug!(id, previous = previous.name, name, "Packet id re-registered");
        }
    }

    /// A new packet for `id`, or `None` if the id is unknown.
    pub fn create(&self, id: PacketId) -> Option<Box<dyn Packet>> {
        self.entries.get(&id).map(|entry| (entry.factory)())
    }

    /// Registered type name for `id`.
    pub fn name(&self, id: PacketId) -> Option<&'static str> {
        self.entries.get(&id).map(|entry| entry.name)
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(id, entry)| (id, entry.name)))
            .finish()
    }
}
