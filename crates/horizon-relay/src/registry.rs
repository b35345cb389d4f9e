//! Endpoint registry for senders and receivers.
//!
//! Every [`SignalBase`](crate::SignalBase) and [`SlotBase`](crate::SlotBase)
//! is registered here on construction and removed on teardown. The registry
//! hands out generation-checked [`SenderId`] and [`ReceiverId`] keys, so an id
//! that outlives its endpoint is detectably stale instead of dangling.
//!
//! # Key Types
//!
//! - [`SenderId`] / [`ReceiverId`] - Stable endpoint identifiers
//! - [`EndpointRegistry`] - The single-threaded registry
//! - [`SharedEndpointRegistry`] - Thread-safe wrapper around it
//! - [`global_registry`] - The process-wide instance

use std::sync::OnceLock;

use parking_lot::RwLock;
use slotmap::{Key, SlotMap, new_key_type};

use crate::logging::targets;

new_key_type! {
    /// Identifier of a sender endpoint.
    ///
    /// Valid until the sender is torn down; afterwards
    /// [`SharedEndpointRegistry::contains_sender`] reports `false` for it even
    /// if its slot has been reused.
    pub struct SenderId;

    /// Identifier of a receiver endpoint.
    pub struct ReceiverId;
}

impl SenderId {
    /// Convert the id to a raw u64 value for logging or interop.
    #[inline]
    pub fn as_raw(self) -> u64 {
        self.data().as_ffi()
    }
}

impl ReceiverId {
    /// Convert the id to a raw u64 value for logging or interop.
    #[inline]
    pub fn as_raw(self) -> u64 {
        self.data().as_ffi()
    }
}

/// Data recorded per endpoint.
#[derive(Debug, Clone)]
struct EndpointData {
    type_name: &'static str,
}

/// Registry of live senders and receivers.
///
/// # Related
///
/// - [`SharedEndpointRegistry`] - Thread-safe wrapper
/// - [`global_registry`] - Access the singleton instance
#[derive(Debug)]
pub struct EndpointRegistry {
    senders: SlotMap<SenderId, EndpointData>,
    receivers: SlotMap<ReceiverId, EndpointData>,
}

impl EndpointRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            senders: SlotMap::with_key(),
            receivers: SlotMap::with_key(),
        }
    }

    /// Register a sender and return its id.
    pub fn register_sender(&mut self, type_name: &'static str) -> SenderId {
        let id = self.senders.insert(EndpointData { type_name });
        tracing::trace!(target: targets::CORE, ?id, type_name, "registered sender");
        id
    }

    /// Register a receiver and return its id.
    pub fn register_receiver(&mut self, type_name: &'static str) -> ReceiverId {
        let id = self.receivers.insert(EndpointData { type_name });
        tracing::trace!(target: targets::CORE, ?id, type_name, "registered receiver");
        id
    }

    /// Remove a sender. Returns `false` if the id was already stale.
    pub fn unregister_sender(&mut self, id: SenderId) -> bool {
        let removed = self.senders.remove(id).is_some();
        if removed {
            tracing::trace!(target: targets::CORE, ?id, "unregistered sender");
        }
        removed
    }

    /// Remove a receiver. Returns `false` if the id was already stale.
    pub fn unregister_receiver(&mut self, id: ReceiverId) -> bool {
        let removed = self.receivers.remove(id).is_some();
        if removed {
            tracing::trace!(target: targets::CORE, ?id, "unregistered receiver");
        }
        removed
    }

    /// Whether the sender is still registered.
    pub fn contains_sender(&self, id: SenderId) -> bool {
        self.senders.contains_key(id)
    }

    /// Whether the receiver is still registered.
    pub fn contains_receiver(&self, id: ReceiverId) -> bool {
        self.receivers.contains_key(id)
    }

    /// The type name a sender was registered with.
    pub fn sender_type_name(&self, id: SenderId) -> Option<&'static str> {
        self.senders.get(id).map(|data| data.type_name)
    }

    /// The type name a receiver was registered with.
    pub fn receiver_type_name(&self, id: ReceiverId) -> Option<&'static str> {
        self.receivers.get(id).map(|data| data.type_name)
    }

    /// Number of live senders.
    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A thread-safe wrapper around [`EndpointRegistry`].
///
/// Concurrent reads, exclusive writes via `RwLock`. Locks are held only for
/// the duration of a single registry call and never across a slot invocation.
#[derive(Debug, Default)]
pub struct SharedEndpointRegistry {
    inner: RwLock<EndpointRegistry>,
}

impl SharedEndpointRegistry {
    /// Create an empty shared registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender.
    pub fn register_sender(&self, type_name: &'static str) -> SenderId {
        self.inner.write().register_sender(type_name)
    }

    /// Register a receiver.
    pub fn register_receiver(&self, type_name: &'static str) -> ReceiverId {
        self.inner.write().register_receiver(type_name)
    }

    /// Remove a sender.
    pub fn unregister_sender(&self, id: SenderId) -> bool {
        self.inner.write().unregister_sender(id)
    }

    /// Remove a receiver.
    pub fn unregister_receiver(&self, id: ReceiverId) -> bool {
        self.inner.write().unregister_receiver(id)
    }

    /// Whether the sender is still registered.
    pub fn contains_sender(&self, id: SenderId) -> bool {
        self.inner.read().contains_sender(id)
    }

    /// Whether the receiver is still registered.
    pub fn contains_receiver(&self, id: ReceiverId) -> bool {
        self.inner.read().contains_receiver(id)
    }

    /// The type name a sender was registered with.
    pub fn sender_type_name(&self, id: SenderId) -> Option<&'static str> {
        self.inner.read().sender_type_name(id)
    }

    /// The type name a receiver was registered with.
    pub fn receiver_type_name(&self, id: ReceiverId) -> Option<&'static str> {
        self.inner.read().receiver_type_name(id)
    }

    /// Number of live senders.
    pub fn sender_count(&self) -> usize {
        self.inner.read().sender_count()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.inner.read().receiver_count()
    }
}

static GLOBAL_REGISTRY: OnceLock<SharedEndpointRegistry> = OnceLock::new();

/// The process-wide endpoint registry, created on first use.
pub fn global_registry() -> &'static SharedEndpointRegistry {
    GLOBAL_REGISTRY.get_or_init(SharedEndpointRegistry::new)
}
