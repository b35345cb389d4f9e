//! Sender side of the signal/slot system.
//!
//! A sender embeds a [`SignalBase`] and implements [`Sender`]. Its signals are
//! ordinary methods that call [`activate`](crate::activate); the method item
//! doubles as the signal's identity. Connections are stored in the sender's
//! [`RcuList`], so activations read them without locking while connects and
//! disconnects on other threads proceed.
//!
//! # Key Types
//!
//! - [`Sender`] - Trait implemented by every type that declares signals
//! - [`SignalBase`] - Connection storage embedded in a sender
//! - [`ConnectionKind`] - How a connected slot is delivered
//! - [`ConnectOptions`] - Delivery kind plus the uniqueness flag
//! - [`DisconnectFilter`] - Which connections a disconnect removes
//! - [`SenderHandle`] - A weak, comparable reference to a sender
//!
//! # Lifetime Tracking
//!
//! Every connection to a receiver is mirrored by one back-reference in that
//! receiver's [`SlotBase`](crate::SlotBase). Whichever side is torn down first
//! uses its list to scrub the other. Lock order is always sender list, then
//! receiver list; teardown releases its own list before touching the other
//! side, so no two endpoints ever wait on each other.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use horizon_relay::{ConnectionKind, Receiver, Sender, SignalBase, SlotBase, activate, connect};
//! use parking_lot::Mutex;
//!
//! struct Slider {
//!     base: SignalBase,
//! }
//!
//! impl Sender for Slider {
//!     fn signal_base(&self) -> &SignalBase {
//!         &self.base
//!     }
//! }
//!
//! impl Slider {
//!     fn value_changed(&self, value: i32) {
//!         activate(self, Self::value_changed, (value,));
//!     }
//! }
//!
//! struct Label {
//!     base: SlotBase,
//!     text: Mutex<String>,
//! }
//!
//! impl Receiver for Label {
//!     fn slot_base(&self) -> &SlotBase {
//!         &self.base
//!     }
//! }
//!
//! impl Label {
//!     fn set_number(&self, value: i32) {
//!         *self.text.lock() = value.to_string();
//!     }
//! }
//!
//! let slider = Slider { base: SignalBase::new::<Slider>() };
//! let label = Arc::new(Label { base: SlotBase::new::<Label>(), text: Mutex::default() });
//!
//! assert!(connect(&slider, Slider::value_changed, &label, Label::set_number, ConnectionKind::Direct));
//! slider.value_changed(42);
//! assert_eq!(*label.text.lock(), "42");
//! ```

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::bento::{Bento, IntoSlot, SignalFn};
use crate::error::{ConnectError, InvocationError};
use crate::logging::{ConnectionRow, targets};
use crate::rcu_list::RcuList;
use crate::registry::{ReceiverId, SenderId, global_registry};
use crate::slot::{BackReference, Receiver, ReceiverCore, ReceiverHandle};
use crate::teacup::ArgPack;

/// Specifies how a connected slot is invoked when its signal is activated.
///
/// The policy is chosen per connection, so one activation can deliver
/// synchronously to some receivers and asynchronously to others.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Direct if the receiver lives in the activating execution context,
    /// queued otherwise.
    #[default]
    Auto,

    /// Invoke the slot immediately on the activating thread.
    Direct,

    /// Hand the invocation to the receiver's execution context and return
    /// without waiting.
    Queued,

    /// Like Queued, but block the activating thread until the slot has run.
    ///
    /// If the receiver lives in the activating context, waiting would never
    /// finish; such deliveries fall back to Direct with a warning.
    BlockingQueued,
}

/// Options for a connect request.
///
/// Any [`ConnectionKind`] converts into options with `unique` unset.
///
/// # Example
///
/// ```
/// use horizon_relay::{ConnectOptions, ConnectionKind};
///
/// let options = ConnectOptions::new(ConnectionKind::Queued).unique();
/// assert!(options.unique);
/// assert_eq!(ConnectOptions::from(ConnectionKind::Direct).kind, ConnectionKind::Direct);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Delivery policy of the new connection.
    pub kind: ConnectionKind,
    /// Refuse the connection if an identical one already exists.
    pub unique: bool,
}

impl ConnectOptions {
    /// Non-unique options with the given kind.
    pub fn new(kind: ConnectionKind) -> Self {
        Self {
            kind,
            unique: false,
        }
    }

    /// Request uniqueness.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

impl From<ConnectionKind> for ConnectOptions {
    fn from(kind: ConnectionKind) -> Self {
        Self::new(kind)
    }
}

/// One entry of a sender's connection list.
pub(crate) struct Connection {
    pub(crate) signal: Bento,
    pub(crate) receiver: Option<ReceiverHandle>,
    pub(crate) slot: Bento,
    pub(crate) kind: ConnectionKind,
}

impl Connection {
    pub(crate) fn receiver_id(&self) -> Option<ReceiverId> {
        self.receiver.as_ref().map(ReceiverHandle::id)
    }
}

/// Selects the connections a disconnect removes.
///
/// Each unset field is a wildcard; the default filter matches everything.
///
/// # Example
///
/// ```
/// use horizon_relay::DisconnectFilter;
///
/// let everything = DisconnectFilter::new();
/// assert!(everything.is_wildcard());
/// ```
#[derive(Clone, Debug, Default)]
pub struct DisconnectFilter {
    signal: Option<Bento>,
    receiver: Option<ReceiverId>,
    slot: Option<Bento>,
}

impl DisconnectFilter {
    /// A filter matching every connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only connections of this signal. A null bento is a wildcard.
    pub fn signal(mut self, signal: Bento) -> Self {
        self.signal = (!signal.is_null()).then_some(signal);
        self
    }

    /// Only connections to this receiver.
    pub fn receiver(mut self, receiver: ReceiverId) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Only connections invoking this slot. A null bento is a wildcard.
    pub fn slot(mut self, slot: Bento) -> Self {
        self.slot = (!slot.is_null()).then_some(slot);
        self
    }

    /// Whether the filter matches every connection.
    pub fn is_wildcard(&self) -> bool {
        self.signal.is_none() && self.receiver.is_none() && self.slot.is_none()
    }

    fn matches(&self, connection: &Connection) -> bool {
        self.signal.as_ref().is_none_or(|signal| *signal == connection.signal)
            && self
                .receiver
                .is_none_or(|receiver| connection.receiver_id() == Some(receiver))
            && self.slot.as_ref().is_none_or(|slot| *slot == connection.slot)
    }
}

pub(crate) struct SenderCore {
    pub(crate) id: SenderId,
    pub(crate) type_name: &'static str,
    pub(crate) connections: RcuList<Connection>,
    pub(crate) blocked: AtomicBool,
    pub(crate) torn_down: AtomicBool,
    pub(crate) in_flight: AtomicUsize,
}

impl SenderCore {
    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

/// Counts an activation as in flight for its lifetime.
pub(crate) struct InFlightGuard<'a> {
    core: &'a SenderCore,
}

impl<'a> InFlightGuard<'a> {
    pub(crate) fn new(core: &'a SenderCore) -> Self {
        core.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { core }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.core.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A weak reference to a sender.
///
/// Returned by [`current_sender`](crate::current_sender) and carried by
/// pending invocations. Holding one never keeps the sender alive.
#[derive(Clone)]
pub struct SenderHandle {
    id: SenderId,
    type_name: &'static str,
    core: Weak<SenderCore>,
}

impl SenderHandle {
    /// The sender's id.
    pub fn id(&self) -> SenderId {
        self.id
    }

    /// Type name the sender was created with.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the sender still exists and has not been torn down.
    pub fn is_alive(&self) -> bool {
        self.core.upgrade().is_some_and(|core| !core.is_torn_down())
    }

    /// Whether this handle refers to `sender`.
    pub fn is<S: Sender + ?Sized>(&self, sender: &S) -> bool {
        self.id == sender.signal_base().id()
    }
}

impl PartialEq for SenderHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SenderHandle {}

impl fmt::Debug for SenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderHandle")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Trait implemented by every type that declares signals.
///
/// # Related Types
///
/// - [`SignalBase`] - Storage returned by [`signal_base`](Self::signal_base)
/// - [`Receiver`] - The other end of a connection
pub trait Sender: Send + Sync + 'static {
    /// The embedded connection storage.
    fn signal_base(&self) -> &SignalBase;

    /// Called when a directly delivered slot panics or returns an error.
    ///
    /// The remaining connections of the activation are still delivered.
    fn on_invocation_error(&self, error: &InvocationError) {
        tracing::error!(
            target: targets::SIGNAL,
            sender = self.signal_base().type_name(),
            %error,
            "slot invocation failed"
        );
    }

    /// Called after a connection to `signal` has been made.
    fn connect_notify(&self, _signal: &Bento) {}

    /// Called after connections were removed; `None` when not restricted to a
    /// single signal.
    fn disconnect_notify(&self, _signal: Option<&Bento>) {}
}

/// Connection storage embedded in every [`Sender`].
///
/// Dropping a `SignalBase` tears it down: every connection is removed and
/// every receiver's back-reference to it is pruned.
pub struct SignalBase {
    pub(crate) core: Arc<SenderCore>,
}

impl SignalBase {
    /// Create and register a sender base for the sender type `S`.
    pub fn new<S: ?Sized + 'static>() -> Self {
        let type_name = type_name::<S>();
        let id = global_registry().register_sender(type_name);
        Self {
            core: Arc::new(SenderCore {
                id,
                type_name,
                connections: RcuList::new(),
                blocked: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// The sender's id.
    pub fn id(&self) -> SenderId {
        self.core.id
    }

    /// Type name the sender was created with.
    pub fn type_name(&self) -> &'static str {
        self.core.type_name
    }

    /// A weak handle to this sender.
    pub fn handle(&self) -> SenderHandle {
        SenderHandle {
            id: self.core.id,
            type_name: self.core.type_name,
            core: Arc::downgrade(&self.core),
        }
    }

    /// Block or unblock activation. Returns the previous state.
    ///
    /// While blocked, `activate()` delivers nothing.
    pub fn block_signals(&self, block: bool) -> bool {
        self.core.blocked.swap(block, Ordering::SeqCst)
    }

    /// Whether activation is currently blocked.
    pub fn signals_blocked(&self) -> bool {
        self.core.blocked.load(Ordering::SeqCst)
    }

    /// Number of live connections from this sender.
    pub fn connection_count(&self) -> usize {
        self.core.connections.len()
    }

    /// Number of `activate()` calls currently running on this sender.
    pub fn activations_in_flight(&self) -> usize {
        self.core.in_flight.load(Ordering::SeqCst)
    }

    /// Whether [`teardown`](Self::teardown) has run.
    pub fn is_torn_down(&self) -> bool {
        self.core.is_torn_down()
    }

    /// Connect a type-erased signal and slot.
    ///
    /// `receiver` may be `None` for a connection that is not bound to a
    /// receiver's lifetime; such connections are always delivered directly.
    pub fn connect_bento(
        &self,
        signal: Bento,
        receiver: Option<ReceiverHandle>,
        slot: Bento,
        options: ConnectOptions,
    ) -> Result<(), ConnectError> {
        if signal.is_null() {
            return Err(ConnectError::NullSignal);
        }
        if slot.is_null() {
            return Err(ConnectError::NullSlot);
        }

        let mut connections = self.core.connections.write();
        if self.core.is_torn_down() {
            return Err(ConnectError::SenderDestroyed {
                sender: self.core.type_name,
            });
        }

        let receiver_id = receiver.as_ref().map(ReceiverHandle::id);
        if options.unique
            && connections.iter().any(|existing| {
                existing.signal == signal
                    && existing.receiver_id() == receiver_id
                    && existing.slot == slot
            })
        {
            return Err(ConnectError::Duplicate {
                signal: signal.name(),
                slot: slot.name(),
            });
        }

        if let Some(handle) = &receiver {
            let Some(receiver_core) = handle.core() else {
                return Err(ConnectError::ReceiverDestroyed {
                    receiver: handle.type_name(),
                });
            };
            let mut back_refs = receiver_core.senders.write();
            if receiver_core.is_destroyed() {
                return Err(ConnectError::ReceiverDestroyed {
                    receiver: handle.type_name(),
                });
            }
            if !back_refs.iter().any(|back| back.sender == self.core.id) {
                back_refs.push_back(BackReference {
                    sender: self.core.id,
                    core: Arc::downgrade(&self.core),
                });
            }
        }

        tracing::trace!(
            target: targets::SIGNAL,
            sender = ?self.core.id,
            signal = signal.name(),
            receiver = ?receiver_id,
            slot = slot.name(),
            kind = ?options.kind,
            "connected"
        );
        connections.push_back(Connection {
            signal,
            receiver,
            slot,
            kind: options.kind,
        });
        Ok(())
    }

    /// Remove every connection matching `filter`.
    ///
    /// Returns the number of removed connections. A receiver's back-reference
    /// is pruned when its last connection from this sender goes away.
    pub fn disconnect_matching(&self, filter: &DisconnectFilter) -> usize {
        let mut connections = self.core.connections.write();

        let mut affected: Vec<(ReceiverId, Weak<ReceiverCore>)> = Vec::new();
        let removed = connections.retain(|connection| {
            if !filter.matches(connection) {
                return true;
            }
            if let Some(receiver) = &connection.receiver
                && !affected.iter().any(|(id, _)| *id == receiver.id())
            {
                affected.push((receiver.id(), receiver.weak_core()));
            }
            false
        });

        // Still under the sender lock, so no connect can slip in between the
        // check and the prune.
        for (receiver_id, receiver_core) in affected {
            let still_connected = connections
                .iter()
                .any(|connection| connection.receiver_id() == Some(receiver_id));
            if still_connected {
                continue;
            }
            if let Some(receiver_core) = receiver_core.upgrade() {
                receiver_core
                    .senders
                    .write()
                    .retain(|back| back.sender != self.core.id);
            }
        }

        if removed > 0 {
            tracing::trace!(
                target: targets::SIGNAL,
                sender = ?self.core.id,
                removed,
                "disconnected"
            );
        }
        removed
    }

    /// Sever every connection and mark the sender dead.
    ///
    /// Idempotent; called automatically on drop. When a slot calls this on
    /// the sender that is currently activating it, the running activation
    /// stops before the next connection.
    pub fn teardown(&self) {
        let mut receivers: Vec<Weak<ReceiverCore>> = Vec::new();
        let removed = {
            let mut connections = self.core.connections.write();
            if self.core.torn_down.swap(true, Ordering::SeqCst) {
                return;
            }
            let mut seen: Vec<ReceiverId> = Vec::new();
            for connection in connections.iter() {
                if let Some(receiver) = &connection.receiver
                    && !seen.contains(&receiver.id())
                {
                    seen.push(receiver.id());
                    receivers.push(receiver.weak_core());
                }
            }
            connections.clear()
        };

        for receiver in receivers {
            if let Some(receiver) = receiver.upgrade() {
                receiver
                    .senders
                    .write()
                    .retain(|back| back.sender != self.core.id);
            }
        }

        global_registry().unregister_sender(self.core.id);
        tracing::debug!(
            target: targets::SIGNAL,
            sender = ?self.core.id,
            type_name = self.core.type_name,
            removed,
            in_flight = self.activations_in_flight(),
            "sender torn down"
        );
    }

    /// Snapshot of the connection table for debugging.
    pub(crate) fn connection_rows(&self) -> Vec<ConnectionRow> {
        let reader = self.core.connections.read();
        reader
            .iter()
            .map(|connection| ConnectionRow {
                signal: connection.signal.name(),
                receiver: connection
                    .receiver
                    .as_ref()
                    .map(|receiver| (receiver.id().as_raw(), receiver.type_name())),
                slot: connection.slot.name(),
                kind: connection.kind,
            })
            .collect()
    }

    pub(crate) fn count_matching(&self, signal: &Bento) -> usize {
        let reader = self.core.connections.read();
        reader
            .iter()
            .filter(|connection| connection.signal == *signal)
            .count()
    }
}

impl Drop for SignalBase {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for SignalBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBase")
            .field("id", &self.core.id)
            .field("type_name", &self.core.type_name)
            .field("connections", &self.connection_count())
            .field("blocked", &self.signals_blocked())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

/// Connect `signal` of `sender` to `slot` of `receiver`.
///
/// `options` is a [`ConnectionKind`] or a full [`ConnectOptions`]. Returns
/// `false` if the connection was refused: a duplicate of an existing one when
/// uniqueness was requested, or an endpoint that is already torn down.
///
/// # Example
///
/// ```
/// # use std::sync::Arc;
/// # use horizon_relay::{ConnectOptions, ConnectionKind, Receiver, Sender, SignalBase, SlotBase, activate, connect};
/// # struct Timer { base: SignalBase }
/// # impl Sender for Timer { fn signal_base(&self) -> &SignalBase { &self.base } }
/// # impl Timer { fn timeout(&self) { activate(self, Self::timeout, ()); } }
/// # struct Clock { base: SlotBase }
/// # impl Receiver for Clock { fn slot_base(&self) -> &SlotBase { &self.base } }
/// # impl Clock { fn tick(&self) {} }
/// let timer = Timer { base: SignalBase::new::<Timer>() };
/// let clock = Arc::new(Clock { base: SlotBase::new::<Clock>() });
///
/// let unique = ConnectOptions::new(ConnectionKind::Auto).unique();
/// assert!(connect(&timer, Timer::timeout, &clock, Clock::tick, unique));
/// assert!(!connect(&timer, Timer::timeout, &clock, Clock::tick, unique));
/// ```
pub fn connect<S, Args, Sig, R, Slot, Marker>(
    sender: &S,
    signal: Sig,
    receiver: &Arc<R>,
    slot: Slot,
    options: impl Into<ConnectOptions>,
) -> bool
where
    S: Sender,
    Args: ArgPack,
    Sig: SignalFn<S, Args>,
    R: Receiver,
    Slot: IntoSlot<R, Args, Marker>,
{
    match try_connect(sender, signal, receiver, slot, options) {
        Ok(()) => true,
        Err(ConnectError::Duplicate { .. }) => false,
        Err(error) => {
            tracing::warn!(target: targets::SIGNAL, %error, "connect refused");
            false
        }
    }
}

/// Like [`connect`], but reports why a connection was refused.
pub fn try_connect<S, Args, Sig, R, Slot, Marker>(
    sender: &S,
    signal: Sig,
    receiver: &Arc<R>,
    slot: Slot,
    options: impl Into<ConnectOptions>,
) -> Result<(), ConnectError>
where
    S: Sender,
    Args: ArgPack,
    Sig: SignalFn<S, Args>,
    R: Receiver,
    Slot: IntoSlot<R, Args, Marker>,
{
    let signal = signal.to_bento();
    let handle = ReceiverHandle::new(receiver);
    let slot = slot.into_bento(Arc::downgrade(receiver));
    sender
        .signal_base()
        .connect_bento(signal.clone(), Some(handle), slot, options.into())?;
    sender.connect_notify(&signal);
    Ok(())
}

/// Connect `signal` to a slot that is not bound to any receiver.
///
/// Use with [`Function`](crate::Function) or [`Closure`](crate::Closure).
/// Unbound connections are always delivered directly and live until the
/// sender is torn down or they are disconnected.
pub fn connect_unbound<S, Args, Sig, Slot, Marker>(
    sender: &S,
    signal: Sig,
    slot: Slot,
    options: impl Into<ConnectOptions>,
) -> bool
where
    S: Sender,
    Args: ArgPack,
    Sig: SignalFn<S, Args>,
    Slot: IntoSlot<(), Args, Marker>,
{
    let signal = signal.to_bento();
    let slot = slot.into_bento(Weak::new());
    match sender
        .signal_base()
        .connect_bento(signal.clone(), None, slot, options.into())
    {
        Ok(()) => {
            sender.connect_notify(&signal);
            true
        }
        Err(ConnectError::Duplicate { .. }) => false,
        Err(error) => {
            tracing::warn!(target: targets::SIGNAL, %error, "connect refused");
            false
        }
    }
}

/// Remove the connection from `signal` of `sender` to `slot` of `receiver`.
///
/// Returns `true` if anything was removed.
pub fn disconnect<S, Args, Sig, R, Slot, Marker>(
    sender: &S,
    signal: Sig,
    receiver: &Arc<R>,
    slot: Slot,
) -> bool
where
    S: Sender,
    Args: ArgPack,
    Sig: SignalFn<S, Args>,
    R: Receiver,
    Slot: IntoSlot<R, Args, Marker>,
{
    let signal = signal.to_bento();
    let filter = DisconnectFilter::new()
        .signal(signal.clone())
        .receiver(receiver.slot_base().id())
        .slot(slot.slot_identity());
    notify_if_removed(sender, &filter, Some(&signal))
}

/// Remove the unbound connection from `signal` to `slot`.
pub fn disconnect_unbound<S, Args, Sig, Slot, Marker>(sender: &S, signal: Sig, slot: Slot) -> bool
where
    S: Sender,
    Args: ArgPack,
    Sig: SignalFn<S, Args>,
    Slot: IntoSlot<(), Args, Marker>,
{
    let signal = signal.to_bento();
    let filter = DisconnectFilter::new()
        .signal(signal.clone())
        .slot(slot.slot_identity());
    notify_if_removed(sender, &filter, Some(&signal))
}

/// Remove every connection of `signal`.
pub fn disconnect_signal<S, Args, Sig>(sender: &S, signal: Sig) -> bool
where
    S: Sender,
    Args: ArgPack,
    Sig: SignalFn<S, Args>,
{
    let signal = signal.to_bento();
    let filter = DisconnectFilter::new().signal(signal.clone());
    notify_if_removed(sender, &filter, Some(&signal))
}

/// Remove every connection from `sender` to `receiver`, of any signal.
pub fn disconnect_receiver<S, R>(sender: &S, receiver: &R) -> bool
where
    S: Sender,
    R: Receiver + ?Sized,
{
    let filter = DisconnectFilter::new().receiver(receiver.slot_base().id());
    notify_if_removed(sender, &filter, None)
}

/// Remove every connection of `sender`.
pub fn disconnect_all<S: Sender>(sender: &S) -> bool {
    notify_if_removed(sender, &DisconnectFilter::new(), None)
}

fn notify_if_removed<S: Sender>(
    sender: &S,
    filter: &DisconnectFilter,
    signal: Option<&Bento>,
) -> bool {
    let removed = sender.signal_base().disconnect_matching(filter) > 0;
    if removed {
        sender.disconnect_notify(signal);
    }
    removed
}

/// Whether `signal` of `sender` has at least one connection.
pub fn is_signal_connected<S, Args, Sig>(sender: &S, signal: Sig) -> bool
where
    S: Sender,
    Args: ArgPack,
    Sig: SignalFn<S, Args>,
{
    receiver_count(sender, signal) > 0
}

/// Number of connections of `signal` of `sender`.
pub fn receiver_count<S, Args, Sig>(sender: &S, signal: Sig) -> usize
where
    S: Sender,
    Args: ArgPack,
    Sig: SignalFn<S, Args>,
{
    sender.signal_base().count_matching(&signal.to_bento())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SlotBase;

    struct Button {
        base: SignalBase,
    }

    impl Sender for Button {
        fn signal_base(&self) -> &SignalBase {
            &self.base
        }
    }

    impl Button {
        fn new() -> Self {
            Self {
                base: SignalBase::new::<Self>(),
            }
        }

        fn clicked(&self, checked: bool) {
            crate::activate(self, Self::clicked, (checked,));
        }

        fn pressed(&self) {
            crate::activate(self, Self::pressed, ());
        }
    }

    struct Lamp {
        base: SlotBase,
    }

    impl Receiver for Lamp {
        fn slot_base(&self) -> &SlotBase {
            &self.base
        }
    }

    impl Lamp {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                base: SlotBase::new::<Self>(),
            })
        }

        fn toggle(&self, _on: bool) {}

        fn flash(&self) {}
    }

    #[test]
    fn test_connect_registers_back_reference() {
        let button = Button::new();
        let lamp = Lamp::new();

        assert!(connect(&button, Button::clicked, &lamp, Lamp::toggle, ConnectionKind::Direct));
        assert!(connect(&button, Button::pressed, &lamp, Lamp::flash, ConnectionKind::Direct));

        assert_eq!(button.base.connection_count(), 2);
        // Deduplicated per sender.
        assert_eq!(lamp.base.sender_count(), 1);
        assert!(is_signal_connected(&button, Button::clicked));
        assert_eq!(receiver_count(&button, Button::pressed), 1);
    }

    #[test]
    fn test_unique_connection() {
        let button = Button::new();
        let lamp = Lamp::new();
        let unique = ConnectOptions::new(ConnectionKind::Auto).unique();

        assert!(connect(&button, Button::clicked, &lamp, Lamp::toggle, unique));
        assert!(!connect(&button, Button::clicked, &lamp, Lamp::toggle, unique));
        assert!(matches!(
            try_connect(&button, Button::clicked, &lamp, Lamp::toggle, unique),
            Err(ConnectError::Duplicate { .. })
        ));
        // Non-unique requests always insert.
        assert!(connect(&button, Button::clicked, &lamp, Lamp::toggle, ConnectionKind::Auto));
        assert_eq!(button.base.connection_count(), 2);
    }

    #[test]
    fn test_null_callables_rejected() {
        let button = Button::new();
        let options = ConnectOptions::default();
        assert_eq!(
            button.base.connect_bento(Bento::null(), None, Bento::null(), options),
            Err(ConnectError::NullSignal)
        );
        let signal = SignalFn::<Button, (bool,)>::to_bento(&Button::clicked);
        assert_eq!(
            button.base.connect_bento(signal, None, Bento::null(), options),
            Err(ConnectError::NullSlot)
        );
        assert_eq!(button.base.connection_count(), 0);
    }

    #[test]
    fn test_disconnect_prunes_back_reference_on_last_connection() {
        let button = Button::new();
        let lamp = Lamp::new();
        connect(&button, Button::clicked, &lamp, Lamp::toggle, ConnectionKind::Direct);
        connect(&button, Button::pressed, &lamp, Lamp::flash, ConnectionKind::Direct);

        assert!(disconnect(&button, Button::clicked, &lamp, Lamp::toggle));
        assert!(!disconnect(&button, Button::clicked, &lamp, Lamp::toggle));
        assert_eq!(lamp.base.sender_count(), 1);

        assert!(disconnect_signal(&button, Button::pressed));
        assert_eq!(lamp.base.sender_count(), 0);
        assert!(!disconnect_all(&button));
    }

    #[test]
    fn test_disconnect_filters() {
        let button = Button::new();
        let first = Lamp::new();
        let second = Lamp::new();
        connect(&button, Button::clicked, &first, Lamp::toggle, ConnectionKind::Direct);
        connect(&button, Button::clicked, &second, Lamp::toggle, ConnectionKind::Direct);
        connect(&button, Button::pressed, &second, Lamp::flash, ConnectionKind::Direct);

        assert!(disconnect_receiver(&button, &*second));
        assert_eq!(button.base.connection_count(), 1);
        assert_eq!(second.base.sender_count(), 0);
        assert_eq!(first.base.sender_count(), 1);

        // Slot filter with wildcard receiver.
        let slot = IntoSlot::<Lamp, (bool,), _>::slot_identity(&Lamp::toggle);
        assert_eq!(button.base.disconnect_matching(&DisconnectFilter::new().slot(slot)), 1);
        assert_eq!(first.base.sender_count(), 0);
    }

    #[test]
    fn test_teardown_is_idempotent_and_scrubs_receivers() {
        let button = Button::new();
        let lamp = Lamp::new();
        connect(&button, Button::clicked, &lamp, Lamp::toggle, ConnectionKind::Direct);

        button.base.teardown();
        button.base.teardown();
        assert!(button.base.is_torn_down());
        assert_eq!(button.base.connection_count(), 0);
        assert_eq!(lamp.base.sender_count(), 0);
        assert!(!button.base.handle().is_alive());
        assert!(!global_registry().contains_sender(button.base.id()));

        assert!(matches!(
            try_connect(&button, Button::clicked, &lamp, Lamp::toggle, ConnectionKind::Auto),
            Err(ConnectError::SenderDestroyed { .. })
        ));
    }

    #[test]
    fn test_block_signals_returns_previous_state() {
        let button = Button::new();
        assert!(!button.base.block_signals(true));
        assert!(button.base.signals_blocked());
        assert!(button.base.block_signals(false));
        assert!(!button.base.signals_blocked());
    }

    #[test]
    fn test_handle_identity() {
        let button = Button::new();
        let other = Button::new();
        let handle = button.base.handle();
        assert!(handle.is(&button));
        assert!(!handle.is(&other));
        assert_eq!(handle, button.base.handle());
        assert!(handle.is_alive());
    }
}
