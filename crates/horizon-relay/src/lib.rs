//! Thread-aware signal/slot dispatch for Horizon.
//!
//! This crate lets a *sender* announce events to any number of *receivers*
//! without either side knowing the other's concrete type:
//!
//! - **Connection lists**: an RCU list that activations walk without locking
//!   while other threads connect and disconnect
//! - **Type-erased callables**: methods, functions and closures behind one
//!   comparable handle ([`Bento`])
//! - **Argument packs**: tuples that are borrowed for direct delivery and
//!   deep-copied only for queued delivery ([`TeaCup`])
//! - **Lifetime tracking**: senders and receivers may be dropped in any order,
//!   including from inside a running slot
//! - **Delivery policies**: direct, queued, blocking queued, or chosen per
//!   connection from the receiver's execution context
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use horizon_relay::{ConnectionKind, Receiver, Sender, SignalBase, SlotBase, activate, connect};
//! use parking_lot::Mutex;
//!
//! struct Thermometer {
//!     base: SignalBase,
//! }
//!
//! impl Sender for Thermometer {
//!     fn signal_base(&self) -> &SignalBase {
//!         &self.base
//!     }
//! }
//!
//! impl Thermometer {
//!     fn reading(&self, celsius: f32, sensor: &'static str) {
//!         activate(self, Self::reading, (celsius, sensor));
//!     }
//! }
//!
//! struct Display {
//!     base: SlotBase,
//!     shown: Mutex<Option<f32>>,
//! }
//!
//! impl Receiver for Display {
//!     fn slot_base(&self) -> &SlotBase {
//!         &self.base
//!     }
//! }
//!
//! impl Display {
//!     // Takes a prefix of the signal's arguments.
//!     fn show(&self, celsius: f32) {
//!         *self.shown.lock() = Some(celsius);
//!     }
//! }
//!
//! let sensor = Thermometer { base: SignalBase::new::<Thermometer>() };
//! let display = Arc::new(Display { base: SlotBase::new::<Display>(), shown: Mutex::new(None) });
//!
//! connect(&sensor, Thermometer::reading, &display, Display::show, ConnectionKind::Auto);
//! sensor.reading(21.5, "kitchen");
//! assert_eq!(*display.shown.lock(), Some(21.5));
//! ```
//!
//! # Queued Delivery
//!
//! Attach a receiver to an [`ExecutionContext`] such as
//! [`executor::ThreadExecutor`] and its `Auto` connections from other threads
//! are posted there instead of running in the activating thread.

pub mod affinity;
mod bento;
mod current;
mod dispatch;
mod error;
pub mod executor;
mod invocation;
pub mod logging;
pub mod rcu_list;
pub mod registry;
mod signal;
mod slot;
mod teacup;

pub use affinity::{Affinity, ThreadAffinity};
pub use bento::{
    Bento, CallableKind, Closure, ClosureMarker, FreeSlot, Function, FunctionMarker, IntoSlot,
    MethodMarker, MethodSlot, SignalFn, SlotResult,
};
pub use current::{activation_depth, current_sender, current_signal};
pub use dispatch::activate;
pub use error::{BoxError, ConnectError, ContextError, InvocationError, RelayError, Result};
pub use executor::{EventQueue, ExecutionContext, ExecutorBuilder, ExecutorConfig, ThreadExecutor};
pub use invocation::{CompletionHandle, CompletionWaiter, PendingInvocation, completion_pair};
pub use logging::{ConnectionTableDebug, PerfSpan, TableFormatOptions};
pub use rcu_list::RcuList;
pub use registry::{ReceiverId, SenderId, global_registry};
pub use signal::{
    ConnectOptions, ConnectionKind, DisconnectFilter, Sender, SenderHandle, SignalBase, connect,
    connect_unbound, disconnect, disconnect_all, disconnect_receiver, disconnect_signal,
    disconnect_unbound, is_signal_connected, receiver_count, try_connect,
};
pub use slot::{Receiver, ReceiverHandle, SlotBase};
pub use teacup::{ArgPack, TeaCup, TrimTo};

static_assertions::assert_impl_all!(SignalBase: Send, Sync);
static_assertions::assert_impl_all!(SlotBase: Send, Sync);
static_assertions::assert_impl_all!(Bento: Send, Sync, Clone);
static_assertions::assert_impl_all!(SenderHandle: Send, Sync);
static_assertions::assert_impl_all!(ReceiverHandle: Send, Sync);
static_assertions::assert_impl_all!(PendingInvocation: Send);
static_assertions::assert_impl_all!(ThreadExecutor: Send, Sync);
static_assertions::assert_impl_all!(EventQueue: Send, Sync);
