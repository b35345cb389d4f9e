//! Receiver side of the signal/slot system.
//!
//! A receiver embeds a [`SlotBase`] and implements [`Receiver`]. The slot base
//! remembers every sender that holds a connection to it, decides where queued
//! slots run, and on teardown erases every connection that still targets it.
//!
//! Receivers are shared through `Arc`: `connect` takes `&Arc<R>` and each
//! connection keeps only a weak reference, so connecting never extends a
//! receiver's life and a slot never runs on a receiver that is being dropped.

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::affinity::{Affinity, ThreadAffinity};
use crate::current;
use crate::executor::ExecutionContext;
use crate::invocation::PendingInvocation;
use crate::logging::targets;
use crate::rcu_list::RcuList;
use crate::registry::{ReceiverId, SenderId, global_registry};
use crate::signal::{SenderCore, SenderHandle};

/// Trait implemented by every type with slots.
///
/// Only [`slot_base`](Self::slot_base) is required. The other methods are
/// hooks with sensible defaults.
pub trait Receiver: Send + Sync + 'static {
    /// The embedded receiver state.
    fn slot_base(&self) -> &SlotBase;

    /// Whether the calling thread runs in this receiver's execution context.
    ///
    /// Decides between direct and queued delivery for `Auto` connections.
    fn same_execution_context(&self) -> bool {
        self.slot_base().same_execution_context()
    }

    /// Hand a queued invocation to this receiver's execution context.
    fn enqueue(&self, invocation: PendingInvocation) {
        self.slot_base().enqueue(invocation);
    }
}

/// A receiver's record of one sender connected to it.
pub(crate) struct BackReference {
    pub(crate) sender: SenderId,
    pub(crate) core: Weak<SenderCore>,
}

pub(crate) struct ReceiverCore {
    pub(crate) id: ReceiverId,
    pub(crate) type_name: &'static str,
    pub(crate) senders: RcuList<BackReference>,
    affinity: RwLock<Affinity>,
    destroyed: AtomicBool,
}

impl ReceiverCore {
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Receiver state embedded in every [`Receiver`].
///
/// Created with the affinity of the constructing thread. Dropping a
/// `SlotBase` tears it down.
pub struct SlotBase {
    core: Arc<ReceiverCore>,
}

impl SlotBase {
    /// Create and register a slot base for the receiver type `R`.
    pub fn new<R: ?Sized + 'static>() -> Self {
        let type_name = type_name::<R>();
        let id = global_registry().register_receiver(type_name);
        Self {
            core: Arc::new(ReceiverCore {
                id,
                type_name,
                senders: RcuList::new(),
                affinity: RwLock::new(Affinity::default()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// The receiver's id.
    pub fn id(&self) -> ReceiverId {
        self.core.id
    }

    /// Type name the receiver was created with.
    pub fn type_name(&self) -> &'static str {
        self.core.type_name
    }

    /// Number of distinct senders with at least one connection to this
    /// receiver.
    pub fn sender_count(&self) -> usize {
        self.core.senders.len()
    }

    /// Current execution affinity.
    pub fn affinity(&self) -> Affinity {
        self.core.affinity.read().clone()
    }

    /// Bind to a thread, detaching from any execution context.
    pub fn set_thread_affinity(&self, thread: ThreadAffinity) {
        *self.core.affinity.write() = Affinity::Thread(thread);
    }

    /// Run queued slots of this receiver in `context`.
    pub fn attach_context(&self, context: Arc<dyn ExecutionContext>) {
        tracing::debug!(
            target: targets::SLOT,
            receiver = ?self.core.id,
            context = context.name(),
            "attached to execution context"
        );
        *self.core.affinity.write() = Affinity::Context(context);
    }

    /// Detach from the execution context and bind to the calling thread.
    pub fn detach_context(&self) {
        *self.core.affinity.write() = Affinity::Thread(ThreadAffinity::current());
    }

    /// Whether the calling thread runs in this receiver's execution context.
    pub fn same_execution_context(&self) -> bool {
        self.core.affinity.read().is_current()
    }

    /// Default queued delivery: post to the attached context.
    ///
    /// Without an attached context there is no queue to post to, so the
    /// invocation runs on the calling thread.
    pub fn enqueue(&self, invocation: PendingInvocation) {
        let context = self.core.affinity.read().context().cloned();
        match context {
            Some(context) => {
                if let Err(error) = context.post(invocation) {
                    tracing::warn!(
                        target: targets::SLOT,
                        receiver = ?self.core.id,
                        %error,
                        "queued invocation dropped"
                    );
                }
            }
            None => {
                tracing::trace!(
                    target: targets::SLOT,
                    receiver = ?self.core.id,
                    "no execution context, running queued invocation inline"
                );
                if let Err(error) = invocation.run() {
                    tracing::error!(
                        target: targets::SLOT,
                        receiver = ?self.core.id,
                        %error,
                        "queued slot invocation failed"
                    );
                }
            }
        }
    }

    /// The sender whose signal triggered the slot of this receiver currently
    /// running on this thread.
    ///
    /// `None` outside of a slot, or when the slot was called directly rather
    /// than through a signal.
    pub fn current_sender(&self) -> Option<SenderHandle> {
        current::current_sender_for(self.core.id)
    }

    /// Whether [`teardown`](Self::teardown) has run.
    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    /// Erase every connection targeting this receiver and refuse new ones.
    ///
    /// Idempotent; called automatically on drop.
    pub fn teardown(&self) {
        let senders: Vec<(SenderId, Weak<SenderCore>)> = {
            let mut back_refs = self.core.senders.write();
            if self.core.destroyed.swap(true, Ordering::SeqCst) {
                return;
            }
            let senders = back_refs
                .iter()
                .map(|back| (back.sender, back.core.clone()))
                .collect();
            back_refs.clear();
            senders
        };

        let mut removed = 0;
        for (sender_id, sender) in &senders {
            let Some(sender) = sender.upgrade() else {
                continue;
            };
            removed += sender
                .connections
                .write()
                .retain(|connection| connection.receiver_id() != Some(self.core.id));
            tracing::trace!(target: targets::SLOT, sender = ?sender_id, "scrubbed sender");
        }

        global_registry().unregister_receiver(self.core.id);
        tracing::debug!(
            target: targets::SLOT,
            receiver = ?self.core.id,
            type_name = self.core.type_name,
            senders = senders.len(),
            removed,
            "receiver torn down"
        );
    }
}

impl Drop for SlotBase {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for SlotBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotBase")
            .field("id", &self.core.id)
            .field("type_name", &self.core.type_name)
            .field("senders", &self.sender_count())
            .field("affinity", &*self.core.affinity.read())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// A weak reference to a receiver, stored in each connection.
#[derive(Clone)]
pub struct ReceiverHandle {
    id: ReceiverId,
    type_name: &'static str,
    object: Weak<dyn Receiver>,
    core: Weak<ReceiverCore>,
}

impl ReceiverHandle {
    /// Create a handle to `receiver`.
    pub fn new<R: Receiver>(receiver: &Arc<R>) -> Self {
        let base = receiver.slot_base();
        let object: Weak<R> = Arc::downgrade(receiver);
        let object: Weak<dyn Receiver> = object;
        Self {
            id: base.core.id,
            type_name: base.core.type_name,
            object,
            core: Arc::downgrade(&base.core),
        }
    }

    /// The receiver's id.
    pub fn id(&self) -> ReceiverId {
        self.id
    }

    /// Type name the receiver was created with.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the receiver still exists and has not been torn down.
    pub fn is_alive(&self) -> bool {
        self.object.strong_count() > 0
            && self.core.upgrade().is_some_and(|core| !core.is_destroyed())
    }

    /// Upgrade to the receiver object.
    pub(crate) fn object(&self) -> Option<Arc<dyn Receiver>> {
        self.object.upgrade()
    }

    pub(crate) fn core(&self) -> Option<Arc<ReceiverCore>> {
        self.core.upgrade()
    }

    pub(crate) fn weak_core(&self) -> Weak<ReceiverCore> {
        self.core.clone()
    }
}

impl PartialEq for ReceiverHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReceiverHandle {}

impl fmt::Debug for ReceiverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverHandle")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("alive", &self.is_alive())
            .finish()
    }
}
