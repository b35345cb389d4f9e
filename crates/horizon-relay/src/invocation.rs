//! Pending slot invocations for queued delivery.
//!
//! # How It Works
//!
//! 1. When `activate()` routes a connection through `Queued`,
//!    `BlockingQueued`, or an `Auto` connection whose receiver lives in another
//!    execution context, it clones the signal and slot bentos, deep-copies the
//!    arguments and packs everything into a [`PendingInvocation`].
//!
//! 2. The invocation is handed to the receiver's
//!    [`enqueue`](crate::Receiver::enqueue) hook, which usually posts it to an
//!    [`ExecutionContext`](crate::ExecutionContext).
//!
//! 3. The context calls [`PendingInvocation::run`] exactly once. For blocking
//!    delivery, the activating thread waits on a [`CompletionWaiter`] that is
//!    released when the invocation finishes or is dropped unrun.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::bento::Bento;
use crate::current;
use crate::error::InvocationError;
use crate::logging::{span_names, targets};
use crate::signal::{ConnectionKind, SenderHandle};
use crate::slot::ReceiverHandle;

/// One deferred slot call with its own copy of the arguments.
///
/// Consumed by [`run`](Self::run). Dropping it without running releases any
/// thread blocked on it.
pub struct PendingInvocation {
    sender: SenderHandle,
    signal: Bento,
    receiver: Option<ReceiverHandle>,
    slot: Bento,
    kind: ConnectionKind,
    args: Box<dyn Any + Send>,
    completion: Option<CompletionHandle>,
}

impl PendingInvocation {
    pub(crate) fn new(
        sender: SenderHandle,
        signal: Bento,
        receiver: Option<ReceiverHandle>,
        slot: Bento,
        kind: ConnectionKind,
        args: Box<dyn Any + Send>,
        completion: Option<CompletionHandle>,
    ) -> Self {
        Self {
            sender,
            signal,
            receiver,
            slot,
            kind,
            args,
            completion,
        }
    }

    /// The sender that activated the signal.
    pub fn sender(&self) -> &SenderHandle {
        &self.sender
    }

    /// Identity of the activated signal.
    pub fn signal(&self) -> &Bento {
        &self.signal
    }

    /// The slot that will run.
    pub fn slot(&self) -> &Bento {
        &self.slot
    }

    /// The receiving endpoint, if the connection has one.
    pub fn receiver(&self) -> Option<&ReceiverHandle> {
        self.receiver.as_ref()
    }

    /// Delivery kind of the originating connection.
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Whether an activating thread is blocked until this invocation finishes.
    pub fn is_blocking(&self) -> bool {
        self.completion.is_some()
    }

    /// Run the slot on the calling thread.
    ///
    /// A receiver destroyed since the invocation was queued makes this a
    /// no-op. Errors raised by the slot are returned to the caller, which is
    /// the execution context that ran it.
    pub fn run(self) -> Result<(), InvocationError> {
        let span = tracing::trace_span!(
            target: targets::DISPATCH,
            span_names::QUEUED_INVOCATION,
            slot = self.slot.name(),
            blocking = self.is_blocking()
        );
        let _enter = span.enter();

        if let Some(receiver) = &self.receiver
            && !receiver.is_alive()
        {
            tracing::trace!(target: targets::DISPATCH, "receiver destroyed before queued delivery");
            return Ok(());
        }

        let receiver_id = self.receiver.as_ref().map(ReceiverHandle::id);
        let _frame = current::enter(self.sender.clone(), self.signal.clone(), receiver_id);
        self.slot.invoke(&*self.args)
    }
}

impl fmt::Debug for PendingInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingInvocation")
            .field("sender", &self.sender.id())
            .field("signal", &self.signal.name())
            .field("receiver", &self.receiver.as_ref().map(ReceiverHandle::id))
            .field("slot", &self.slot.name())
            .field("kind", &self.kind)
            .field("blocking", &self.is_blocking())
            .finish()
    }
}

struct CompletionState {
    done: Mutex<bool>,
    condvar: Condvar,
}

/// Completes a blocking invocation when dropped.
pub struct CompletionHandle {
    inner: Arc<CompletionState>,
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.condvar.notify_all();
    }
}

/// Blocks the activating thread until a [`CompletionHandle`] is released.
pub struct CompletionWaiter {
    inner: Arc<CompletionState>,
}

impl CompletionWaiter {
    /// Wait for the invocation to complete.
    ///
    /// # Warning
    ///
    /// Waiting from inside the execution context that must run the invocation
    /// deadlocks. `activate()` detects the common case and delivers directly.
    pub fn wait(self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.condvar.wait(&mut done);
        }
    }

}

/// Create a completion handle/waiter pair for blocking invocations.
pub fn completion_pair() -> (CompletionHandle, CompletionWaiter) {
    let state = Arc::new(CompletionState {
        done: Mutex::new(false),
        condvar: Condvar::new(),
    });

    (
        CompletionHandle {
            inner: state.clone(),
        },
        CompletionWaiter { inner: state },
    )
}
