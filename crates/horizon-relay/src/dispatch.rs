//! Signal activation and per-connection delivery routing.
//!
//! [`activate`] walks a snapshot of the sender's connection list and picks the
//! delivery policy for each matching connection separately, so one activation
//! can run some slots in the caller's stack and post others to different
//! execution contexts.
//!
//! | Kind             | Same context       | Other context          |
//! |------------------|--------------------|------------------------|
//! | `Direct`         | call now           | call now               |
//! | `Auto`           | call now           | enqueue                |
//! | `Queued`         | enqueue            | enqueue                |
//! | `BlockingQueued` | call now (warning) | enqueue, wait          |
//!
//! Unbound connections have no context and are always called now.

use crate::bento::{Bento, SignalFn};
use crate::current;
use crate::invocation::{CompletionHandle, PendingInvocation, completion_pair};
use crate::logging::{span_names, targets};
use crate::signal::{Connection, ConnectionKind, InFlightGuard, Sender, SignalBase};
use crate::teacup::{ArgPack, TeaCup};

/// Activate `signal` of `sender` with `args`.
///
/// Call this from the body of the signal method, passing the method itself:
///
/// ```
/// # use horizon_relay::{Sender, SignalBase, activate};
/// # struct Download { base: SignalBase }
/// # impl Sender for Download { fn signal_base(&self) -> &SignalBase { &self.base } }
/// impl Download {
///     fn progress(&self, done: u64, total: u64) {
///         activate(self, Self::progress, (done, total));
///     }
/// }
/// ```
///
/// Connections are visited in insertion order. Connections made or removed
/// while the activation runs may or may not be seen by it, but a connection
/// is never seen half-built. Nothing is delivered while the sender's signals
/// are blocked or after it has been torn down; a slot that tears down the
/// sender stops the remaining deliveries of this activation.
pub fn activate<S, Args, Sig>(sender: &S, signal: Sig, args: Args)
where
    S: Sender,
    Args: ArgPack,
    Sig: SignalFn<S, Args>,
{
    let base = sender.signal_base();
    let core = &base.core;
    if core.is_torn_down() {
        return;
    }
    if base.signals_blocked() {
        tracing::trace!(
            target: targets::DISPATCH,
            sender = ?base.id(),
            "signals blocked, skipping"
        );
        return;
    }

    let signal = signal.to_bento();
    let span = tracing::trace_span!(
        target: targets::DISPATCH,
        span_names::ACTIVATE,
        sender = ?base.id(),
        signal = signal.name()
    );
    let _enter = span.enter();
    let _in_flight = InFlightGuard::new(core);

    let cup = TeaCup::borrowed(&args);
    let snapshot = core.connections.read();
    for connection in snapshot.iter() {
        if connection.signal != signal {
            continue;
        }
        if core.is_torn_down() {
            tracing::debug!(target: targets::DISPATCH, "sender torn down during activation");
            break;
        }
        deliver(sender, base, &signal, connection, &cup);
    }
}

fn deliver<S: Sender, Args: ArgPack>(
    sender: &S,
    base: &SignalBase,
    signal: &Bento,
    connection: &Connection,
    cup: &TeaCup<'_, Args>,
) {
    let Some(handle) = &connection.receiver else {
        invoke_direct(sender, base, signal, connection, cup);
        return;
    };
    let Some(receiver) = handle.object().filter(|_| handle.is_alive()) else {
        tracing::trace!(
            target: targets::DISPATCH,
            receiver = ?handle.id(),
            "receiver gone, skipping"
        );
        return;
    };

    match connection.kind {
        ConnectionKind::Direct => invoke_direct(sender, base, signal, connection, cup),
        ConnectionKind::Auto if receiver.same_execution_context() => {
            invoke_direct(sender, base, signal, connection, cup);
        }
        ConnectionKind::Auto | ConnectionKind::Queued => {
            receiver.enqueue(pending(base, signal, connection, cup, None));
        }
        ConnectionKind::BlockingQueued => {
            if receiver.same_execution_context() {
                tracing::warn!(
                    target: targets::DISPATCH,
                    receiver = ?handle.id(),
                    slot = connection.slot.name(),
                    "blocking queued connection in the receiver's own context, delivering directly"
                );
                invoke_direct(sender, base, signal, connection, cup);
                return;
            }
            let (completion, waiter) = completion_pair();
            receiver.enqueue(pending(base, signal, connection, cup, Some(completion)));
            waiter.wait();
        }
    }
}

fn invoke_direct<S: Sender, Args: ArgPack>(
    sender: &S,
    base: &SignalBase,
    signal: &Bento,
    connection: &Connection,
    cup: &TeaCup<'_, Args>,
) {
    let _frame = current::enter(base.handle(), signal.clone(), connection.receiver_id());
    if let Err(error) = connection.slot.invoke(cup.as_any()) {
        sender.on_invocation_error(&error);
    }
}

fn pending<Args: ArgPack>(
    base: &SignalBase,
    signal: &Bento,
    connection: &Connection,
    cup: &TeaCup<'_, Args>,
    completion: Option<CompletionHandle>,
) -> PendingInvocation {
    PendingInvocation::new(
        base.handle(),
        signal.clone(),
        connection.receiver.clone(),
        connection.slot.clone(),
        connection.kind,
        cup.to_erased(),
        completion,
    )
}
