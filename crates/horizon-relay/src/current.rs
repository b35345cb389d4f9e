//! Per-thread activation context.
//!
//! While a slot runs, the thread it runs on records which sender and signal
//! triggered it. Frames nest: a slot that activates another signal pushes a new
//! frame, which is popped when that inner delivery returns. The stack lives in
//! a thread-local and is empty whenever no slot is executing on the thread.
//!
//! # Example
//!
//! ```
//! use horizon_relay::current_sender;
//!
//! // Outside of any slot there is no current sender.
//! assert!(current_sender().is_none());
//! ```

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::bento::Bento;
use crate::registry::ReceiverId;
use crate::signal::SenderHandle;

struct Frame {
    sender: SenderHandle,
    signal: Bento,
    receiver: Option<ReceiverId>,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame pushed by [`enter`] when dropped.
pub(crate) struct FrameGuard {
    // Frames belong to the thread that pushed them.
    _not_send: PhantomData<*const ()>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Record that a slot of `receiver` is about to run for `signal` of `sender`.
pub(crate) fn enter(
    sender: SenderHandle,
    signal: Bento,
    receiver: Option<ReceiverId>,
) -> FrameGuard {
    FRAMES.with(|frames| {
        frames.borrow_mut().push(Frame {
            sender,
            signal,
            receiver,
        });
    });
    FrameGuard {
        _not_send: PhantomData,
    }
}

/// The sender whose activation is running the innermost slot on this thread.
pub fn current_sender() -> Option<SenderHandle> {
    FRAMES.with(|frames| frames.borrow().last().map(|frame| frame.sender.clone()))
}

/// Identity of the signal whose slot is running innermost on this thread.
pub fn current_signal() -> Option<Bento> {
    FRAMES.with(|frames| frames.borrow().last().map(|frame| frame.signal.clone()))
}

/// Number of nested slot invocations running on this thread.
pub fn activation_depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

/// The sender that triggered the innermost running slot of `receiver`.
pub(crate) fn current_sender_for(receiver: ReceiverId) -> Option<SenderHandle> {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .iter()
            .rev()
            .find(|frame| frame.receiver == Some(receiver))
            .map(|frame| frame.sender.clone())
    })
}
