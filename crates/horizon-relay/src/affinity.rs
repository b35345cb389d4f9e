//! Execution affinity for receivers.
//!
//! Auto connections are delivered directly when the activating thread runs in
//! the same execution context as the receiver, and queued otherwise. A
//! receiver's context is described by [`Affinity`]: either a plain thread
//! ([`ThreadAffinity`]) or an [`ExecutionContext`] it has been attached to.
//!
//! # Example
//!
//! ```
//! use horizon_relay::affinity::ThreadAffinity;
//!
//! let affinity = ThreadAffinity::current();
//! assert!(affinity.is_same_thread());
//!
//! let on_other = std::thread::spawn(move || affinity.is_same_thread())
//!     .join()
//!     .unwrap();
//! assert!(!on_other);
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use crate::executor::ExecutionContext;

/// Records the thread an object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    /// Affinity for the calling thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            thread_id: std::thread::current().id(),
        }
    }

    /// The thread this affinity is bound to.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether the calling thread is the bound thread.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

}

/// Where a receiver's queued slots run.
#[derive(Clone)]
pub enum Affinity {
    /// Bound to a thread with no attached executor. Queued work runs inline.
    Thread(ThreadAffinity),
    /// Attached to an execution context that queued work is posted to.
    Context(Arc<dyn ExecutionContext>),
}

impl Affinity {
    /// Whether the calling thread is inside this execution context.
    pub fn is_current(&self) -> bool {
        match self {
            Self::Thread(thread) => thread.is_same_thread(),
            Self::Context(context) => context.is_current(),
        }
    }

    /// The attached execution context, if any.
    pub fn context(&self) -> Option<&Arc<dyn ExecutionContext>> {
        match self {
            Self::Thread(_) => None,
            Self::Context(context) => Some(context),
        }
    }
}

impl Default for Affinity {
    fn default() -> Self {
        Self::Thread(ThreadAffinity::current())
    }
}

impl fmt::Debug for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread(thread) => f.debug_tuple("Thread").field(&thread.thread_id()).finish(),
            Self::Context(context) => f.debug_tuple("Context").field(&context.name()).finish(),
        }
    }
}
