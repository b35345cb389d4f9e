//! Execution contexts that run queued slot invocations.
//!
//! A receiver attached to an [`ExecutionContext`] (see
//! [`SlotBase::attach_context`](crate::SlotBase::attach_context)) gets its
//! queued slots posted there. Two contexts are provided:
//!
//! - [`ThreadExecutor`] - A dedicated thread draining a bounded queue
//! - [`EventQueue`] - A queue pumped by its owning thread, the way a GUI
//!   event loop drains posted events
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use horizon_relay::executor::ThreadExecutor;
//!
//! let executor = Arc::new(ThreadExecutor::builder().name("io").build().unwrap());
//! // receiver.slot_base().attach_context(executor.clone());
//! executor.stop();
//! executor.join();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use parking_lot::Mutex;

use crate::affinity::ThreadAffinity;
use crate::error::ContextError;
use crate::invocation::PendingInvocation;
use crate::logging::{span_names, targets};

/// Default capacity of a [`ThreadExecutor`]'s queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// How often an idle executor thread rechecks its running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Somewhere queued slot invocations can be sent to run.
///
/// Implement this to plug the dispatcher into an existing event loop or
/// runtime.
pub trait ExecutionContext: Send + Sync {
    /// Queue an invocation. It must eventually be run or dropped.
    fn post(&self, invocation: PendingInvocation) -> Result<(), ContextError>;

    /// Whether the calling thread is the one this context runs work on.
    fn is_current(&self) -> bool;

    /// Name for diagnostics.
    fn name(&self) -> &str;
}

fn run_logged(context: &str, invocation: PendingInvocation) {
    if let Err(error) = invocation.run() {
        tracing::error!(
            target: targets::EXECUTOR,
            context,
            %error,
            "queued slot invocation failed"
        );
    }
}

/// Configuration for a [`ThreadExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Name of the executor thread.
    pub name: String,
    /// Stack size in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
    /// Capacity of the invocation queue.
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "horizon-relay-executor".to_string(),
            stack_size: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ExecutorConfig {
    /// Default configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Builder for [`ThreadExecutor`].
#[derive(Debug, Default)]
pub struct ExecutorBuilder {
    config: ExecutorConfig,
}

impl ExecutorBuilder {
    /// Builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the thread's stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Set the queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Spawn the executor thread.
    pub fn build(self) -> Result<ThreadExecutor, ContextError> {
        ThreadExecutor::with_config(self.config)
    }
}

struct ExecutorState {
    running: AtomicBool,
    pending: AtomicUsize,
    completed: AtomicUsize,
}

/// A dedicated thread that runs queued invocations in arrival order.
///
/// Stopping lets the thread finish everything already queued before it exits.
/// Dropping the executor stops it without waiting.
pub struct ThreadExecutor {
    name: String,
    sender: Sender<PendingInvocation>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    // Held across the running check and the send in `post`, and across the
    // flip in `stop`, so nothing lands in the queue after the final drain.
    gate: Mutex<()>,
    state: Arc<ExecutorState>,
}

impl ThreadExecutor {
    /// Spawn an executor with default settings.
    pub fn new() -> Result<Self, ContextError> {
        Self::with_config(ExecutorConfig::default())
    }

    /// A builder for custom settings.
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// Spawn an executor with `config`.
    pub fn with_config(config: ExecutorConfig) -> Result<Self, ContextError> {
        let (sender, receiver) = bounded(config.queue_capacity);
        let state = Arc::new(ExecutorState {
            running: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        });

        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_state = state.clone();
        let thread_name = config.name.clone();
        let handle = builder
            .spawn(move || executor_loop(&thread_name, receiver, &thread_state))
            .map_err(|source| ContextError::Spawn {
                name: config.name.clone(),
                source,
            })?;

        tracing::debug!(target: targets::EXECUTOR, name = %config.name, "executor started");
        Ok(Self {
            name: config.name,
            sender,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
            gate: Mutex::new(()),
            state,
        })
    }

    /// Whether the executor still accepts work.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Invocations queued but not yet run.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Invocations run so far.
    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::Acquire)
    }

    /// Refuse new work and let the thread exit once the queue is empty.
    pub fn stop(&self) {
        let _gate = self.gate.lock();
        if self.state.running.swap(false, Ordering::AcqRel) {
            tracing::debug!(target: targets::EXECUTOR, name = %self.name, "executor stopping");
        }
    }

    /// Wait for the thread to exit. Returns `false` if already joined or the
    /// thread panicked.
    ///
    /// Call [`stop`](Self::stop) first.
    pub fn join(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => handle.join().is_ok(),
            None => false,
        }
    }

    /// Stop and wait for the thread to exit.
    pub fn stop_and_join(&self) -> bool {
        self.stop();
        self.join()
    }
}

impl ExecutionContext for ThreadExecutor {
    fn post(&self, invocation: PendingInvocation) -> Result<(), ContextError> {
        let _gate = self.gate.lock();
        if !self.is_running() {
            return Err(ContextError::Stopped {
                name: self.name.clone(),
            });
        }
        self.state.pending.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(invocation) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.state.pending.fetch_sub(1, Ordering::AcqRel);
                let name = self.name.clone();
                match error {
                    TrySendError::Full(_) => Err(ContextError::QueueFull { name }),
                    TrySendError::Disconnected(_) => Err(ContextError::Stopped { name }),
                }
            }
        }
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn executor_loop(name: &str, receiver: Receiver<PendingInvocation>, state: &ExecutorState) {
    let span = tracing::debug_span!(target: targets::EXECUTOR, span_names::EXECUTOR, name);
    let _enter = span.enter();

    let run = |invocation: PendingInvocation| {
        run_logged(name, invocation);
        state.pending.fetch_sub(1, Ordering::AcqRel);
        state.completed.fetch_add(1, Ordering::AcqRel);
    };

    while state.running.load(Ordering::Acquire) {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(invocation) => run(invocation),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        }
    }

    // Finish what was accepted before the stop.
    while let Ok(invocation) = receiver.try_recv() {
        run(invocation);
    }
    tracing::debug!(target: targets::EXECUTOR, "executor stopped");
}

/// A queue of invocations drained explicitly by its owning thread.
///
/// Models a GUI-style event loop: other threads post, and the owner calls
/// [`process_pending`](Self::process_pending) from its loop.
///
/// # Example
///
/// ```
/// use horizon_relay::executor::{EventQueue, ExecutionContext};
///
/// let queue = EventQueue::new("main");
/// assert!(queue.is_current());
/// assert_eq!(queue.process_pending().unwrap(), 0);
/// ```
pub struct EventQueue {
    name: String,
    owner: ThreadAffinity,
    sender: Sender<PendingInvocation>,
    receiver: Receiver<PendingInvocation>,
    closed: Mutex<bool>,
}

impl EventQueue {
    /// A queue owned by the calling thread.
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            name: name.into(),
            owner: ThreadAffinity::current(),
            sender,
            receiver,
            closed: Mutex::new(false),
        }
    }

    /// The owning thread.
    pub fn owner(&self) -> ThreadAffinity {
        self.owner
    }

    /// Number of invocations waiting to be processed.
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Run every invocation queued so far. Returns how many ran.
    ///
    /// Invocations posted by the slots being run are left for the next call.
    pub fn process_pending(&self) -> Result<usize, ContextError> {
        if !self.owner.is_same_thread() {
            return Err(ContextError::WrongThread {
                name: self.name.clone(),
            });
        }
        let batch = self.receiver.len();
        let mut processed = 0;
        while processed < batch {
            let Ok(invocation) = self.receiver.try_recv() else {
                break;
            };
            run_logged(&self.name, invocation);
            processed += 1;
        }
        Ok(processed)
    }

    /// Refuse new posts and drop everything still queued, releasing any
    /// thread blocked on a dropped invocation.
    pub fn close(&self) -> usize {
        *self.closed.lock() = true;
        let mut dropped = 0;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(
                target: targets::EXECUTOR,
                name = %self.name,
                dropped,
                "event queue closed"
            );
        }
        dropped
    }
}

impl ExecutionContext for EventQueue {
    fn post(&self, invocation: PendingInvocation) -> Result<(), ContextError> {
        let closed = self.closed.lock();
        if *closed {
            return Err(ContextError::Stopped {
                name: self.name.clone(),
            });
        }
        self.sender.send(invocation).map_err(|_| ContextError::Stopped {
            name: self.name.clone(),
        })
    }

    fn is_current(&self) -> bool {
        self.owner.is_same_thread()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.close();
    }
}
