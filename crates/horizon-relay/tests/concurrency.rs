//! Integration tests for cross-thread activation and queued delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use horizon_relay::{
    Closure, ConnectionKind, EventQueue, ExecutionContext, Receiver, Sender, SignalBase, SlotBase,
    ThreadExecutor, activate, connect, connect_unbound, disconnect, disconnect_unbound,
};
use parking_lot::Mutex;

const CANARY: u64 = 0x5eed_cafe_f00d_d00d;

struct Feed {
    base: SignalBase,
}

impl Sender for Feed {
    fn signal_base(&self) -> &SignalBase {
        &self.base
    }
}

impl Feed {
    fn new() -> Self {
        Self {
            base: SignalBase::new::<Self>(),
        }
    }

    fn item(&self, sequence: u64, payload: String) {
        activate(self, Self::item, (sequence, payload));
    }
}

struct Reader {
    base: SlotBase,
    canary: u64,
    hits: AtomicUsize,
    received: Mutex<Vec<(u64, String, ThreadId)>>,
    torn: AtomicBool,
}

impl Receiver for Reader {
    fn slot_base(&self) -> &SlotBase {
        &self.base
    }
}

impl Reader {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            base: SlotBase::new::<Self>(),
            canary: CANARY,
            hits: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            torn: AtomicBool::new(false),
        })
    }

    fn hit(&self, _sequence: u64) {
        if self.canary != CANARY {
            self.torn.store(true, Ordering::SeqCst);
        }
        self.hits.fetch_add(1, Ordering::SeqCst);
    }

    fn record_sequence(&self, sequence: u64) {
        self.received
            .lock()
            .push((sequence, String::new(), thread::current().id()));
    }

    fn record(&self, sequence: u64, payload: String) {
        self.received
            .lock()
            .push((sequence, payload, thread::current().id()));
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_activation_while_connecting_and_disconnecting() {
    init_logging();
    const THREADS: usize = 8;
    const ITERATIONS: usize = 2_500;

    let feed = Arc::new(Feed::new());
    let stable = Reader::new();
    connect(&*feed, Feed::item, &stable, Reader::hit, ConnectionKind::Direct);

    let torn_closure = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();
    for index in 0..THREADS {
        let feed = feed.clone();
        let torn_closure = torn_closure.clone();
        handles.push(thread::spawn(move || {
            if index % 2 == 0 {
                for sequence in 0..ITERATIONS as u64 {
                    feed.item(sequence, String::new());
                }
                return Vec::new();
            }

            let reader = Reader::new();
            let canary = CANARY;
            let flag = torn_closure.clone();
            let closure = Closure::new(move |_: u64| {
                if canary != CANARY {
                    flag.store(true, Ordering::SeqCst);
                }
            });
            for _ in 0..ITERATIONS {
                connect(&*feed, Feed::item, &reader, Reader::hit, ConnectionKind::Direct);
                connect_unbound(&*feed, Feed::item, closure.clone(), ConnectionKind::Direct);
                assert!(disconnect(&*feed, Feed::item, &reader, Reader::hit));
                assert!(disconnect_unbound(&*feed, Feed::item, closure.clone()));
            }
            vec![reader]
        }));
    }

    let readers: Vec<_> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(stable.hits.load(Ordering::SeqCst), (THREADS / 2) * ITERATIONS);
    assert!(!stable.torn.load(Ordering::SeqCst));
    assert!(!torn_closure.load(Ordering::SeqCst));
    for reader in &readers {
        assert!(!reader.torn.load(Ordering::SeqCst));
        assert_eq!(reader.base.sender_count(), 0);
    }
    assert_eq!(feed.base.connection_count(), 1);
    assert_eq!(stable.base.sender_count(), 1);
}

#[test]
fn test_auto_connection_queues_to_executor() {
    let executor = Arc::new(ThreadExecutor::builder().name("reader-executor").build().unwrap());
    let feed = Feed::new();
    let reader = Reader::new();
    reader.base.attach_context(executor.clone());
    assert!(!reader.same_execution_context());

    connect(&feed, Feed::item, &reader, Reader::record, ConnectionKind::Auto);
    for sequence in 0..10 {
        feed.item(sequence, format!("item {sequence}"));
    }
    assert!(executor.stop_and_join());

    let received = reader.received.lock();
    let sequences: Vec<u64> = received.iter().map(|(sequence, _, _)| *sequence).collect();
    assert_eq!(sequences, (0..10).collect::<Vec<_>>());
    assert_eq!(received[3].1, "item 3");
    assert!(received.iter().all(|(_, _, id)| *id != thread::current().id()));
}

#[test]
fn test_blocking_queued_waits_for_slot() {
    let executor = Arc::new(ThreadExecutor::new().unwrap());
    let feed = Feed::new();
    let reader = Reader::new();
    reader.base.attach_context(executor.clone());

    connect(&feed, Feed::item, &reader, Reader::record, ConnectionKind::BlockingQueued);
    connect(&feed, Feed::item, &reader, Reader::hit, ConnectionKind::BlockingQueued);

    for sequence in 0..5 {
        feed.item(sequence, "blocking".to_string());
        // Already delivered when activate returns.
        assert_eq!(reader.received.lock().len(), sequence as usize + 1);
        assert_eq!(reader.hits.load(Ordering::SeqCst), sequence as usize + 1);
    }
    executor.stop_and_join();
}

#[test]
fn test_blocking_queued_trims_arguments() {
    let executor = Arc::new(ThreadExecutor::new().unwrap());
    let feed = Feed::new();
    let reader = Reader::new();
    reader.base.attach_context(executor.clone());
    connect(
        &feed,
        Feed::item,
        &reader,
        Reader::record_sequence,
        ConnectionKind::BlockingQueued,
    );

    feed.item(42, "dropped by the slot".to_string());

    let received = reader.received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, 42);
    assert_ne!(received[0].2, thread::current().id());
    drop(received);
    executor.stop_and_join();
}

#[test]
fn test_blocking_queued_to_stopped_executor_returns() {
    init_logging();
    let executor = Arc::new(ThreadExecutor::new().unwrap());
    let feed = Feed::new();
    let reader = Reader::new();
    reader.base.attach_context(executor.clone());
    connect(&feed, Feed::item, &reader, Reader::record, ConnectionKind::BlockingQueued);

    executor.stop_and_join();
    feed.item(1, "dropped".to_string());
    assert!(reader.received.lock().is_empty());
}

#[test]
fn test_event_queue_runs_on_owner_thread() {
    let queue = Arc::new(EventQueue::new("main"));
    let feed = Arc::new(Feed::new());
    let reader = Reader::new();
    reader.base.attach_context(queue.clone());

    connect(&*feed, Feed::item, &reader, Reader::record, ConnectionKind::Auto);

    // Same context: direct.
    feed.item(0, "local".to_string());
    assert_eq!(reader.received.lock().len(), 1);

    let remote_feed = feed.clone();
    thread::spawn(move || {
        remote_feed.item(1, "remote".to_string());
        remote_feed.item(2, "remote".to_string());
    })
    .join()
    .unwrap();

    assert_eq!(queue.pending_count(), 2);
    assert_eq!(reader.received.lock().len(), 1);
    assert_eq!(queue.process_pending().unwrap(), 2);

    let received = reader.received.lock();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|(_, _, id)| *id == thread::current().id()));
    assert!(queue.is_current());
}

#[test]
fn test_receiver_dropped_before_queued_delivery() {
    let queue = Arc::new(EventQueue::new("main"));
    let feed = Feed::new();
    let reader = Reader::new();
    reader.base.attach_context(queue.clone());
    connect(&feed, Feed::item, &reader, Reader::hit, ConnectionKind::Queued);

    feed.item(1, String::new());
    assert_eq!(queue.pending_count(), 1);
    drop(reader);

    // Runs without touching the dropped receiver.
    assert_eq!(queue.process_pending().unwrap(), 1);
    assert_eq!(feed.base.connection_count(), 0);
}
