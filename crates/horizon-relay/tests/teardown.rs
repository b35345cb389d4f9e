//! Integration tests for destroying senders and receivers in any order,
//! including from inside a running slot.

use std::sync::{Arc, Barrier};
use std::thread;

use horizon_relay::{
    ConnectionKind, Receiver, Sender, SignalBase, SlotBase, activate, connect, global_registry,
};
use parking_lot::Mutex;

struct Door {
    base: SignalBase,
}

impl Sender for Door {
    fn signal_base(&self) -> &SignalBase {
        &self.base
    }
}

impl Door {
    fn new() -> Self {
        Self {
            base: SignalBase::new::<Self>(),
        }
    }

    fn opened(&self, angle: u32) {
        activate(self, Self::opened, (angle,));
    }
}

struct Alarm {
    base: SlotBase,
    triggered: Mutex<Vec<u32>>,
    door: Mutex<Option<Arc<Door>>>,
}

impl Receiver for Alarm {
    fn slot_base(&self) -> &SlotBase {
        &self.base
    }
}

impl Alarm {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            base: SlotBase::new::<Self>(),
            triggered: Mutex::new(Vec::new()),
            door: Mutex::new(None),
        })
    }

    fn trigger(&self, angle: u32) {
        self.triggered.lock().push(angle);
    }

    fn destroy_door(&self) {
        if let Some(door) = self.door.lock().take() {
            door.base.teardown();
        }
    }

    fn destroy_self(&self) {
        self.base.teardown();
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_sender_dropped_first() {
    let door = Door::new();
    let alarm = Alarm::new();
    connect(&door, Door::opened, &alarm, Alarm::trigger, ConnectionKind::Direct);
    connect(&door, Door::opened, &alarm, Alarm::trigger, ConnectionKind::Queued);
    let door_id = door.base.id();
    assert_eq!(Arc::weak_count(&alarm), 4);

    drop(door);
    assert_eq!(alarm.base.sender_count(), 0);
    assert_eq!(Arc::weak_count(&alarm), 0);
    assert!(!global_registry().contains_sender(door_id));

    let alarm_id = alarm.base.id();
    drop(alarm);
    assert!(!global_registry().contains_receiver(alarm_id));
}

#[test]
fn test_receiver_dropped_first() {
    let door = Door::new();
    let alarm = Alarm::new();
    let other = Alarm::new();
    connect(&door, Door::opened, &alarm, Alarm::trigger, ConnectionKind::Direct);
    connect(&door, Door::opened, &other, Alarm::trigger, ConnectionKind::Direct);

    drop(alarm);
    assert_eq!(door.base.connection_count(), 1);

    door.opened(30);
    assert_eq!(*other.triggered.lock(), vec![30]);
}

#[test]
fn test_concurrent_teardown_in_both_orders() {
    init_logging();
    for _ in 0..200 {
        let door = Door::new();
        let alarm = Alarm::new();
        for _ in 0..4 {
            connect(&door, Door::opened, &alarm, Alarm::trigger, ConnectionKind::Direct);
        }
        let door_id = door.base.id();
        let alarm_id = alarm.base.id();

        let barrier = Arc::new(Barrier::new(2));
        let sender_side = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                drop(door);
            })
        };
        let receiver_side = thread::spawn(move || {
            barrier.wait();
            drop(alarm);
        });
        sender_side.join().unwrap();
        receiver_side.join().unwrap();

        assert!(!global_registry().contains_sender(door_id));
        assert!(!global_registry().contains_receiver(alarm_id));
    }
}

#[test]
fn test_teardown_racing_activation() {
    let door = Arc::new(Door::new());
    let alarm = Alarm::new();
    for _ in 0..8 {
        connect(&*door, Door::opened, &alarm, Alarm::trigger, ConnectionKind::Direct);
    }

    let emitter = {
        let door = door.clone();
        thread::spawn(move || {
            for angle in 0..1_000 {
                door.opened(angle);
            }
        })
    };
    thread::yield_now();
    alarm.base.teardown();
    emitter.join().unwrap();

    assert_eq!(door.base.connection_count(), 0);
    let seen = alarm.triggered.lock().len();
    door.opened(9_999);
    assert_eq!(alarm.triggered.lock().len(), seen);
}

#[test]
fn test_slot_tears_down_its_sender() {
    init_logging();
    let door = Arc::new(Door::new());
    let alarm = Alarm::new();
    *alarm.door.lock() = Some(door.clone());

    connect(&*door, Door::opened, &alarm, Alarm::trigger, ConnectionKind::Direct);
    connect(&*door, Door::opened, &alarm, Alarm::destroy_door, ConnectionKind::Direct);
    connect(&*door, Door::opened, &alarm, Alarm::trigger, ConnectionKind::Direct);

    door.opened(90);

    // Only the connection before the teardown ran.
    assert_eq!(*alarm.triggered.lock(), vec![90]);
    assert!(door.base.is_torn_down());
    assert_eq!(door.base.connection_count(), 0);
    assert_eq!(door.base.activations_in_flight(), 0);
    assert_eq!(alarm.base.sender_count(), 0);
    assert_eq!(Arc::strong_count(&door), 1);

    door.opened(91);
    assert_eq!(*alarm.triggered.lock(), vec![90]);
}

#[test]
fn test_slot_tears_down_its_receiver() {
    let door = Door::new();
    let alarm = Alarm::new();
    let witness = Alarm::new();

    connect(&door, Door::opened, &alarm, Alarm::destroy_self, ConnectionKind::Direct);
    connect(&door, Door::opened, &alarm, Alarm::trigger, ConnectionKind::Direct);
    connect(&door, Door::opened, &witness, Alarm::trigger, ConnectionKind::Direct);

    door.opened(45);

    assert!(alarm.triggered.lock().is_empty());
    assert_eq!(*witness.triggered.lock(), vec![45]);
    assert_eq!(door.base.connection_count(), 1);
}
