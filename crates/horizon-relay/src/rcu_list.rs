//! Read-copy-update linked list for connection storage.
//!
//! [`RcuList`] is the structure every sender and receiver keeps its
//! connections in. It supports any number of concurrent, lock-free readers
//! while a single writer at a time inserts or removes entries.
//!
//! # How It Works
//!
//! Entries live in a singly-linked chain of heap nodes (plus writer-only back
//! pointers). A writer never frees a node it unlinks. Instead the node is
//! pushed onto a "zombie" chain. Every [`ReadHandle`] also pushes a marker
//! onto that same chain when it is acquired, so the chain is ordered by time:
//! anything below a reader's marker was unlinked before that reader started.
//!
//! When a reader is released it looks at every marker older than its own. If
//! none of them belong to a reader that is still running, nothing older than
//! its marker can be reachable by anyone, and that part of the chain is freed.
//!
//! - Readers never block and never observe a half-linked node (pointer
//!   publication is a single atomic store).
//! - Readers never touch freed memory (reclamation waits for older readers).
//! - Writers are serialized by one mutex and never wait for readers.
//!
//! # Example
//!
//! ```
//! use horizon_relay::rcu_list::RcuList;
//!
//! let list = RcuList::new();
//! {
//!     let mut writer = list.write();
//!     writer.push_back(1);
//!     writer.push_back(2);
//!     writer.push_back(3);
//! }
//!
//! let reader = list.read();
//! {
//!     // Removing 2 does not disturb the outstanding reader.
//!     let mut writer = list.write();
//!     writer.retain(|&value| value != 2);
//! }
//! assert_eq!(reader.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::logging::targets;

struct Node<T> {
    data: T,
    next: AtomicPtr<Node<T>>,
    /// Only read and written with the write lock held.
    back: AtomicPtr<Node<T>>,
    erased: AtomicBool,
}

/// An entry on the deferred-free chain.
///
/// A reader marker has a null `node`; an unlinked list node has
/// `reader_active == false` from the start.
struct Zombie<T> {
    next: AtomicPtr<Zombie<T>>,
    node: *mut Node<T>,
    reader_active: AtomicBool,
}

/// A concurrent list with lock-free reads and serialized writes.
///
/// See the [module documentation](self) for the reclamation scheme.
///
/// # Related Types
///
/// - [`ReadHandle`] - A stable traversal of the list
/// - [`WriteHandle`] - Exclusive mutation access
/// - [`CursorMut`] - Positional insert/erase through a write handle
pub struct RcuList<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    zombies: AtomicPtr<Zombie<T>>,
    len: AtomicUsize,
    write_lock: Mutex<()>,
    _owns: PhantomData<Box<Node<T>>>,
}

// SAFETY: entries are shared by reference between reader threads (`T: Sync`)
// and may be dropped by whichever thread performs reclamation (`T: Send`).
// All links are atomics and structural mutation is serialized by `write_lock`.
unsafe impl<T: Send + Sync> Send for RcuList<T> {}
unsafe impl<T: Send + Sync> Sync for RcuList<T> {}

impl<T> Default for RcuList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RcuList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            zombies: AtomicPtr::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
            _owns: PhantomData,
        }
    }

    /// Acquire a read handle.
    ///
    /// Never blocks. The only allocation is the constant-size marker that
    /// registers this reader on the deferred-free chain.
    pub fn read(&self) -> ReadHandle<'_, T> {
        let marker = Box::into_raw(Box::new(Zombie {
            next: AtomicPtr::new(ptr::null_mut()),
            node: ptr::null_mut(),
            reader_active: AtomicBool::new(true),
        }));
        self.push_zombie(marker);
        ReadHandle { list: self, marker }
    }

    /// Acquire the write handle, blocking only behind other writers.
    pub fn write(&self) -> WriteHandle<'_, T> {
        let guard = self.write_lock.lock();
        // Registered after the lock so nodes this writer unlinks and then
        // steps over stay alive until the handle is dropped.
        let reader = self.read();
        WriteHandle {
            list: self,
            guard: Some(guard),
            reader: Some(reader),
        }
    }

    /// Number of live entries.
    ///
    /// Exact under a write handle; a snapshot value otherwise.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the list has no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free every unlinked node that no outstanding reader can still observe.
    ///
    /// Reclamation also happens automatically whenever a handle is dropped;
    /// this only forces a pass.
    pub fn reclaim(&self) {
        drop(self.read());
    }

    fn push_zombie(&self, zombie: *mut Zombie<T>) {
        let mut head = self.zombies.load(Ordering::SeqCst);
        loop {
            // SAFETY: `zombie` is a fresh allocation not yet shared.
            unsafe { (*zombie).next.store(head, Ordering::SeqCst) };
            match self
                .zombies
                .compare_exchange_weak(head, zombie, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
    }

    /// Release a reader marker, reclaiming older zombies when possible.
    ///
    /// # Safety
    ///
    /// `marker` must be a marker pushed by [`RcuList::read`] on this list that
    /// has not been released yet.
    unsafe fn release(&self, marker: *mut Zombie<T>) {
        unsafe {
            let older = (*marker).next.load(Ordering::SeqCst);

            let mut cursor = older;
            let mut oldest_reader = true;
            while !cursor.is_null() {
                if (*cursor).reader_active.load(Ordering::SeqCst) {
                    oldest_reader = false;
                    break;
                }
                cursor = (*cursor).next.load(Ordering::SeqCst);
            }

            if oldest_reader && !older.is_null() {
                (*marker).next.store(ptr::null_mut(), Ordering::SeqCst);

                let mut freed = 0usize;
                let mut cursor = older;
                while !cursor.is_null() {
                    let zombie = Box::from_raw(cursor);
                    cursor = zombie.next.load(Ordering::SeqCst);
                    if !zombie.node.is_null() {
                        drop(Box::from_raw(zombie.node));
                        freed += 1;
                    }
                }
                if freed > 0 {
                    tracing::trace!(target: targets::LIST, freed, "reclaimed unlinked nodes");
                }
            }

            // Last touch of the marker: once inactive a newer reader may free it.
            (*marker).reader_active.store(false, Ordering::SeqCst);
        }
    }

    /// Link a new node in front of `next` (or at the tail when `next` is null).
    ///
    /// # Safety
    ///
    /// The write lock must be held and `next` must be null or a live node.
    unsafe fn link_before(&self, next: *mut Node<T>, data: T) {
        unsafe {
            let prev = if next.is_null() {
                self.tail.load(Ordering::SeqCst)
            } else {
                (*next).back.load(Ordering::SeqCst)
            };

            let node = Box::into_raw(Box::new(Node {
                data,
                next: AtomicPtr::new(next),
                back: AtomicPtr::new(prev),
                erased: AtomicBool::new(false),
            }));

            if next.is_null() {
                self.tail.store(node, Ordering::SeqCst);
            } else {
                (*next).back.store(node, Ordering::SeqCst);
            }

            // Publication: readers can reach the node from here on.
            if prev.is_null() {
                self.head.store(node, Ordering::SeqCst);
            } else {
                (*prev).next.store(node, Ordering::SeqCst);
            }
        }
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    /// Unlink `node` and hand it to the zombie chain. Returns the next live node.
    ///
    /// # Safety
    ///
    /// The write lock must be held and `node` must be a live node of this list.
    unsafe fn unlink(&self, node: *mut Node<T>) -> *mut Node<T> {
        unsafe {
            (*node).erased.store(true, Ordering::SeqCst);

            let prev = (*node).back.load(Ordering::SeqCst);
            let next = (*node).next.load(Ordering::SeqCst);

            if prev.is_null() {
                self.head.store(next, Ordering::SeqCst);
            } else {
                (*prev).next.store(next, Ordering::SeqCst);
            }
            if next.is_null() {
                self.tail.store(prev, Ordering::SeqCst);
            } else {
                (*next).back.store(prev, Ordering::SeqCst);
            }

            self.len.fetch_sub(1, Ordering::AcqRel);
            self.push_zombie(Box::into_raw(Box::new(Zombie {
                next: AtomicPtr::new(ptr::null_mut()),
                node,
                reader_active: AtomicBool::new(false),
            })));
            next
        }
    }
}

impl<T> Drop for RcuList<T> {
    fn drop(&mut self) {
        // `&mut self` proves no handle is outstanding.
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            // SAFETY: live nodes are owned by the chain and freed exactly once here.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Relaxed);
        }

        let mut zombie = *self.zombies.get_mut();
        while !zombie.is_null() {
            // SAFETY: the zombie chain owns its entries and the unlinked nodes
            // they carry; unlinked nodes are never on the live chain.
            let boxed = unsafe { Box::from_raw(zombie) };
            if !boxed.node.is_null() {
                drop(unsafe { Box::from_raw(boxed.node) });
            }
            zombie = boxed.next.load(Ordering::Relaxed);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RcuList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reader = self.read();
        f.debug_list().entries(reader.iter()).finish()
    }
}

/// A lock-free traversal of an [`RcuList`].
///
/// Entries reachable through this handle stay allocated until it is dropped,
/// even if a writer erases them in the meantime. Entries erased after the
/// handle was acquired are skipped once erased; entries inserted afterwards may
/// or may not be visited.
pub struct ReadHandle<'a, T> {
    list: &'a RcuList<T>,
    marker: *mut Zombie<T>,
}

impl<'a, T> ReadHandle<'a, T> {
    /// Iterate the entries in insertion order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            cursor: self.list.head.load(Ordering::SeqCst),
            _handle: PhantomData,
        }
    }
}

impl<'h, 'a, T> IntoIterator for &'h ReadHandle<'a, T> {
    type Item = &'h T;
    type IntoIter = Iter<'h, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> Drop for ReadHandle<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the marker was pushed by `read()` and is released once, here.
        unsafe { self.list.release(self.marker) }
    }
}

/// Iterator over the entries visible to a handle.
pub struct Iter<'h, T> {
    cursor: *const Node<T>,
    _handle: PhantomData<&'h T>,
}

impl<'h, T> Iterator for Iter<'h, T> {
    type Item = &'h T;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.cursor.is_null() {
            // SAFETY: the handle borrowed for `'h` keeps every node reachable
            // from the chain it started on allocated.
            let node: &'h Node<T> = unsafe { &*self.cursor };
            self.cursor = node.next.load(Ordering::SeqCst);
            if !node.erased.load(Ordering::SeqCst) {
                return Some(&node.data);
            }
        }
        None
    }
}

/// Exclusive mutation access to an [`RcuList`].
///
/// Holding a write handle blocks other writers but never readers. When the
/// handle is dropped a reclamation pass runs for anything it unlinked.
pub struct WriteHandle<'a, T> {
    list: &'a RcuList<T>,
    guard: Option<MutexGuard<'a, ()>>,
    reader: Option<ReadHandle<'a, T>>,
}

impl<'a, T> WriteHandle<'a, T> {
    /// Iterate the live entries.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            cursor: self.list.head.load(Ordering::SeqCst),
            _handle: PhantomData,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Append an entry.
    pub fn push_back(&mut self, data: T) {
        // SAFETY: the write lock is held for the lifetime of `self`.
        unsafe { self.list.link_before(ptr::null_mut(), data) }
    }

    /// Prepend an entry.
    pub fn push_front(&mut self, data: T) {
        let head = self.list.head.load(Ordering::SeqCst);
        // SAFETY: write lock held; `head` is null or live.
        unsafe { self.list.link_before(head, data) }
    }

    /// A cursor positioned on the first entry.
    pub fn cursor_front(&mut self) -> CursorMut<'_, 'a, T> {
        let current = self.list.head.load(Ordering::SeqCst);
        CursorMut {
            handle: self,
            current,
        }
    }

    /// Erase every entry for which `keep` returns `false`.
    ///
    /// Returns the number of erased entries.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut removed = 0;
        let mut cursor = self.cursor_front();
        while let Some(entry) = cursor.current() {
            if keep(entry) {
                cursor.move_next();
            } else {
                cursor.remove_current();
                removed += 1;
            }
        }
        removed
    }

    /// Erase every entry. Returns how many were erased.
    pub fn clear(&mut self) -> usize {
        self.retain(|_| false)
    }
}

impl<T> Drop for WriteHandle<'_, T> {
    fn drop(&mut self) {
        drop(self.guard.take());
        drop(self.reader.take());
        self.list.reclaim();
    }
}

/// A position inside a [`WriteHandle`] for positional insert and erase.
///
/// The cursor sits either on an entry or past the end.
pub struct CursorMut<'w, 'a, T> {
    handle: &'w mut WriteHandle<'a, T>,
    current: *mut Node<T>,
}

impl<T> CursorMut<'_, '_, T> {
    /// The entry under the cursor, or `None` past the end.
    pub fn current(&self) -> Option<&T> {
        if self.current.is_null() {
            None
        } else {
            // SAFETY: the cursor only ever points at live nodes, and only this
            // write handle can unlink them.
            Some(unsafe { &(*self.current).data })
        }
    }

    /// Advance to the next entry. Does nothing past the end.
    pub fn move_next(&mut self) {
        if !self.current.is_null() {
            // SAFETY: see `current`.
            self.current = unsafe { (*self.current).next.load(Ordering::SeqCst) };
        }
    }

    /// Insert an entry before the cursor (at the back when past the end).
    ///
    /// The cursor keeps pointing at the same entry.
    pub fn insert_before(&mut self, data: T) {
        // SAFETY: write lock held through `handle`; `current` is null or live.
        unsafe { self.handle.list.link_before(self.current, data) }
    }

    /// Erase the entry under the cursor and move to the one after it.
    ///
    /// Returns `false` if the cursor was past the end.
    pub fn remove_current(&mut self) -> bool {
        if self.current.is_null() {
            return false;
        }
        // SAFETY: write lock held; `current` is live.
        self.current = unsafe { self.handle.list.unlink(self.current) };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    struct DropCounter {
        value: usize,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn values(list: &RcuList<i32>) -> Vec<i32> {
        list.read().iter().copied().collect()
    }

    #[test]
    fn test_push_preserves_order() {
        let list = RcuList::new();
        {
            let mut writer = list.write();
            writer.push_back(2);
            writer.push_back(3);
            writer.push_front(1);
        }
        assert_eq!(values(&list), vec![1, 2, 3]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_cursor_insert_and_erase() {
        let list = RcuList::new();
        {
            let mut writer = list.write();
            for value in [1, 2, 4, 5] {
                writer.push_back(value);
            }

            let mut cursor = writer.cursor_front();
            while let Some(&value) = cursor.current() {
                if value == 4 {
                    cursor.insert_before(3);
                }
                if value == 5 {
                    assert!(cursor.remove_current());
                    continue;
                }
                cursor.move_next();
            }
            assert!(cursor.current().is_none());
            assert!(!cursor.remove_current());
            cursor.insert_before(6);
        }
        assert_eq!(values(&list), vec![1, 2, 3, 4, 6]);
    }

    #[test]
    fn test_erase_returns_next_position() {
        let list = RcuList::new();
        let mut writer = list.write();
        for value in 0..4 {
            writer.push_back(value);
        }
        let mut cursor = writer.cursor_front();
        cursor.move_next();
        assert!(cursor.remove_current());
        assert_eq!(cursor.current(), Some(&2));
        drop(writer);
        assert_eq!(values(&list), vec![0, 2, 3]);
    }

    #[test]
    fn test_retain_and_clear() {
        let list = RcuList::new();
        {
            let mut writer = list.write();
            for value in 0..10 {
                writer.push_back(value);
            }
            assert_eq!(writer.retain(|v| v % 2 == 0), 5);
        }
        assert_eq!(values(&list), vec![0, 2, 4, 6, 8]);
        assert_eq!(list.write().clear(), 5);
        assert!(list.is_empty());
        assert!(values(&list).is_empty());
    }

    #[test]
    fn test_reader_survives_concurrent_erase() {
        let drops = Arc::new(AtomicUsize::new(0));
        let list = RcuList::new();
        {
            let mut writer = list.write();
            for value in 0..3 {
                writer.push_back(DropCounter {
                    value,
                    drops: drops.clone(),
                });
            }
        }

        let reader = list.read();
        let mut iter = reader.iter();
        let first = iter.next().expect("list has entries");

        list.write().clear();
        assert_eq!(list.len(), 0);

        // Unlinked but not freed while the reader is outstanding.
        assert_eq!(first.value, 0);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        // Entries erased after the read began are skipped.
        assert!(iter.next().is_none());

        drop(reader);
        list.reclaim();
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_older_reader_blocks_reclamation() {
        let drops = Arc::new(AtomicUsize::new(0));
        let list = RcuList::new();
        list.write().push_back(DropCounter {
            value: 7,
            drops: drops.clone(),
        });

        let old_reader = list.read();
        list.write().clear();

        // A newer reader released while an older one is active frees nothing.
        list.reclaim();
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(old_reader);
        list.reclaim();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_frees_live_and_zombie_nodes() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let list = RcuList::new();
            let mut writer = list.write();
            for value in 0..4 {
                writer.push_back(DropCounter {
                    value,
                    drops: drops.clone(),
                });
            }
            writer.retain(|entry| entry.value < 2);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let list = Arc::new(RcuList::new());
        {
            let mut writer = list.write();
            for value in 0..16 {
                writer.push_back(value);
            }
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let list = list.clone();
                std::thread::spawn(move || {
                    let mut visited = 0usize;
                    for _ in 0..2_000 {
                        let reader = list.read();
                        let mut previous = -1;
                        for &value in &reader {
                            // Insertion order is preserved for every snapshot.
                            assert!(value > previous, "out of order: {value} after {previous}");
                            previous = value;
                            visited += 1;
                        }
                    }
                    visited
                })
            })
            .collect();

        for round in 0..2_000 {
            let mut writer = list.write();
            let base = 16 + round * 2;
            writer.push_back(base);
            writer.push_back(base + 1);
            let mut cursor = writer.cursor_front();
            cursor.remove_current();
            cursor.remove_current();
        }

        for reader in readers {
            assert!(reader.join().expect("reader thread panicked") > 0);
        }
        assert_eq!(list.len(), 16);
    }
}
