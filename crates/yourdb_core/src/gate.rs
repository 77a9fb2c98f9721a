//! Writer-preference reader/writer gate.
//!
//! One gate guards each entity's state. Any number of readers may hold the
//! gate together, or one writer exclusively. The gate is writer-preferring:
//! a waiting writer blocks the arrival of new readers even while current
//! readers drain, so a log-append workload cannot starve its writers.
//! Writers are served in FIFO order by ticket.
//!
//! The gate is not re-entrant. Acquiring it twice on one thread deadlocks;
//! the engine never nests acquisitions and never holds two gates at once.

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::ops::{Deref, DerefMut};

/// A writer-preference reader/writer gate owning the state it protects.
///
/// # Example
///
/// ```
/// use yourdb_core::gate::Gate;
///
/// let gate = Gate::new(vec![1, 2, 3]);
/// {
///     let read = gate.read();
///     assert_eq!(read.len(), 3);
/// }
/// gate.write().push(4);
/// assert_eq!(gate.read().len(), 4);
/// ```
pub struct Gate<T> {
    state: Mutex<GateState>,
    readers: Condvar,
    writers: Condvar,
    // The gate's admission protocol guarantees this lock is uncontended by
    // the time a thread touches it: readers share it, and a writer is only
    // admitted once every reader has exited.
    data: RwLock<T>,
}

#[derive(Debug, Default)]
struct GateState {
    active_readers: usize,
    writer_active: bool,
    writers_waiting: usize,
    next_ticket: u64,
    now_serving: u64,
}

impl<T> Gate<T> {
    /// Creates a gate protecting `data`.
    pub fn new(data: T) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            readers: Condvar::new(),
            writers: Condvar::new(),
            data: RwLock::new(data),
        }
    }

    /// Enters the gate as a reader, blocking while a writer holds or waits.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut state = self.state.lock();
        while state.writer_active || state.writers_waiting > 0 {
            self.readers.wait(&mut state);
        }
        state.active_readers += 1;
        drop(state);

        ReadGuard {
            inner: self.data.read(),
            _ticket: ReadTicket { gate: self },
        }
    }

    /// Enters the gate as a writer, blocking until exclusive.
    ///
    /// Queued writers are admitted in arrival order.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.writers_waiting += 1;
        while state.writer_active || state.active_readers > 0 || state.now_serving != ticket {
            self.writers.wait(&mut state);
        }
        state.writers_waiting -= 1;
        state.writer_active = true;
        drop(state);

        WriteGuard {
            inner: self.data.write(),
            _ticket: WriteTicket { gate: self },
        }
    }

    fn read_exit(&self) {
        let mut state = self.state.lock();
        state.active_readers -= 1;
        let drained = state.active_readers == 0;
        drop(state);
        if drained {
            self.writers.notify_all();
        }
    }

    fn write_exit(&self) {
        let mut state = self.state.lock();
        state.writer_active = false;
        state.now_serving += 1;
        drop(state);
        // Only the next ticket proceeds; waking every waiter lets the rest
        // re-check and park again.
        self.writers.notify_all();
        self.readers.notify_all();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Gate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate").finish_non_exhaustive()
    }
}

/// Exits the gate's reader side on drop.
struct ReadTicket<'a, T> {
    gate: &'a Gate<T>,
}

impl<T> Drop for ReadTicket<'_, T> {
    fn drop(&mut self) {
        self.gate.read_exit();
    }
}

/// Exits the gate's writer side on drop.
struct WriteTicket<'a, T> {
    gate: &'a Gate<T>,
}

impl<T> Drop for WriteTicket<'_, T> {
    fn drop(&mut self) {
        self.gate.write_exit();
    }
}

/// Shared access to gated state. Dropping the guard exits the gate.
// Field order matters: the data guard must drop before the ticket exits.
pub struct ReadGuard<'a, T> {
    inner: RwLockReadGuard<'a, T>,
    _ticket: ReadTicket<'a, T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

/// Exclusive access to gated state. Dropping the guard exits the gate.
// Field order matters: the data guard must drop before the ticket exits.
pub struct WriteGuard<'a, T> {
    inner: RwLockWriteGuard<'a, T>,
    _ticket: WriteTicket<'a, T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn read_then_write() {
        let gate = Gate::new(0_i32);
        assert_eq!(*gate.read(), 0);
        *gate.write() = 7;
        assert_eq!(*gate.read(), 7);
    }

    #[test]
    fn concurrent_readers_overlap() {
        let gate = Arc::new(Gate::new(()));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _guard = gate.read();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) > 1, "readers never overlapped");
    }

    #[test]
    fn writers_are_exclusive() {
        let gate = Arc::new(Gate::new(0_u64));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let mut guard = gate.write();
                        // A non-atomic read-modify-write; lost updates would
                        // show up in the final count.
                        let value = *guard;
                        *guard = value + 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*gate.read(), 800);
    }

    #[test]
    fn waiting_writer_blocks_new_readers() {
        let gate = Arc::new(Gate::new(0_i32));

        // A reader holds the gate while a writer queues behind it.
        let held = gate.read();

        let writer = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                *gate.write() = 1;
            })
        };
        thread::sleep(Duration::from_millis(50));

        // A reader arriving behind the waiting writer must observe the
        // writer's effect, proving it was not admitted first.
        let late_reader = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || *gate.read())
        };
        thread::sleep(Duration::from_millis(50));

        drop(held);
        writer.join().unwrap();
        assert_eq!(late_reader.join().unwrap(), 1);
    }

    #[test]
    fn writers_served_in_arrival_order() {
        let gate = Arc::new(Gate::new(Vec::new()));

        let held = gate.read();
        let mut handles = Vec::new();
        for id in 0..3 {
            let gate = Arc::clone(&gate);
            handles.push(thread::spawn(move || {
                gate.write().push(id);
            }));
            // Give each writer time to take its ticket before the next.
            thread::sleep(Duration::from_millis(50));
        }
        drop(held);

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*gate.read(), vec![0, 1, 2]);
    }

    #[test]
    fn writer_admitted_after_readers_drain() {
        let gate = Arc::new(Gate::new(false));
        let acquired = Arc::new(AtomicUsize::new(0));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let acquired = Arc::clone(&acquired);
                thread::spawn(move || {
                    let guard = gate.read();
                    acquired.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    assert!(!*guard, "writer ran while readers held the gate");
                })
            })
            .collect();
        while acquired.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }

        *gate.write() = true;

        for reader in readers {
            reader.join().unwrap();
        }
        assert!(*gate.read());
    }
}
