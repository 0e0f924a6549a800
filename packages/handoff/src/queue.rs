use std::collections::VecDeque;
use std::fmt;

use lock_api::RawMutex;

use crate::lock::{LocalLock, SyncLock};
use crate::slot::{Completer, Slot};
use crate::wake::WakeupList;

/// An asynchronous FIFO with blocking push and pop.
///
/// The queue carries two waiter lists of donated write ends: consumers
/// blocked on an empty queue and producers blocked on a full one. A push
/// that finds a waiting consumer hands the value over directly, without
/// touching the buffer, so values always flow k-th push to k-th pop.
///
/// [`push`](Queue::push) and [`pop`](Queue::pop) return [`Slot`]s: resolved
/// immediately when the operation completed synchronously, pending when the
/// caller has to wait. A pop slot resolves canceled when the queue is closed
/// and drained - the standard consumption loop is therefore
/// [`ready`](Slot::ready) + [`take`](Slot::take):
///
/// ```rust
/// use futures::executor::block_on;
/// use handoff::Queue;
///
/// block_on(async {
///     let queue = Queue::<&str>::unbounded();
///     for c in ["a", "b"] {
///         queue.push(c).await.unwrap();
///     }
///     queue.close();
///
///     let mut received = Vec::new();
///     loop {
///         let mut next = queue.pop();
///         if !next.ready().await {
///             break;
///         }
///         received.push(next.take().unwrap());
///     }
///     assert_eq!(received, ["a", "b"]);
/// });
/// ```
///
/// The lock parameter selects thread affinity: the default [`LocalLock`] is
/// single-threaded and free of atomics, [`SharedQueue`] takes a real mutex
/// and may be driven from several threads. Wake signals are always delivered
/// after the queue's lock is released.
pub struct Queue<T, L: RawMutex = LocalLock> {
    state: lock_api::Mutex<L, State<T, L>>,
}

/// A thread-safe [`Queue`].
pub type SharedQueue<T> = Queue<T, SyncLock>;

struct State<T, L: RawMutex> {
    items: VecDeque<T>,
    /// `None` selects unbounded storage.
    capacity: Option<usize>,
    /// Consumers blocked on empty, oldest first.
    poppers: VecDeque<Completer<T, L>>,
    /// Producers blocked on full, oldest first, each carrying its value.
    pushers: VecDeque<PushWaiter<T, L>>,
    closed: bool,
}

struct PushWaiter<T, L: RawMutex> {
    value: T,
    done: Completer<(), L>,
}

impl<T, L: RawMutex> Queue<T, L> {
    /// Creates a queue with no capacity limit; pushes never block.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Creates a queue buffering at most `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "a bounded queue needs room for at least one value");
        Self::with_capacity(Some(capacity))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: lock_api::Mutex::new(State {
                items: VecDeque::new(),
                capacity,
                poppers: VecDeque::new(),
                pushers: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// Pushes a value.
    ///
    /// The returned slot resolves once the value has been accepted - right
    /// away when a consumer was waiting or buffer space existed, later when
    /// the queue was full. Dropping a pending push slot withdraws the value.
    ///
    /// A closed queue still accepts pushes; close only affects consumers.
    pub fn push(&self, value: T) -> Slot<(), L> {
        let mut wakes = WakeupList::new();
        let slot = {
            let mut state = self.state.lock();
            state.push_value(value, &mut wakes)
        };
        // `wakes` fires here, outside the lock.
        drop(wakes);
        slot
    }

    /// Pops the oldest value.
    ///
    /// The returned slot resolves with a value, or canceled once the queue
    /// is closed and fully drained (buffered values and blocked producers
    /// are still delivered after close).
    pub fn pop(&self) -> Slot<T, L> {
        let mut wakes = WakeupList::new();
        let slot = {
            let mut state = self.state.lock();
            state.pop_value(&mut wakes)
        };
        drop(wakes);
        slot
    }

    /// Closes the queue: every consumer blocked right now observes
    /// cancelation, and future pops drain what remains, then cancel.
    pub fn close(&self) {
        let mut wakes = WakeupList::new();
        {
            let mut state = self.state.lock();
            state.closed = true;
            for waiter in state.poppers.drain(..) {
                wakes.push(waiter.cancel());
            }
        }
    }

    /// Discards every buffered value, admitting blocked producers into the
    /// freed space.
    pub fn clear(&self) {
        let mut wakes = WakeupList::new();
        {
            let mut state = self.state.lock();
            state.items.clear();
            while !state.pushers.is_empty() && state.has_room() {
                state.admit_pusher(&mut wakes);
            }
        }
    }

    /// Number of buffered values (excluding values parked with blocked
    /// producers).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T, L: RawMutex> State<T, L> {
    fn has_room(&self) -> bool {
        self.capacity.map_or(true, |cap| self.items.len() < cap)
    }

    fn push_value(&mut self, mut value: T, wakes: &mut WakeupList) -> Slot<(), L> {
        // Hand the value straight to the oldest waiting consumer; abandoned
        // waiters (their slot was dropped) give the value back and are
        // skipped.
        while let Some(waiter) = self.poppers.pop_front() {
            match waiter.try_set(value) {
                Ok(wakeup) => {
                    wakes.push(wakeup);
                    return Slot::with_value(());
                }
                Err(returned) => value = returned,
            }
        }
        if self.has_room() {
            self.items.push_back(value);
            return Slot::with_value(());
        }
        let (slot, done) = Slot::channel();
        self.pushers.push_back(PushWaiter { value, done });
        slot
    }

    fn pop_value(&mut self, wakes: &mut WakeupList) -> Slot<T, L> {
        if let Some(value) = self.items.pop_front() {
            self.admit_pusher(wakes);
            return Slot::with_value(value);
        }
        debug_assert!(self.pushers.is_empty(), "producers can only block on a full buffer");
        if self.closed {
            return Slot::canceled();
        }
        let (slot, waiter) = Slot::channel();
        self.poppers.push_back(waiter);
        slot
    }

    /// Moves the oldest still-wanted blocked push into the buffer.
    fn admit_pusher(&mut self, wakes: &mut WakeupList) {
        while let Some(waiter) = self.pushers.pop_front() {
            if waiter.done.is_connected() {
                self.items.push_back(waiter.value);
                wakes.push(waiter.done.set(()));
                return;
            }
            // The push slot was dropped: the value is withdrawn.
        }
    }
}

impl<T, L: RawMutex> fmt::Debug for Queue<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Some(state) => f
                .debug_struct("Queue")
                .field("len", &state.items.len())
                .field("capacity", &state.capacity)
                .field("poppers", &state.poppers.len())
                .field("pushers", &state.pushers.len())
                .field("closed", &state.closed)
                .finish(),
            None => f.debug_struct("Queue").finish_non_exhaustive(),
        }
    }
}
