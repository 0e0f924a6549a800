use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use lock_api::RawMutex;

use crate::framed::StoreHold;
use crate::lock::{LocalLock, SyncLock};
use crate::slot::{Completer, Outcome, Slot};
use crate::task::Task;
use crate::wake::WakeupList;

/// An asynchronous mutual-exclusion token dispenser.
///
/// [`lock`](Mutex::lock) resolves with an [`Ownership`] token; holding the
/// token *is* holding the mutex. Dropping it (or calling
/// [`release`](Ownership::release)) hands the mutex to the next waiter in
/// strict FIFO order.
///
/// There is no protected value inside: the token pattern composes with
/// whatever the ownership is meant to guard - a connection, a file region, a
/// turn in a protocol.
///
/// ```rust
/// use futures::executor::block_on;
/// use handoff::Mutex;
///
/// block_on(async {
///     let mutex: Mutex = Mutex::new();
///     let ownership = mutex.lock().await.unwrap();
///     assert!(mutex.try_lock().is_none());
///     ownership.release();
///     assert!(mutex.try_lock().is_some());
/// });
/// ```
pub struct Mutex<L: RawMutex = LocalLock> {
    core: Arc<Core<L>>,
}

/// A thread-safe [`Mutex`].
pub type SharedMutex = Mutex<SyncLock>;

struct Core<L: RawMutex> {
    state: lock_api::Mutex<L, State<L>>,
}

struct State<L: RawMutex> {
    locked: bool,
    waiters: VecDeque<Completer<Ownership<L>, L>>,
}

impl<L: RawMutex> Mutex<L> {
    /// Creates an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(Core {
                state: lock_api::Mutex::new(State {
                    locked: false,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Requests ownership.
    ///
    /// The returned slot resolves immediately when the mutex was free,
    /// otherwise once every earlier requester has released. Dropping the
    /// slot before it resolves withdraws the request.
    pub fn lock(&self) -> Slot<Ownership<L>, L> {
        let mut state = self.core.state.lock();
        if state.locked {
            let (slot, waiter) = Slot::channel();
            state.waiters.push_back(waiter);
            slot
        } else {
            state.locked = true;
            Slot::with_value(Ownership {
                core: Some(Arc::clone(&self.core)),
            })
        }
    }

    /// Takes ownership only if the mutex is free right now.
    #[must_use]
    pub fn try_lock(&self) -> Option<Ownership<L>> {
        let mut state = self.core.state.lock();
        if state.locked {
            None
        } else {
            state.locked = true;
            Some(Ownership {
                core: Some(Arc::clone(&self.core)),
            })
        }
    }

    /// Whether someone holds ownership right now.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.core.state.lock().locked
    }
}

impl<L: RawMutex> Default for Mutex<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RawMutex> Clone for Mutex<L> {
    /// Clones the handle; both handles refer to the same mutex.
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<L: RawMutex> fmt::Debug for Mutex<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.core.state.try_lock() {
            Some(state) => f
                .debug_struct("Mutex")
                .field("locked", &state.locked)
                .field("waiters", &state.waiters.len())
                .finish(),
            None => f.debug_struct("Mutex").finish_non_exhaustive(),
        }
    }
}

impl<L: RawMutex> Core<L> {
    fn release(this: &Arc<Self>) {
        let mut wakes = WakeupList::new();
        {
            let mut state = this.state.lock();
            loop {
                match state.waiters.pop_front() {
                    Some(waiter) => {
                        let next = Arc::clone(this);
                        // Construct the token only for a waiter that still
                        // wants it: an abandoned token would re-enter this
                        // release from its own drop.
                        match waiter.set_with(|| Ownership { core: Some(next) }) {
                            Some(wakeup) => {
                                wakes.push(wakeup);
                                break;
                            }
                            None => continue,
                        }
                    }
                    None => {
                        state.locked = false;
                        break;
                    }
                }
            }
        }
        // The next owner wakes here, after the state lock is gone.
    }
}

/// The token proving ownership of a [`Mutex`]; dropping it releases.
#[must_use = "dropping an ownership token releases the mutex"]
pub struct Ownership<L: RawMutex = LocalLock> {
    core: Option<Arc<Core<L>>>,
}

impl<L: RawMutex> Ownership<L> {
    /// Releases the mutex, waking the next waiter.
    pub fn release(self) {
        drop(self);
    }
}

impl<L: RawMutex> Drop for Ownership<L> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            Core::release(&core);
        }
    }
}

impl<L: RawMutex> fmt::Debug for Ownership<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ownership").finish_non_exhaustive()
    }
}

/// Acquires every mutex in the set, deadlock-free.
///
/// The acquisition order is fixed by the mutexes' identities (not by the
/// argument order), so two tasks locking overlapping sets can never hold
/// pieces of each other's set. The returned task resolves with the tokens in
/// argument order.
pub fn lock_all<L: RawMutex + 'static>(mutexes: &[&Mutex<L>]) -> Task<Vec<Ownership<L>>> {
    let handles: Vec<Mutex<L>> = mutexes.iter().map(|m| (*m).clone()).collect();
    Task::from_outcome_future(StoreHold::Heap, async move {
        let mut order: Vec<usize> = (0..handles.len()).collect();
        order.sort_by_key(|&i| Arc::as_ptr(&handles[i].core) as usize);

        let mut acquired: Vec<(usize, Ownership<L>)> = Vec::with_capacity(handles.len());
        for &i in &order {
            match handles[i].lock().await {
                Ok(ownership) => acquired.push((i, ownership)),
                Err(failure) => return Outcome::from_result(Err(failure)),
            }
        }
        acquired.sort_by_key(|(i, _)| *i);
        Outcome::Value(acquired.into_iter().map(|(_, ownership)| ownership).collect())
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use futures::executor::block_on;

    use super::*;

    #[test]
    fn uncontended_lock_resolves_immediately() {
        let mutex: Mutex = Mutex::new();
        let slot = mutex.lock();
        assert!(slot.is_ready());
        let ownership = block_on(slot).unwrap();
        assert!(mutex.is_locked());
        ownership.release();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn waiters_resolve_in_fifo_order() {
        let mutex: Mutex = Mutex::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let first = block_on(mutex.lock()).unwrap();
        let second = mutex.lock();
        let third = mutex.lock();
        assert!(!second.is_ready());
        assert!(!third.is_ready());

        for (id, slot) in [(2_u32, second), (3, third)] {
            let order = Rc::clone(&order);
            slot.on_ready(move |result| {
                let _ownership = result.unwrap();
                order.borrow_mut().push(id);
                // `_ownership` drops here, releasing for the next waiter.
            });
        }
        order.borrow_mut().push(1);
        first.release();

        assert_eq!(*order.borrow(), [1, 2, 3]);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn abandoned_requests_are_skipped() {
        let mutex: Mutex = Mutex::new();
        let first = block_on(mutex.lock()).unwrap();
        let abandoned = mutex.lock();
        let mut kept = mutex.lock();
        drop(abandoned);

        first.release();
        assert!(block_on(kept.ready()));
        let ownership = kept.take().unwrap();
        ownership.release();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn lock_all_acquires_regardless_of_argument_order() {
        block_on(async {
            let a: Mutex = Mutex::new();
            let b: Mutex = Mutex::new();

            let forward: Slot<_> = lock_all(&[&a, &b]).into();
            let tokens = forward.await.unwrap();
            assert!(a.is_locked() && b.is_locked());
            drop(tokens);

            let backward: Slot<_> = lock_all(&[&b, &a]).into();
            let tokens = backward.await.unwrap();
            assert!(a.is_locked() && b.is_locked());
            drop(tokens);
            assert!(!a.is_locked() && !b.is_locked());
        });
    }

    #[test]
    fn lock_all_returns_tokens_in_argument_order() {
        block_on(async {
            let a: Mutex = Mutex::new();
            let b: Mutex = Mutex::new();
            let slot: Slot<_> = lock_all(&[&a, &b]).into();
            let mut tokens = slot.await.unwrap();
            assert_eq!(tokens.len(), 2);

            // Releasing the first token must unlock `a`.
            tokens.remove(0).release();
            assert!(!a.is_locked());
            assert!(b.is_locked());
        });
    }
}
