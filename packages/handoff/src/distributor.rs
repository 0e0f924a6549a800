use std::fmt;

use lock_api::RawMutex;

use crate::alert::AlertFlag;
use crate::lock::{LocalLock, SyncLock};
use crate::slot::{Completer, Slot};
use crate::wake::{Wakeup, WakeupList};

/// Broadcasts one value to every currently subscribed waiter.
///
/// A subscription is one-shot: [`broadcast`](Distributor::broadcast) resolves
/// exactly the set of waiters registered at that moment and clears the list;
/// staying subscribed means subscribing again after each delivery.
///
/// Individual waiters can be expelled by key
/// ([`kick_out`](Distributor::kick_out)), and the [`AlertFlag`] protocol
/// ([`alert`](Distributor::alert) with
/// [`subscribe_gated`](Distributor::subscribe_gated)) makes expulsion safe
/// against a concurrent re-subscription.
///
/// ```rust
/// use futures::executor::block_on;
/// use handoff::Distributor;
///
/// let bus = Distributor::<u32>::new();
/// let first = bus.subscribe();
/// let second = bus.subscribe();
/// bus.broadcast(&7_u32);
///
/// assert_eq!(block_on(first).unwrap(), 7);
/// assert_eq!(block_on(second).unwrap(), 7);
///
/// // A late subscriber sees only the next broadcast.
/// let late = bus.subscribe();
/// assert!(!late.is_ready());
/// # drop(late);
/// ```
pub struct Distributor<T, L: RawMutex = LocalLock> {
    state: lock_api::Mutex<L, Vec<Subscriber<T, L>>>,
}

/// A thread-safe [`Distributor`].
pub type SharedDistributor<T> = Distributor<T, SyncLock>;

struct Subscriber<T, L: RawMutex> {
    out: Completer<T, L>,
    key: Option<usize>,
}

impl<T, L: RawMutex> Distributor<T, L> {
    /// Creates a distributor with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: lock_api::Mutex::new(Vec::new()),
        }
    }

    /// Registers for the next broadcast.
    pub fn subscribe(&self) -> Slot<T, L> {
        self.register(None)
    }

    /// Registers for the next broadcast under a caller-chosen key.
    ///
    /// Keys need not be unique; [`kick_out`](Distributor::kick_out) removes
    /// an arbitrary subscriber with the given key.
    pub fn subscribe_keyed(&self, key: usize) -> Slot<T, L> {
        self.register(Some(key))
    }

    /// Registers under a flag's key, unless the flag is already raised - in
    /// which case the subscription resolves canceled immediately.
    pub fn subscribe_gated(&self, flag: &AlertFlag) -> Slot<T, L> {
        let mut subscribers = self.state.lock();
        // The flag is read under the distributor's lock, so this cannot race
        // `alert` on the same distributor.
        if flag.is_raised() {
            return Slot::canceled();
        }
        let (slot, out) = Slot::channel();
        subscribers.push(Subscriber {
            out,
            key: Some(flag.key()),
        });
        slot
    }

    fn register(&self, key: Option<usize>) -> Slot<T, L> {
        let (slot, out) = Slot::channel();
        self.state.lock().push(Subscriber { out, key });
        slot
    }

    /// Delivers a clone of `value` to every current subscriber and clears
    /// the subscription list. Wakes fire after the lock is released.
    pub fn broadcast(&self, value: &T)
    where
        T: Clone,
    {
        let mut wakes = WakeupList::new();
        {
            let mut subscribers = self.state.lock();
            for subscriber in subscribers.drain(..) {
                // The clone is constructed only for waiters still listening.
                if let Some(wakeup) = subscriber.out.set_with(|| value.clone()) {
                    wakes.push(wakeup);
                }
            }
        }
    }

    /// Expels one subscriber with the given key, resolving it canceled.
    ///
    /// Returns the subscriber's wake signal, or an empty one when no such
    /// key is registered.
    pub fn kick_out(&self, key: usize) -> Wakeup {
        self.kick_out_with(key, Completer::cancel)
    }

    /// Expels one subscriber with the given key, letting `resolve` decide
    /// what its slot observes. The resolver runs outside the lock.
    pub fn kick_out_with<F>(&self, key: usize, resolve: F) -> Wakeup
    where
        F: FnOnce(Completer<T, L>) -> Wakeup,
    {
        let expelled = {
            let mut subscribers = self.state.lock();
            match subscribers.iter().position(|s| s.key == Some(key)) {
                Some(index) => Some(subscribers.swap_remove(index)),
                None => None,
            }
        };
        match expelled {
            Some(subscriber) => resolve(subscriber.out),
            None => Wakeup::empty(),
        }
    }

    /// Raises the flag and expels its subscription in one step.
    ///
    /// After this returns, a gated subscription on the same flag can no
    /// longer register until the flag is cleared; the expelled waiter (if
    /// any) observes cancelation and can consult the flag.
    pub fn alert(&self, flag: &AlertFlag) -> Wakeup {
        let expelled = {
            let mut subscribers = self.state.lock();
            flag.raise();
            let key = flag.key();
            match subscribers.iter().position(|s| s.key == Some(key)) {
                Some(index) => Some(subscribers.swap_remove(index)),
                None => None,
            }
        };
        match expelled {
            Some(subscriber) => subscriber.out.cancel(),
            None => Wakeup::empty(),
        }
    }

    /// Number of current subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Whether nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }
}

impl<T, L: RawMutex> Default for Distributor<T, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, L: RawMutex> fmt::Debug for Distributor<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Some(subscribers) => f
                .debug_struct("Distributor")
                .field("subscribers", &subscribers.len())
                .finish(),
            None => f.debug_struct("Distributor").finish_non_exhaustive(),
        }
    }
}
