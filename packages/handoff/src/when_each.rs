use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use lock_api::RawMutex;

use crate::error::Failure;
use crate::lock::LocalLock;
use crate::slot::Slot;
use crate::task::Bind;

/// Yields the indices of a slot set in completion order.
///
/// Each call to [`next`](WhenEach::next) resolves with the index of the next
/// slot to complete; every index is yielded exactly once, and `None` marks
/// the set exhausted. The slots stay owned by the set, so the outcome behind
/// a yielded index is read with [`take`](WhenEach::take).
///
/// ```rust
/// use futures::executor::block_on;
/// use handoff::{Slot, WhenEach};
///
/// block_on(async {
///     let (pending, completer) = Slot::<&str>::channel();
///     let mut set = WhenEach::new(vec![pending, Slot::with_value("ready")]);
///
///     // The resolved slot comes first; the pending one after completion.
///     assert_eq!(set.next().await, Some(1));
///     completer.set("late").resume();
///     assert_eq!(set.next().await, Some(0));
///     assert_eq!(set.next().await, None);
///
///     assert_eq!(set.take(0).unwrap(), "late");
///     assert_eq!(set.take(1).unwrap(), "ready");
/// });
/// ```
///
/// Slots completing between two polls are yielded in slot order; distinct
/// completion times are reported in true completion order.
#[must_use = "a completion-order set does nothing until iterated"]
pub struct WhenEach<T, L: RawMutex = LocalLock> {
    slots: Vec<Slot<T, L>>,
    /// Whether the slot at each index still has to be discovered.
    pending: Vec<bool>,
    /// Discovered but not yet yielded indices, in discovery order.
    ready: VecDeque<usize>,
    yielded: usize,
}

impl<T, L: RawMutex> WhenEach<T, L> {
    /// Wraps a set of slots.
    pub fn new(slots: Vec<Slot<T, L>>) -> Self {
        let pending = vec![true; slots.len()];
        Self {
            slots,
            pending,
            ready: VecDeque::new(),
            yielded: 0,
        }
    }

    /// Resolves with the index of the next slot to complete, or `None` when
    /// every index has been yielded.
    pub fn next(&mut self) -> NextCompleted<'_, T, L> {
        NextCompleted { set: self }
    }

    /// Extracts the outcome behind an index yielded by
    /// [`next`](WhenEach::next).
    ///
    /// # Panics
    ///
    /// Panics when the slot at `index` is not resolved or was already taken.
    pub fn take(&mut self, index: usize) -> Result<T, Failure> {
        self.slots[index].take()
    }

    /// Borrows the slot at an index.
    pub fn slot_mut(&mut self, index: usize) -> &mut Slot<T, L> {
        &mut self.slots[index]
    }

    /// Number of slots in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the set holds no slots at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of indices not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.slots.len() - self.yielded
    }

    /// Releases the slots, resolved or not.
    #[must_use]
    pub fn into_slots(self) -> Vec<Slot<T, L>> {
        self.slots
    }

    fn poll_indices(&mut self, cx: &mut Context<'_>) -> Poll<Option<usize>> {
        if self.yielded == self.slots.len() {
            return Poll::Ready(None);
        }
        for index in 0..self.slots.len() {
            if self.pending[index] && self.slots[index].poll_drive(cx, Bind::Bound).is_ready() {
                self.pending[index] = false;
                self.ready.push_back(index);
            }
        }
        match self.ready.pop_front() {
            Some(index) => {
                self.yielded += 1;
                Poll::Ready(Some(index))
            }
            None => Poll::Pending,
        }
    }
}

impl<T, L: RawMutex> fmt::Debug for WhenEach<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhenEach")
            .field("slots", &self.slots.len())
            .field("yielded", &self.yielded)
            .finish()
    }
}

/// Future returned by [`WhenEach::next`].
#[must_use = "futures do nothing unless awaited"]
pub struct NextCompleted<'a, T, L: RawMutex> {
    set: &'a mut WhenEach<T, L>,
}

impl<T, L: RawMutex> Future for NextCompleted<'_, T, L> {
    type Output = Option<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().set.poll_indices(cx)
    }
}

impl<T, L: RawMutex> fmt::Debug for NextCompleted<'_, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextCompleted").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use crate::error::Failure;
    use crate::slot::Completer;

    use super::*;

    #[test]
    fn yields_every_index_exactly_once() {
        block_on(async {
            let slots: Vec<Slot<u32>> = (0..4).map(Slot::with_value).collect();
            let mut set = WhenEach::new(slots);
            let mut seen = Vec::new();
            while let Some(index) = set.next().await {
                seen.push(index);
            }
            seen.sort_unstable();
            assert_eq!(seen, [0, 1, 2, 3]);
            assert_eq!(set.remaining(), 0);
        });
    }

    #[test]
    fn completion_order_is_reported() {
        let mut slots = Vec::new();
        let mut completers: Vec<Completer<u32>> = Vec::new();
        for _ in 0..3 {
            let (slot, completer) = Slot::channel();
            slots.push(slot);
            completers.push(completer);
        }
        let mut set = WhenEach::new(slots);

        // Completions land in the order 1, 2, 0 between polls.
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(set.poll_indices(&mut cx).is_pending());

        let mut completers = completers.into_iter();
        let first = completers.next().unwrap();
        let second = completers.next().unwrap();
        let third = completers.next().unwrap();

        second.set(20).resume();
        assert_eq!(set.poll_indices(&mut cx), Poll::Ready(Some(1)));
        third.set(30).resume();
        assert_eq!(set.poll_indices(&mut cx), Poll::Ready(Some(2)));
        first.set(10).resume();
        assert_eq!(set.poll_indices(&mut cx), Poll::Ready(Some(0)));
        assert_eq!(set.poll_indices(&mut cx), Poll::Ready(None));

        assert_eq!(set.take(0).unwrap(), 10);
        assert_eq!(set.take(1).unwrap(), 20);
        assert_eq!(set.take(2).unwrap(), 30);
    }

    #[test]
    fn failures_and_cancelations_complete_like_values() {
        block_on(async {
            let mut set = WhenEach::new(vec![
                Slot::<u32>::canceled(),
                Slot::failed(crate::Fault::msg("bad")),
            ]);
            let mut seen = Vec::new();
            while let Some(index) = set.next().await {
                seen.push(index);
            }
            assert_eq!(seen.len(), 2);
            assert!(matches!(set.take(0), Err(Failure::Canceled)));
            assert_eq!(set.take(1).unwrap_err().to_string(), "bad");
        });
    }

    #[test]
    fn empty_set_is_immediately_exhausted() {
        block_on(async {
            let mut set = WhenEach::<u32>::new(Vec::new());
            assert_eq!(set.next().await, None);
        });
    }
}
