use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use lock_api::RawMutex;

use crate::lock::LocalLock;
use crate::slot::Slot;
use crate::task::Bind;

/// Waits until every slot in the set is resolved.
///
/// The join does not consume or inspect the outcomes: after it completes,
/// each slot is read individually with [`Slot::take`], preserving per-slot
/// values and failures. The same storage can be joined again after more
/// slots are added to it - a fresh call is a fresh join.
///
/// ```rust
/// use futures::executor::block_on;
/// use handoff::{Slot, Task, when_all};
///
/// block_on(async {
///     let mut slots: Vec<Slot<u32>> = (0..3)
///         .map(|n| Task::new(async move { n * 10 }).into())
///         .collect();
///     when_all(&mut slots).await;
///     let values: Vec<u32> = slots.iter_mut().map(|s| s.take().unwrap()).collect();
///     assert_eq!(values, [0, 10, 20]);
/// });
/// ```
pub fn when_all<T, L: RawMutex>(slots: &mut [Slot<T, L>]) -> WhenAll<'_, T, L> {
    WhenAll { slots }
}

/// Future returned by [`when_all`].
#[must_use = "futures do nothing unless awaited"]
pub struct WhenAll<'a, T, L: RawMutex = LocalLock> {
    slots: &'a mut [Slot<T, L>],
}

impl<T, L: RawMutex> WhenAll<'_, T, L> {
    /// Blocks the current thread until every slot is resolved.
    ///
    /// See [`sync_wait`](crate::sync_wait) for the caveats.
    pub fn wait(self) {
        crate::sync_wait(self);
    }
}

impl<T, L: RawMutex> Future for WhenAll<'_, T, L> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_resolved = true;
        for slot in this.slots.iter_mut() {
            if slot.poll_drive(cx, Bind::Bound).is_pending() {
                all_resolved = false;
            }
        }
        if all_resolved {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl<T, L: RawMutex> fmt::Debug for WhenAll<'_, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhenAll")
            .field("slots", &self.slots.len())
            .finish()
    }
}
