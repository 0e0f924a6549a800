use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use frame_pool::FrameStore;
use lock_api::RawMutex;
use parking_lot::Mutex;

use crate::error::Fault;
use crate::framed::{Framed, StoreHold};
use crate::slot::{Outcome, Slot};

/// A suspendable producer that has not started yet.
///
/// A task wraps a future lazily: constructing one runs nothing. Converting it
/// into a [`Slot`] binds it, and the first await of that slot starts it; its
/// final value (or error, for [`try_new`](Task::try_new)) resolves the slot.
///
/// Dropping a task that was never started cancels it without running it
/// ([`cancel`](Task::cancel) says the same thing explicitly). To run a task
/// nobody will await, use [`detach`](Task::detach).
///
/// # Example
///
/// ```rust
/// use futures::executor::block_on;
/// use handoff::{Slot, Task};
///
/// let task = Task::new(async { 6 * 7 });
/// let slot: Slot<_> = Slot::from(task);
/// assert_eq!(block_on(slot).unwrap(), 42);
/// ```
#[must_use = "a task runs nothing until bound to a slot and awaited"]
pub struct Task<T> {
    framed: Framed<Outcome<T>>,
}

impl<T: 'static> Task<T> {
    /// Wraps an infallible body.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self::from_outcome_future(StoreHold::Heap, async move { Outcome::Value(body.await) })
    }

    /// Wraps a fallible body; an `Err` resolves the bound slot as failed.
    pub fn try_new<F, E>(body: F) -> Self
    where
        F: Future<Output = Result<T, E>> + 'static,
        E: Error + Send + Sync + 'static,
    {
        Self::from_outcome_future(StoreHold::Heap, async move {
            match body.await {
                Ok(value) => Outcome::Value(value),
                Err(error) => Outcome::Failed(Fault::new(error)),
            }
        })
    }

    /// Like [`new`](Task::new), with the frame placed in `store`.
    ///
    /// Hot loops and recursion use this together with the stores from
    /// [`frame_pool`] to make task creation allocation-free after warm-up.
    pub fn new_in<S, F>(store: &S, body: F) -> Self
    where
        S: FrameStore + ?Sized,
        F: Future<Output = T> + 'static,
    {
        Self::from_outcome_future(StoreHold::Shared(store.share()), async move {
            Outcome::Value(body.await)
        })
    }

    /// Like [`try_new`](Task::try_new), with the frame placed in `store`.
    pub fn try_new_in<S, F, E>(store: &S, body: F) -> Self
    where
        S: FrameStore + ?Sized,
        F: Future<Output = Result<T, E>> + 'static,
        E: Error + Send + Sync + 'static,
    {
        Self::from_outcome_future(StoreHold::Shared(store.share()), async move {
            match body.await {
                Ok(value) => Outcome::Value(value),
                Err(error) => Outcome::Failed(Fault::new(error)),
            }
        })
    }

    pub(crate) fn from_outcome_future<F>(store: StoreHold, body: F) -> Self
    where
        F: Future<Output = Outcome<T>> + 'static,
    {
        Self {
            framed: Framed::new(store, body),
        }
    }

    /// Destroys the never-started task without running it.
    pub fn cancel(self) {
        drop(self);
    }

    /// Runs the task to completion with its result discarded.
    ///
    /// Where dropping cancels the task before it ever runs, `detach` starts
    /// it and drives it across every suspension until it finishes. The body
    /// can notice this through [`detached`] and skip work nobody will
    /// observe. A failure of a detached task goes to the lost-failure hook.
    pub fn detach(self) {
        Slot::<T>::from(self).detach();
    }

    /// Binds the task into a slot with an explicit lock parameter.
    pub fn into_slot<L: RawMutex>(self) -> Slot<T, L> {
        Slot::from_framed(self.framed)
    }
}

impl<T: 'static, L: RawMutex> From<Task<T>> for Slot<T, L> {
    fn from(task: Task<T>) -> Self {
        task.into_slot()
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("framed", &self.framed).finish()
    }
}

/// Whether the slot currently driving a task has a consumer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Bind {
    /// Someone observes the result (an await, a callback).
    Bound,
    /// The task runs with its result discarded.
    Detached,
}

thread_local! {
    /// The binding of the innermost task poll running on this thread.
    static BINDING: Cell<Option<Bind>> = const { Cell::new(None) };
}

/// Runs `poll_body` with the current-task binding set, restoring the
/// enclosing one afterwards (task bodies nest when one awaits another).
pub(crate) fn with_binding<R>(bind: Bind, poll_body: impl FnOnce() -> R) -> R {
    let previous = BINDING.with(|b| b.replace(Some(bind)));
    let result = poll_body();
    BINDING.with(|b| b.set(previous));
    result
}

/// Probes, from inside a task body, whether the task runs detached.
///
/// Resolves without suspending. A detached task still has to produce a
/// result, but it may produce a cheap or inaccurate one, knowing nobody will
/// read it:
///
/// ```rust
/// use handoff::{Task, detached};
///
/// let task = Task::new(async {
///     if detached().await {
///         0 // skip the expensive part
///     } else {
///         expensive_computation().await
///     }
/// });
/// # async fn expensive_computation() -> u32 { 1 }
/// # task.detach();
/// ```
pub fn detached() -> Detached {
    Detached { _private: () }
}

/// Future returned by [`detached`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Detached {
    _private: (),
}

impl Future for Detached {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Outside any task poll the question has no driver to be detached
        // from; answer "not detached".
        Poll::Ready(BINDING.with(Cell::get) == Some(Bind::Detached))
    }
}

/// The hook invoked with failures nobody will ever observe.
///
/// A producer that fails while running detached has no slot to deliver the
/// fault to; instead of dropping it silently the library hands it here.
static LOST_FAILURE_HOOK: Mutex<fn(&Fault)> = Mutex::new(default_lost_failure_hook);

fn default_lost_failure_hook(fault: &Fault) {
    eprintln!("handoff: a detached producer failed: {fault}");
}

/// Replaces the process-global lost-failure hook.
///
/// Install the replacement before any task runs; the hook may fire from any
/// thread that drives detached work. Returning from the hook resumes normal
/// execution - it is valid to just log and carry on.
pub fn set_lost_failure_hook(hook: fn(&Fault)) {
    *LOST_FAILURE_HOOK.lock() = hook;
}

pub(crate) fn report_lost_failure(fault: &Fault) {
    let hook = *LOST_FAILURE_HOOK.lock();
    hook(fault);
}
