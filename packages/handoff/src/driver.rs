use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use std::thread::{self, ThreadId};

use crate::wake::{self, Deferred};

/// Runs a future without an executor, polling it inline on its wake path.
///
/// This is the minimal driver behind `Slot::on_ready` and `Slot::detach`:
/// the future is polled once right away, and afterwards every wake delivered
/// to its waker polls it again on the waking thread. Chained wakes are
/// flattened through the per-thread trampoline, so arbitrarily long
/// resume-chains run iteratively instead of recursing.
///
/// The driven future is not `Send`, so its waker is thread-bound: waking it
/// from another thread panics rather than corrupting the reference count.
/// Cross-thread completions belong to executor-driven consumers, not to the
/// inline driver.
pub(crate) fn spawn_inline<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    let cell = Rc::new(DriverCell {
        future: RefCell::new(Some(Box::pin(future))),
        done: Cell::new(false),
        thread: thread::current().id(),
    });
    wake::defer(Deferred::Drive(cell));
}

/// One inline-driven task.
pub(crate) struct DriverCell {
    future: RefCell<Option<Pin<Box<dyn Future<Output = ()> + 'static>>>>,
    done: Cell<bool>,
    thread: ThreadId,
}

impl DriverCell {
    /// Polls the task once. Called from the trampoline only, which
    /// serializes runs on this thread.
    #[cfg_attr(test, mutants::skip)] // Mutations here mostly produce lost wakes, which time out.
    pub(crate) fn run(self: Rc<Self>) {
        if self.done.get() {
            return;
        }
        let waker = waker_for(&self);
        let mut cx = Context::from_waker(&waker);
        let poll = {
            let mut future = self.future.borrow_mut();
            match future.as_mut() {
                Some(future) => future.as_mut().poll(&mut cx),
                None => Poll::Ready(()),
            }
        };
        if poll.is_ready() {
            self.done.set(true);
            *self.future.borrow_mut() = None;
        }
    }

    fn guard_thread(&self, operation: &str) {
        assert!(
            self.thread == thread::current().id(),
            "an inline-driven task was {operation} from a foreign thread; \
             cross-thread completions need an executor-driven consumer"
        );
    }
}

fn waker_for(cell: &Rc<DriverCell>) -> Waker {
    let data = Rc::into_raw(Rc::clone(cell)).cast::<()>();
    // SAFETY: The vtable below upholds the RawWaker contract over an
    // `Rc<DriverCell>` reference owned by the waker.
    unsafe { Waker::from_raw(RawWaker::new(data, &VTABLE)) }
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

/// # Safety
///
/// `data` must be an `Rc<DriverCell>` reference produced by `waker_for` or
/// `clone_raw`.
unsafe fn clone_raw(data: *const ()) -> RawWaker {
    let cell = data.cast::<DriverCell>();
    // SAFETY: The waker owns a strong reference, so the cell is alive; the
    // thread id is immutable after construction, so this read is race-free
    // even if the clone happens on a foreign thread.
    unsafe { &*cell }.guard_thread("cloned");
    // SAFETY: Same-thread (just checked), and the count is at least one.
    unsafe { Rc::increment_strong_count(cell) };
    RawWaker::new(data, &VTABLE)
}

/// # Safety
///
/// As for `clone_raw`; consumes the reference.
unsafe fn wake_raw(data: *const ()) {
    let cell = data.cast::<DriverCell>();
    // SAFETY: See `clone_raw`.
    unsafe { &*cell }.guard_thread("woken");
    // SAFETY: Consuming the reference this waker owns, on its home thread.
    let cell = unsafe { Rc::from_raw(cell) };
    wake::defer(Deferred::Drive(cell));
}

/// # Safety
///
/// As for `clone_raw`; the reference is retained.
unsafe fn wake_by_ref_raw(data: *const ()) {
    let cell = data.cast::<DriverCell>();
    // SAFETY: See `clone_raw`.
    unsafe { &*cell }.guard_thread("woken");
    // SAFETY: Same-thread, count at least one; the new reference is handed
    // to the trampoline.
    unsafe { Rc::increment_strong_count(cell) };
    // SAFETY: Takes ownership of the reference created just above.
    let cell = unsafe { Rc::from_raw(cell) };
    wake::defer(Deferred::Drive(cell));
}

/// # Safety
///
/// As for `clone_raw`; consumes the reference.
unsafe fn drop_raw(data: *const ()) {
    let cell = data.cast::<DriverCell>();
    // SAFETY: See `clone_raw` for why the read is valid.
    if unsafe { &*cell }.thread != thread::current().id() {
        // Dropping the reference here would race the count. Leaking one
        // reference is the only sound option left; the paired panic on
        // wake/clone makes the misuse loud elsewhere.
        return;
    }
    // SAFETY: Consuming the reference this waker owns, on its home thread.
    drop(unsafe { Rc::from_raw(cell) });
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crate::slot::Slot;
    use crate::wake::Wakeup;
    use crate::{Completer, LocalLock};

    use super::*;

    #[test]
    fn ready_work_runs_before_spawn_returns() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let observer = Rc::clone(&log);
        spawn_inline(async move {
            observer.borrow_mut().push("ran");
        });
        assert_eq!(*log.borrow(), vec!["ran"]);
    }

    #[test]
    fn wakes_poll_the_task_inline() {
        let parked: Rc<RefCell<Option<Completer<u32, LocalLock>>>> = Rc::new(RefCell::new(None));
        let stash = Rc::clone(&parked);
        let observed = Rc::new(RefCell::new(None));
        let output = Rc::clone(&observed);

        spawn_inline(async move {
            let slot = Slot::<u32>::defer(move |done| {
                *stash.borrow_mut() = Some(done);
                Wakeup::empty()
            });
            let value = slot.await;
            *output.borrow_mut() = Some(value);
        });
        assert!(observed.borrow().is_none());

        let done = parked.borrow_mut().take().expect("producer ran on first poll");
        done.set(5).resume();
        assert!(matches!(*observed.borrow(), Some(Ok(5))));
    }

    #[test]
    fn chained_wakes_do_not_recurse_unboundedly() {
        // Task i completes slot i+1 from inside its own poll; without the
        // trampoline this chain would nest ten thousand frames deep.
        const CHAIN: usize = 10_000;

        let mut slots = Vec::with_capacity(CHAIN + 1);
        let mut completers = Vec::with_capacity(CHAIN + 1);
        for _ in 0..=CHAIN {
            let (slot, completer) = Slot::<u32>::channel();
            slots.push(slot);
            completers.push(completer);
        }
        let trigger = completers.remove(0);

        let finished = Rc::new(Cell::new(0_usize));
        let successors = completers.into_iter().map(Some).chain(std::iter::once(None));
        for (slot, next) in slots.into_iter().zip(successors) {
            let finished = Rc::clone(&finished);
            spawn_inline(async move {
                let _ = slot.await;
                finished.set(finished.get() + 1);
                if let Some(next) = next {
                    next.set(0).resume();
                }
            });
        }

        trigger.set(0).resume();
        assert_eq!(finished.get(), CHAIN + 1);
    }
}
