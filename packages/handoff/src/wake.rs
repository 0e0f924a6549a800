use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::task::Waker;

use crate::driver::DriverCell;

/// An owned, at-most-once wake signal.
///
/// Every boundary-crossing operation in this crate returns a `Wakeup` instead
/// of waking inline: setting a value through a [`Completer`], closing a
/// [`Queue`], broadcasting through a [`Distributor`]. The caller decides where
/// the signal fires - immediately by dropping it, batched through a
/// [`WakeupList`] after a lock is released, or deferred onto the per-thread
/// trampoline with [`defer`](Wakeup::defer).
///
/// Dropping an armed `Wakeup` delivers the signal; [`cancel`](Wakeup::cancel)
/// discards it; [`release`](Wakeup::release) extracts the raw waker. Exactly
/// one of these happens over the signal's lifetime.
///
/// [`Completer`]: crate::Completer
/// [`Queue`]: crate::Queue
/// [`Distributor`]: crate::Distributor
#[derive(Default)]
#[must_use = "dropping a wakeup delivers it immediately; store it to postpone the wake"]
pub struct Wakeup {
    waker: Option<Waker>,
}

impl Wakeup {
    /// A signal that wakes nobody.
    pub const fn empty() -> Self {
        Self { waker: None }
    }

    /// Wraps a waker into an owned signal.
    pub fn from_waker(waker: Waker) -> Self {
        Self { waker: Some(waker) }
    }

    /// Whether dropping this signal would wake anyone.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.waker.is_some()
    }

    /// Whether this signal would wake the same task as `waker`.
    #[must_use]
    pub fn will_wake(&self, waker: &Waker) -> bool {
        self.waker.as_ref().is_some_and(|w| w.will_wake(waker))
    }

    /// Delivers the signal now.
    pub fn resume(mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    /// Discards the signal without waking.
    pub fn cancel(mut self) {
        self.waker = None;
    }

    /// Extracts the raw waker, leaving delivery to the caller.
    #[must_use]
    pub fn release(mut self) -> Option<Waker> {
        self.waker.take()
    }

    /// Delivers the signal through the per-thread trampoline.
    ///
    /// When no trampoline drain is running this is equivalent to
    /// [`resume`](Wakeup::resume); when called from inside one (that is, from
    /// code that is itself running under a deferred wake) the signal is
    /// queued and fires after the current resume unwinds, bounding recursion
    /// depth.
    pub fn defer(mut self) {
        if let Some(waker) = self.waker.take() {
            defer(Deferred::Wake(waker));
        }
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

impl fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wakeup")
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// A batch of wake signals, delivered together when dropped.
///
/// Containers collect the signals produced while their lock is held and let
/// the batch fire after the guard is released, so no consumer ever runs under
/// a container lock.
#[derive(Debug, Default)]
pub struct WakeupList {
    wakeups: Vec<Wakeup>,
}

impl WakeupList {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a signal to the batch; unarmed signals are discarded.
    pub fn push(&mut self, wakeup: Wakeup) {
        if wakeup.is_armed() {
            self.wakeups.push(wakeup);
        }
    }

    /// Number of armed signals held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wakeups.len()
    }

    /// Whether the batch holds no signals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wakeups.is_empty()
    }

    /// Delivers every held signal now, in insertion order.
    pub fn resume_all(&mut self) {
        for wakeup in self.wakeups.drain(..) {
            wakeup.resume();
        }
    }
}

impl Drop for WakeupList {
    fn drop(&mut self) {
        self.resume_all();
    }
}

/// A unit of work queued on the per-thread trampoline.
pub(crate) enum Deferred {
    /// Deliver a plain wake.
    Wake(Waker),
    /// Poll an inline driver task.
    Drive(Rc<DriverCell>),
}

struct Trampoline {
    draining: bool,
    queue: VecDeque<Deferred>,
}

thread_local! {
    static TRAMPOLINE: RefCell<Trampoline> = RefCell::new(Trampoline {
        draining: false,
        queue: VecDeque::new(),
    });
}

/// Runs `work` now, or queues it when a drain is already active on this
/// thread.
///
/// This is the recursion guard for inline resumption: a chain of wakes that
/// would otherwise nest (a driver whose callback releases a mutex whose next
/// owner is another driver, and so on) is flattened into a FIFO processed by
/// the outermost call.
pub(crate) fn defer(work: Deferred) {
    let first = TRAMPOLINE.with(|t| {
        let mut t = t.borrow_mut();
        if t.draining {
            t.queue.push_back(work);
            None
        } else {
            t.draining = true;
            Some(work)
        }
    });
    let Some(first) = first else {
        return;
    };

    let _guard = DrainGuard;
    let mut next = Some(first);
    while let Some(work) = next {
        match work {
            Deferred::Wake(waker) => waker.wake(),
            Deferred::Drive(cell) => cell.run(),
        }
        next = TRAMPOLINE.with(|t| t.borrow_mut().queue.pop_front());
    }
}

/// Clears the draining flag even when a queued wake panics, so the thread's
/// trampoline stays usable. Work still queued at that point is dropped.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|t| {
            let mut t = t.borrow_mut();
            t.draining = false;
            t.queue.clear();
        });
    }
}
