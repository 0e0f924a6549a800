use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::thread::{self, Thread};

use futures::task::ArcWake;

/// Blocks the current thread until `future` resolves.
///
/// This is the bridge from non-suspendable code into the asynchronous world:
/// a signaling waker is attached, the thread parks between polls, and the
/// final value is produced on the calling thread.
///
/// Completions may arrive from any thread. Do not use this for futures whose
/// completion can only happen on the calling thread itself (they would park
/// forever), nor for ones that must resume on a particular executor.
///
/// # Example
///
/// ```rust
/// use handoff::{Slot, sync_wait};
///
/// let value = sync_wait(Slot::<u32>::with_value(3));
/// assert_eq!(value.unwrap(), 3);
/// ```
pub fn sync_wait<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);
    let signal = Arc::new(Signal {
        notified: AtomicBool::new(false),
        thread: thread::current(),
    });
    let waker = futures::task::waker(Arc::clone(&signal));
    let mut cx = Context::from_waker(&waker);

    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
        while !signal.notified.swap(false, Ordering::Acquire) {
            thread::park();
        }
    }
}

/// The signaling frame: an atomic flag plus the parked thread.
struct Signal {
    notified: AtomicBool,
    thread: Thread,
}

impl ArcWake for Signal {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.notified.store(true, Ordering::Release);
        arc_self.thread.unpark();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::slot::Slot;
    use crate::test_utils::with_watchdog;

    use super::*;

    #[test]
    fn ready_future_returns_without_parking() {
        assert_eq!(sync_wait(async { 12 }), 12);
    }

    #[test]
    fn cross_thread_completion_unparks() {
        with_watchdog(|| {
            let (slot, completer) = Slot::<u32, crate::SyncLock>::channel();
            let producer = thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                completer.set(99).resume();
            });
            assert_eq!(sync_wait(slot).unwrap(), 99);
            producer.join().unwrap();
        });
    }

    #[test]
    fn spurious_unparks_are_tolerated() {
        with_watchdog(|| {
            let main = thread::current();
            let (slot, completer) = Slot::<u32, crate::SyncLock>::channel();
            let noise = thread::spawn(move || {
                for _ in 0..10 {
                    main.unpark();
                    thread::sleep(Duration::from_millis(1));
                }
                completer.set(4).resume();
            });
            assert_eq!(sync_wait(slot).unwrap(), 4);
            noise.join().unwrap();
        });
    }
}
