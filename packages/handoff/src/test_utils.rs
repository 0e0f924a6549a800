//! Shared helpers for tests that block.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How long a blocking test may run before it is declared hung.
const DEADLINE: Duration = Duration::from_secs(10);

/// Fails a blocking test loudly when it stops making progress.
///
/// The characteristic failure mode of broken hand-off plumbing is not a wrong
/// value but a lost wake signal: some consumer stays parked forever. The body
/// therefore runs on its own thread while this thread parks with a deadline -
/// the same loop [`sync_wait`](crate::sync_wait) runs, minus the infinite
/// patience.
pub(crate) fn with_watchdog<F, R>(body: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let finished = Arc::new(AtomicBool::new(false));

    let signal = WakeOnExit {
        finished: Arc::clone(&finished),
        watchdog: thread::current(),
    };
    let body_thread = thread::spawn(move || {
        let _signal = signal;
        body()
    });

    let started = Instant::now();
    while !finished.load(Ordering::Acquire) {
        match DEADLINE.checked_sub(started.elapsed()) {
            Some(remaining) => thread::park_timeout(remaining),
            None => panic!("blocking test still parked after {DEADLINE:?} - a wake signal was lost"),
        }
    }
    match body_thread.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Unparks the watchdog on every exit path of the body, panics included.
struct WakeOnExit {
    finished: Arc<AtomicBool>,
    watchdog: thread::Thread,
}

impl Drop for WakeOnExit {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::Release);
        self.watchdog.unpark();
    }
}
