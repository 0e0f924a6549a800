use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use crate::error::Fault;
use crate::slot::{Outcome, Slot};

/// Drives one charged step of a generator; implemented by the generator's
/// shared state and carried inside the step's [`Slot`].
pub(crate) trait StepDrive<T> {
    fn drive(&self, cx: &mut Context<'_>) -> Poll<Outcome<T>>;
}

/// A restartable producer yielding a sequence of `T`, optionally receiving a
/// `P` back on each resume.
///
/// The body is an async closure handed a [`Yielder`]; every
/// [`emit`](Yielder::emit) suspends the body until the consumer asks for the
/// next value. Each [`resume`](Generator::resume) charges one step and hands
/// back a [`Slot`]: resolved with the yielded value, or canceled when the
/// body has completed. Resuming past the end just yields canceled slots.
///
/// ```rust
/// use handoff::Generator;
///
/// let fibonacci = Generator::<u64>::new(|y| async move {
///     let (mut a, mut b) = (0_u64, 1);
///     loop {
///         y.emit(a).await;
///         (a, b) = (b, a + b);
///     }
/// });
/// let first: Vec<u64> = fibonacci.iter().take(6).collect();
/// assert_eq!(first, [0, 1, 1, 2, 3, 5]);
/// ```
///
/// The argument-per-resume variant receives the consumer's value as the
/// output of `emit`:
///
/// ```rust
/// use futures::executor::block_on;
/// use handoff::Generator;
///
/// let mut echo = Generator::<u32, u32>::new(|y| async move {
///     let mut last = 0;
///     loop {
///         match y.emit(last).await {
///             Some(next) => last = next,
///             None => last += 1,
///         }
///     }
/// });
/// block_on(async {
///     let _ = echo.resume().await;
///     let step = echo.resume_with(10);
///     assert_eq!(step.await.unwrap(), 10);
/// });
/// ```
#[must_use = "a generator runs nothing until resumed"]
pub struct Generator<T, P = ()> {
    core: Rc<GenCore<T, P>>,
}

struct GenCore<T, P> {
    state: RefCell<GenState<T, P>>,
}

struct GenState<T, P> {
    /// The suspended body; `None` once it has run to completion.
    body: Option<Pin<Box<dyn Future<Output = ()> + 'static>>>,
    /// The value parked by the body's current `emit`, waiting for the
    /// driving step to harvest it.
    yielded: Option<Result<T, Fault>>,
    /// The argument of the current resume, waiting for the body's `emit` to
    /// pick it up.
    param: Option<P>,
}

impl<T: 'static, P: 'static> Generator<T, P> {
    /// Builds a generator from its body.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Yielder<T, P>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let core = Rc::new(GenCore {
            state: RefCell::new(GenState {
                body: None,
                yielded: None,
                param: None,
            }),
        });
        let yielder = Yielder {
            core: Rc::downgrade(&core),
        };
        core.state.borrow_mut().body = Some(Box::pin(body(yielder)));
        Self { core }
    }

    /// Charges the next step.
    pub fn resume(&mut self) -> Slot<T> {
        self.charge(None)
    }

    /// Charges the next step, passing `param` to the body's pending `emit`.
    pub fn resume_with(&mut self, param: P) -> Slot<T> {
        self.charge(Some(param))
    }

    fn charge(&mut self, param: Option<P>) -> Slot<T> {
        self.core.state.borrow_mut().param = param;
        let step: Rc<dyn StepDrive<T>> = self.core.clone();
        Slot::from_step(step)
    }

    /// Whether the body has run to completion.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.core.state.borrow().body.is_none()
    }

    /// A blocking iterator draining the generator.
    ///
    /// Each step is driven with [`sync_wait`](crate::sync_wait), so
    /// asynchronous generators work too, as long as their completions arrive
    /// from other threads.
    ///
    /// # Panics
    ///
    /// The iterator panics when a step resolves with an error; use
    /// [`resume`](Generator::resume) directly to observe failures.
    pub fn iter(self) -> IntoIter<T, P> {
        IntoIter { generator: self }
    }
}

impl<T: 'static, P: 'static> IntoIterator for Generator<T, P> {
    type Item = T;
    type IntoIter = IntoIter<T, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T, P> fmt::Debug for Generator<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("finished", &self.core.state.borrow().body.is_none())
            .finish()
    }
}

/// Blocking iterator returned by [`Generator::iter`].
#[derive(Debug)]
pub struct IntoIter<T: 'static, P: 'static> {
    generator: Generator<T, P>,
}

impl<T: 'static, P: 'static> Iterator for IntoIter<T, P> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let mut step = self.generator.resume();
        if !crate::sync_wait(step.ready()) {
            return None;
        }
        match step.take() {
            Ok(value) => Some(value),
            Err(failure) => panic!("generator step failed: {failure}"),
        }
    }
}

impl<T, P> StepDrive<T> for GenCore<T, P> {
    fn drive(&self, cx: &mut Context<'_>) -> Poll<Outcome<T>> {
        let mut body = {
            let mut state = self.state.borrow_mut();
            // A yield parked by an earlier poll of this same step.
            if let Some(step) = state.yielded.take() {
                return Poll::Ready(step_outcome(step));
            }
            match state.body.take() {
                Some(body) => body,
                None => return Poll::Ready(Outcome::Canceled),
            }
        };

        // The body is polled with the state borrow released: its `emit`
        // futures re-enter the state to park values and fetch arguments.
        let poll = body.as_mut().poll(cx);

        let mut state = self.state.borrow_mut();
        match poll {
            Poll::Ready(()) => {
                // End of the sequence; the body is gone for good.
                state.param = None;
                Poll::Ready(Outcome::Canceled)
            }
            Poll::Pending => {
                state.body = Some(body);
                match state.yielded.take() {
                    Some(step) => Poll::Ready(step_outcome(step)),
                    // Suspended on something other than an emit; the waker
                    // is already registered downstream.
                    None => Poll::Pending,
                }
            }
        }
    }
}

fn step_outcome<T>(step: Result<T, Fault>) -> Outcome<T> {
    match step {
        Ok(value) => Outcome::Value(value),
        Err(fault) => Outcome::Failed(fault),
    }
}

/// The body's side of a generator: the handle used to yield.
pub struct Yielder<T, P = ()> {
    core: Weak<GenCore<T, P>>,
}

impl<T, P> Yielder<T, P> {
    /// Yields one value; resolves on the next resume with the argument the
    /// consumer passed (if any).
    pub fn emit(&self, value: T) -> Emit<'_, T, P> {
        Emit {
            core: &self.core,
            step: Some(Ok(value)),
        }
    }

    /// Yields a failure for this step without ending the sequence; the
    /// consumer observes a failed slot and may keep resuming.
    pub fn raise(&self, fault: Fault) -> Emit<'_, T, P> {
        Emit {
            core: &self.core,
            step: Some(Err(fault)),
        }
    }
}

impl<T, P> fmt::Debug for Yielder<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielder").finish_non_exhaustive()
    }
}

/// Future returned by [`Yielder::emit`] and [`Yielder::raise`].
#[must_use = "an emit yields nothing until awaited"]
pub struct Emit<'y, T, P> {
    core: &'y Weak<GenCore<T, P>>,
    step: Option<Result<T, Fault>>,
}

/// The parked value would make `Emit` `!Unpin` for a `!Unpin` `T`, but it is
/// never polled in place - it moves into the generator state wholesale - so
/// nothing here requires structural pinning.
impl<T, P> Unpin for Emit<'_, T, P> {}

impl<T, P> Future for Emit<'_, T, P> {
    type Output = Option<P>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(core) = this.core.upgrade() else {
            // The generator is being torn down; stay suspended and let the
            // body be dropped.
            return Poll::Pending;
        };
        let mut state = core.state.borrow_mut();
        match this.step.take() {
            Some(step) => {
                // Park the value for the driving step to harvest. No waker
                // is registered: the next resume polls the body directly.
                state.yielded = Some(step);
                Poll::Pending
            }
            None => Poll::Ready(state.param.take()),
        }
    }
}

impl<T, P> fmt::Debug for Emit<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emit")
            .field("yielded", &self.step.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use static_assertions::assert_not_impl_any;

    use crate::error::Failure;

    use super::*;

    fn fibonacci(count: usize) -> Generator<u64> {
        Generator::new(move |y| async move {
            let (mut a, mut b) = (0_u64, 1);
            for _ in 0..count {
                y.emit(a).await;
                (a, b) = (b, a + b);
            }
        })
    }

    #[test]
    fn yields_the_sequence_then_ends() {
        let collected: Vec<u64> = fibonacci(10).iter().collect();
        assert_eq!(collected, [0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
    }

    #[test]
    fn resuming_past_the_end_stays_canceled() {
        block_on(async {
            let mut numbers = Generator::<u64>::new(|y| async move {
                y.emit(1).await;
            });
            assert_eq!(numbers.resume().await.unwrap(), 1);
            assert!(matches!(numbers.resume().await, Err(Failure::Canceled)));
            assert!(numbers.is_finished());
            assert!(matches!(numbers.resume().await, Err(Failure::Canceled)));
        });
    }

    #[test]
    fn ready_probe_drives_a_step_without_consuming() {
        block_on(async {
            let mut numbers = fibonacci(2);
            let mut step = numbers.resume();
            assert!(step.ready().await);
            assert_eq!(step.take().unwrap(), 0);

            let mut step = numbers.resume();
            assert!(step.ready().await);
            assert_eq!(step.take().unwrap(), 1);

            let mut step = numbers.resume();
            assert!(!step.ready().await);
        });
    }

    #[test]
    fn arguments_flow_back_into_the_body() {
        block_on(async {
            let mut adder = Generator::<u32, u32>::new(|y| async move {
                let mut total = 0;
                loop {
                    if let Some(n) = y.emit(total).await {
                        total += n;
                    }
                }
            });
            assert_eq!(adder.resume().await.unwrap(), 0);
            assert_eq!(adder.resume_with(5).await.unwrap(), 5);
            assert_eq!(adder.resume_with(7).await.unwrap(), 12);
            assert_eq!(adder.resume().await.unwrap(), 12);
        });
    }

    #[test]
    fn raise_fails_one_step_and_continues() {
        block_on(async {
            let mut flaky = Generator::<u32>::new(|y| async move {
                y.emit(1).await;
                y.raise(Fault::msg("hiccup")).await;
                y.emit(2).await;
            });
            assert_eq!(flaky.resume().await.unwrap(), 1);
            let failure = flaky.resume().await.unwrap_err();
            assert_eq!(failure.to_string(), "hiccup");
            assert_eq!(flaky.resume().await.unwrap(), 2);
            assert!(matches!(flaky.resume().await, Err(Failure::Canceled)));
        });
    }

    #[test]
    fn dropping_an_uncharged_step_abandons_it() {
        block_on(async {
            let mut numbers = fibonacci(3);
            drop(numbers.resume());
            // The body never advanced: the first value is still there.
            assert_eq!(numbers.resume().await.unwrap(), 0);
        });
    }

    #[test]
    fn single_threaded_types() {
        assert_not_impl_any!(Generator<u64>: Send, Sync);
    }
}
