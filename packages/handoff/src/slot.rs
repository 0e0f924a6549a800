use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use lock_api::RawMutex;

use crate::error::{Failure, Fault, InvalidState};
use crate::framed::Framed;
use crate::generator::StepDrive;
use crate::lock::LocalLock;
use crate::starter::Starter;
use crate::task::{self, Bind};
use crate::wake::Wakeup;

/// How a slot ended up resolved.
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    /// A value was produced.
    Value(T),
    /// The producer finished without a value.
    Canceled,
    /// The producer delivered an error.
    Failed(Fault),
}

impl<T> Outcome<T> {
    pub(crate) fn into_result(self) -> Result<T, Failure> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Canceled => Err(Failure::Canceled),
            Self::Failed(fault) => Err(Failure::Faulted(fault)),
        }
    }

    pub(crate) fn from_result(result: Result<T, Failure>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(Failure::Canceled) => Self::Canceled,
            Err(Failure::Faulted(fault)) => Self::Failed(fault),
        }
    }

    fn has_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    fn is_present(&self) -> bool {
        !matches!(self, Self::Canceled)
    }
}

/// The state shared between a slot and its write end.
pub(crate) struct SlotCore<T, L: RawMutex> {
    state: lock_api::Mutex<L, Inner<T>>,
}

struct Inner<T> {
    outcome: Option<Outcome<T>>,
    waker: Option<Waker>,
    /// Set once the outcome has been extracted.
    taken: bool,
    /// Set when the consuming `Slot` handle is dropped; later writes are
    /// discarded.
    consumer_gone: bool,
}

impl<T, L: RawMutex> SlotCore<T, L> {
    fn new(outcome: Option<Outcome<T>>) -> Arc<Self> {
        Arc::new(Self {
            state: lock_api::Mutex::new(Inner {
                outcome,
                waker: None,
                taken: false,
                consumer_gone: false,
            }),
        })
    }

    /// Publishes the consumer's waker.
    fn register(&self, waker: &Waker) {
        let mut inner = self.state.lock();
        match &inner.waker {
            Some(current) if current.will_wake(waker) => {}
            _ => inner.waker = Some(waker.clone()),
        }
    }

    /// Consumer-side poll of an externally produced outcome.
    fn poll_resolved(&self, waker: &Waker) -> Poll<()> {
        let mut inner = self.state.lock();
        if inner.outcome.is_some() || inner.taken {
            return Poll::Ready(());
        }
        match &inner.waker {
            Some(current) if current.will_wake(waker) => {}
            _ => inner.waker = Some(waker.clone()),
        }
        Poll::Pending
    }

    /// Stores an outcome produced while the consumer itself was polling; no
    /// wake is needed because the consumer is already awake.
    fn store_quiet(&self, outcome: Outcome<T>) {
        let mut inner = self.state.lock();
        if inner.outcome.is_none() && !inner.taken {
            inner.outcome = Some(outcome);
        }
    }

    /// Producer-side completion. Returns the consumer's wake signal.
    ///
    /// A failure that no consumer will ever observe is handed to the
    /// lost-failure hook instead of being dropped silently.
    #[cfg_attr(test, mutants::skip)] // Mutations here mostly produce lost wakes, which time out.
    fn complete(&self, outcome: Outcome<T>) -> Wakeup {
        let lost = {
            let mut inner = self.state.lock();
            if inner.outcome.is_some() || inner.taken {
                None
            } else if inner.consumer_gone {
                match outcome {
                    Outcome::Failed(fault) => Some(fault),
                    Outcome::Value(_) | Outcome::Canceled => None,
                }
            } else {
                inner.outcome = Some(outcome);
                return inner.waker.take().map_or_else(Wakeup::empty, Wakeup::from_waker);
            }
        };
        if let Some(fault) = lost {
            task::report_lost_failure(&fault);
        }
        Wakeup::empty()
    }

    /// Like [`complete`](Self::complete) with a value, but hands the value
    /// back when the consumer is gone.
    fn try_complete(&self, value: T) -> Result<Wakeup, T> {
        let mut inner = self.state.lock();
        if inner.consumer_gone || inner.outcome.is_some() || inner.taken {
            return Err(value);
        }
        inner.outcome = Some(Outcome::Value(value));
        Ok(inner.waker.take().map_or_else(Wakeup::empty, Wakeup::from_waker))
    }

    /// Completion that constructs the value only if a consumer will see it.
    fn complete_with(&self, make: impl FnOnce() -> T) -> Option<Wakeup> {
        let mut inner = self.state.lock();
        if inner.consumer_gone || inner.outcome.is_some() || inner.taken {
            return None;
        }
        inner.outcome = Some(Outcome::Value(make()));
        Some(inner.waker.take().map_or_else(Wakeup::empty, Wakeup::from_waker))
    }

    fn consumer_dropped(&self) {
        let mut inner = self.state.lock();
        inner.consumer_gone = true;
        inner.waker = None;
    }

    fn is_resolved(&self) -> bool {
        let inner = self.state.lock();
        inner.outcome.is_some() || inner.taken
    }

    fn peek_has_value(&self) -> bool {
        self.state.lock().outcome.as_ref().is_some_and(Outcome::has_value)
    }

    fn peek_present(&self) -> bool {
        self.state.lock().outcome.as_ref().is_some_and(Outcome::is_present)
    }

    fn connected(&self) -> bool {
        let inner = self.state.lock();
        !inner.consumer_gone && inner.outcome.is_none() && !inner.taken
    }

    fn take_outcome(&self) -> Option<Outcome<T>> {
        let mut inner = self.state.lock();
        let outcome = inner.outcome.take();
        if outcome.is_some() {
            inner.taken = true;
        }
        outcome
    }

    /// Discards a resolved outcome, leaving the slot canceled. `false` when
    /// the slot is still in flight.
    fn cancel_resolved(&self) -> bool {
        let discarded = {
            let mut inner = self.state.lock();
            if inner.outcome.is_some() || inner.taken {
                let old = inner.outcome.replace(Outcome::Canceled);
                inner.taken = false;
                Some(old)
            } else {
                None
            }
        };
        // The discarded value may have a reactive drop (an ownership token,
        // say); it runs here, with the slot lock released.
        discarded.is_some()
    }

    fn clone_resolved(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        match &self.state.lock().outcome {
            Some(Outcome::Value(value)) => Some(Outcome::Value(value.clone())),
            Some(Outcome::Failed(fault)) => Some(Outcome::Failed(fault.clone())),
            Some(Outcome::Canceled) => Some(Outcome::Canceled),
            None => None,
        }
    }
}

/// The write end of a slot: the unique permit to resolve it.
///
/// A completer exists in strict 1:1 correspondence with its pending slot.
/// Every way of finishing - [`set`](Completer::set), [`fail`](Completer::fail),
/// [`cancel`](Completer::cancel) - consumes the permit and returns the
/// consumer's [`Wakeup`], which the caller delivers wherever appropriate
/// (typically after releasing its own lock). Dropping a completer that never
/// set anything resolves the slot as canceled and wakes the consumer
/// immediately.
///
/// With the thread-safe lock parameter the completer may travel to another
/// thread, which is how external event sources (I/O callbacks, timers)
/// deliver results back into a single-threaded consumer.
#[must_use = "a dropped completer cancels its slot"]
pub struct Completer<T, L: RawMutex = LocalLock> {
    core: Option<Arc<SlotCore<T, L>>>,
}

impl<T, L: RawMutex> Completer<T, L> {
    fn for_core(core: Arc<SlotCore<T, L>>) -> Self {
        Self { core: Some(core) }
    }

    /// A permit with no slot behind it: everything written is discarded.
    ///
    /// This is what a producer receives when it runs detached.
    pub fn disconnected() -> Self {
        Self { core: None }
    }

    /// Whether a consumer can still observe a completion.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.core.as_deref().is_some_and(SlotCore::connected)
    }

    /// Resolves the slot with a value.
    pub fn set(self, value: T) -> Wakeup {
        self.deliver(Outcome::Value(value))
    }

    /// Resolves the slot with a value, handing the value back when the
    /// consumer is gone.
    pub fn try_set(mut self, value: T) -> Result<Wakeup, T> {
        match self.core.take() {
            Some(core) => core.try_complete(value),
            None => Err(value),
        }
    }

    /// Resolves the slot with a value constructed only if a consumer will
    /// observe it. Returns `None` when the consumer is gone.
    pub fn set_with(mut self, make: impl FnOnce() -> T) -> Option<Wakeup> {
        match self.core.take() {
            Some(core) => core.complete_with(make),
            None => None,
        }
    }

    /// Resolves the slot with an error.
    pub fn fail(self, fault: Fault) -> Wakeup {
        self.deliver(Outcome::Failed(fault))
    }

    /// Resolves the slot empty; the consumer observes cancelation.
    pub fn cancel(self) -> Wakeup {
        self.deliver(Outcome::Canceled)
    }

    /// Resolves the slot from an already-shaped result.
    pub fn complete(self, result: Result<T, Failure>) -> Wakeup {
        self.deliver(Outcome::from_result(result))
    }

    fn deliver(mut self, outcome: Outcome<T>) -> Wakeup {
        match self.core.take() {
            Some(core) => core.complete(outcome),
            None => {
                if let Outcome::Failed(fault) = outcome {
                    task::report_lost_failure(&fault);
                }
                Wakeup::empty()
            }
        }
    }
}

impl<T, L: RawMutex> Drop for Completer<T, L> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            // An abandoned permit empties the slot; the wake fires right
            // here, there is no caller to hand it to.
            core.complete(Outcome::Canceled).resume();
        }
    }
}

impl<T, L: RawMutex> fmt::Debug for Completer<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// The not-yet-run producer carried inside a pending slot.
pub(crate) enum Producer<T, L: RawMutex> {
    /// A lazily started task, polled by the consumer.
    Task(Framed<Outcome<T>>),
    /// One step of a generator, driven through its shared state.
    Step(Rc<dyn StepDrive<T>>),
    /// A completion closure, invoked once with the write end.
    Start(Starter<T, L>),
}

/// An asynchronous result slot.
///
/// A slot unifies every way a value can arrive: it may be born resolved
/// ([`with_value`](Slot::with_value), [`failed`](Slot::failed),
/// [`canceled`](Slot::canceled)), hold a task that starts on first await
/// (`Slot::from(task)`), hold a completion closure invoked on first await
/// ([`defer`](Slot::defer)), or wait on a write end donated to a container
/// ([`channel`](Slot::channel)). Combinators therefore operate on homogeneous
/// collections of `Slot<T>` regardless of where each value comes from.
///
/// Awaiting a slot yields `Result<T, Failure>`. [`ready`](Slot::ready) drives
/// the slot without consuming the outcome, reporting only whether something
/// is there - the loop idiom for draining queues and generators:
///
/// ```rust
/// use futures::executor::block_on;
/// use handoff::Slot;
///
/// block_on(async {
///     let mut slot = Slot::<u32>::with_value(7);
///     assert!(slot.ready().await);
///     assert_eq!(slot.take().unwrap(), 7);
/// });
/// ```
///
/// The consuming side of a slot is single-threaded; parallelism enters
/// through the write end (see [`Completer`]).
#[must_use = "a slot does nothing until awaited, and dropping one cancels or detaches its producer"]
pub struct Slot<T, L: RawMutex = LocalLock> {
    core: Arc<SlotCore<T, L>>,
    producer: Option<Producer<T, L>>,
}

/// A [`Slot`] whose write end may complete from another thread.
pub type SharedSlot<T> = Slot<T, crate::lock::SyncLock>;

impl<T, L: RawMutex> Slot<T, L> {
    /// A slot resolved with a value.
    pub fn with_value(value: T) -> Self {
        Self {
            core: SlotCore::new(Some(Outcome::Value(value))),
            producer: None,
        }
    }

    /// A slot resolved empty; awaiting it reports cancelation.
    pub fn canceled() -> Self {
        Self {
            core: SlotCore::new(Some(Outcome::Canceled)),
            producer: None,
        }
    }

    /// A slot resolved with an error.
    pub fn failed(fault: Fault) -> Self {
        Self {
            core: SlotCore::new(Some(Outcome::Failed(fault))),
            producer: None,
        }
    }

    /// A pending slot whose producer closure runs on first await.
    ///
    /// The closure receives the unique write end and returns the wake signal
    /// it wants delivered on the caller's side - [`Wakeup::empty`] when the
    /// operation suspended, or the signal produced by an immediate
    /// completion. Closures capturing at most a few words are stored inline
    /// in the slot; larger captures are boxed.
    ///
    /// If the slot is dropped without ever being awaited, the closure still
    /// runs, with a [disconnected](Completer::disconnected) write end, so the
    /// side effects of starting the operation are not lost.
    pub fn defer<F>(producer: F) -> Self
    where
        F: FnOnce(Completer<T, L>) -> Wakeup + 'static,
    {
        Self {
            core: SlotCore::new(None),
            producer: Some(Producer::Start(Starter::new(producer))),
        }
    }

    /// A pending slot together with its write end.
    ///
    /// This is the building block containers use: the slot goes back to the
    /// consumer, the completer into the container's waiter list.
    pub fn channel() -> (Self, Completer<T, L>) {
        let core = SlotCore::new(None);
        (
            Self {
                core: Arc::clone(&core),
                producer: None,
            },
            Completer::for_core(core),
        )
    }

    pub(crate) fn from_framed(framed: Framed<Outcome<T>>) -> Self {
        Self {
            core: SlotCore::new(None),
            producer: Some(Producer::Task(framed)),
        }
    }

    pub(crate) fn from_step(step: Rc<dyn StepDrive<T>>) -> Self {
        Self {
            core: SlotCore::new(None),
            producer: Some(Producer::Step(step)),
        }
    }

    /// Whether the slot is resolved (a further await returns synchronously).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.producer.is_none() && self.core.is_resolved()
    }

    /// Whether the slot is resolved with a value.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.producer.is_none() && self.core.peek_has_value()
    }

    /// Drives the slot one step: starts the producer if it has not run yet,
    /// publishes the waker, and reports whether the slot is now resolved.
    pub(crate) fn poll_drive(&mut self, cx: &mut Context<'_>, bind: Bind) -> Poll<()> {
        match self.producer.take() {
            None => self.core.poll_resolved(cx.waker()),
            Some(Producer::Task(mut framed)) => {
                match task::with_binding(bind, || framed.poll(cx)) {
                    Poll::Ready(outcome) => {
                        self.core.store_quiet(outcome);
                        Poll::Ready(())
                    }
                    Poll::Pending => {
                        self.producer = Some(Producer::Task(framed));
                        Poll::Pending
                    }
                }
            }
            Some(Producer::Step(step)) => match task::with_binding(bind, || step.drive(cx)) {
                Poll::Ready(outcome) => {
                    self.core.store_quiet(outcome);
                    Poll::Ready(())
                }
                Poll::Pending => {
                    self.producer = Some(Producer::Step(step));
                    Poll::Pending
                }
            },
            Some(Producer::Start(starter)) => {
                // Bind the consumer before the producer runs so a synchronous
                // completion finds the waker in place.
                self.core.register(cx.waker());
                let wakeup = starter.invoke(Completer::for_core(Arc::clone(&self.core)));
                if self.core.is_resolved() {
                    // The producer finished inline; its wake signal targets
                    // the very consumer that is polling right now.
                    if wakeup.will_wake(cx.waker()) {
                        wakeup.cancel();
                    } else {
                        wakeup.resume();
                    }
                    Poll::Ready(())
                } else {
                    wakeup.resume();
                    Poll::Pending
                }
            }
        }
    }

    /// Drives the slot to resolution and reports whether it holds a value or
    /// an error (`true`) as opposed to being canceled/empty (`false`).
    ///
    /// Unlike awaiting the slot itself, this never consumes the outcome and
    /// never propagates the stored error; pair it with [`take`](Slot::take).
    pub fn ready(&mut self) -> ReadyProbe<'_, T, L> {
        ReadyProbe { slot: self }
    }

    /// Extracts the outcome of a resolved slot.
    ///
    /// # Panics
    ///
    /// Panics when the slot is not resolved or the outcome was already taken.
    pub fn take(&mut self) -> Result<T, Failure> {
        match self.try_take() {
            Some(result) => result,
            None => panic!("the slot is not resolved, or its outcome was already taken"),
        }
    }

    /// Extracts the outcome of a resolved slot, or `None` when there is
    /// nothing to extract yet.
    pub fn try_take(&mut self) -> Option<Result<T, Failure>> {
        if self.producer.is_some() {
            return None;
        }
        self.core.take_outcome().map(Outcome::into_result)
    }

    /// Clones the resolved state into a fresh slot; a pending slot clones to
    /// a canceled one.
    #[must_use]
    pub fn copy_value(&self) -> Self
    where
        T: Clone,
    {
        match if self.producer.is_none() {
            self.core.clone_resolved()
        } else {
            None
        } {
            Some(Outcome::Value(value)) => Self::with_value(value),
            Some(Outcome::Failed(fault)) => Self::failed(fault),
            Some(Outcome::Canceled) | None => Self::canceled(),
        }
    }

    /// Discards the slot's producer or resolved value, leaving it canceled.
    ///
    /// A producer that never ran is dropped without running - this is the way
    /// to prevent the detached start that plain dropping performs for
    /// closure producers. Fails with [`InvalidState`] when the producer is
    /// already in flight (the write end is out in the world).
    pub fn cancel(&mut self) -> Result<(), InvalidState> {
        if self.producer.take().is_some() {
            self.core.store_quiet(Outcome::Canceled);
            return Ok(());
        }
        if self.core.cancel_resolved() {
            Ok(())
        } else {
            Err(InvalidState)
        }
    }

    /// Blocks the current thread until the slot resolves.
    ///
    /// A convenience for top-level drivers; see [`sync_wait`](crate::sync_wait)
    /// for the caveats.
    pub fn wait(self) -> Result<T, Failure> {
        crate::sync_wait(self)
    }
}

impl<T: 'static> Slot<T, LocalLock> {
    /// Delivers the resolved outcome to a callback instead of a suspension
    /// point.
    ///
    /// When the slot is already resolved the callback runs before this call
    /// returns. Otherwise a minimal driver takes the slot over and invokes
    /// the callback on the thread where the completion lands; with the
    /// single-threaded lock that is always this thread.
    pub fn on_ready<F>(self, callback: F)
    where
        F: FnOnce(Result<T, Failure>) + 'static,
    {
        crate::driver::spawn_inline(OnReady {
            slot: self,
            callback: Some(callback),
        });
    }

    /// Runs the producer to completion with the result discarded.
    ///
    /// This is the opposite of dropping the slot: a drop cancels a
    /// never-started task outright, while `detach` binds it to a minimal
    /// inline driver that starts it and keeps polling it across suspensions
    /// until it finishes. A failure produced by a detached slot is handed to
    /// the lost-failure hook (see
    /// [`set_lost_failure_hook`](crate::set_lost_failure_hook)).
    pub fn detach(self) {
        crate::driver::spawn_inline(Detach { slot: self });
    }

    /// Moves this slot's state into a foreign write end.
    ///
    /// A resolved outcome is copied over directly; a producer that has not
    /// run is started against `target` (a task is re-bound, a closure
    /// receives `target` as its write end); an in-flight slot is chained so
    /// the outcome lands in `target` when it arrives.
    pub fn forward(mut self, target: Completer<T, LocalLock>) -> Wakeup {
        match self.producer.take() {
            Some(Producer::Start(starter)) => starter.invoke(target),
            Some(other) => {
                self.producer = Some(other);
                self.on_ready(move |result| target.complete(result).resume());
                Wakeup::empty()
            }
            None => match self.core.take_outcome() {
                Some(outcome) => target.deliver(outcome),
                None => {
                    self.on_ready(move |result| target.complete(result).resume());
                    Wakeup::empty()
                }
            },
        }
    }
}

impl<T, L: RawMutex> Future for Slot<T, L> {
    type Output = Result<T, Failure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.poll_drive(cx, Bind::Bound) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => match this.core.take_outcome() {
                Some(outcome) => Poll::Ready(outcome.into_result()),
                None => panic!("slot polled again after its outcome was taken"),
            },
        }
    }
}

impl<T, L: RawMutex> Drop for Slot<T, L> {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            match producer {
                // A completion closure still runs, detached: the operation it
                // starts (an I/O registration, a timer) must not be silently
                // skipped. Its writes go nowhere.
                Producer::Start(starter) => starter.invoke(Completer::disconnected()).resume(),
                // Never-started tasks and generator steps are inert futures;
                // dropping them cancels. `detach` is the explicit opt-in for
                // running them to completion without a consumer.
                Producer::Task(_) | Producer::Step(_) => {}
            }
        }
        self.core.consumer_dropped();
    }
}

impl<T, L: RawMutex> fmt::Debug for Slot<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.producer.is_some() {
            "pending(producer)"
        } else if self.core.is_resolved() {
            "resolved"
        } else {
            "pending"
        };
        f.debug_struct("Slot").field("state", &state).finish()
    }
}

/// Future returned by [`Slot::ready`].
#[must_use = "futures do nothing unless awaited"]
pub struct ReadyProbe<'a, T, L: RawMutex> {
    slot: &'a mut Slot<T, L>,
}

impl<T, L: RawMutex> Future for ReadyProbe<'_, T, L> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.slot.poll_drive(cx, Bind::Bound) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => Poll::Ready(this.slot.core.peek_present()),
        }
    }
}

impl<T, L: RawMutex> fmt::Debug for ReadyProbe<'_, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyProbe").finish_non_exhaustive()
    }
}

/// Driver future behind [`Slot::on_ready`].
struct OnReady<T: 'static, F> {
    slot: Slot<T, LocalLock>,
    callback: Option<F>,
}

impl<T, F> Future for OnReady<T, F>
where
    F: FnOnce(Result<T, Failure>) + 'static,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: No field is structurally pinned: `slot` is `Unpin` and the
        // callback is only ever moved out, never polled in place.
        let this = unsafe { self.get_unchecked_mut() };
        match this.slot.poll_drive(cx, Bind::Bound) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => {
                if let (Some(callback), Some(outcome)) =
                    (this.callback.take(), this.slot.core.take_outcome())
                {
                    callback(outcome.into_result());
                }
                Poll::Ready(())
            }
        }
    }
}

/// Driver future behind [`Slot::detach`].
struct Detach<T: 'static> {
    slot: Slot<T, LocalLock>,
}

impl<T> Future for Detach<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.slot.poll_drive(cx, Bind::Detached) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => {
                if let Some(Outcome::Failed(fault)) = this.slot.core.take_outcome() {
                    task::report_lost_failure(&fault);
                }
                Poll::Ready(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use futures::executor::block_on;
    use futures::task::noop_waker;
    use static_assertions::assert_not_impl_any;

    use crate::error::Canceled;
    use crate::lock::SyncLock;

    use super::*;

    #[test]
    fn resolved_constructors_report_their_state() {
        let value = Slot::<u32>::with_value(5);
        assert!(value.is_ready());
        assert!(value.has_value());

        let canceled = Slot::<u32>::canceled();
        assert!(canceled.is_ready());
        assert!(!canceled.has_value());

        let failed = Slot::<u32>::failed(Fault::msg("nope"));
        assert!(failed.is_ready());
        assert!(!failed.has_value());
    }

    #[test]
    fn awaiting_a_value_slot_returns_it() {
        let value = block_on(Slot::<u32>::with_value(11));
        assert_eq!(value.unwrap(), 11);
    }

    #[test]
    fn awaiting_a_canceled_slot_reports_cancelation() {
        let result = block_on(Slot::<u32>::canceled());
        assert!(matches!(result, Err(Failure::Canceled)));
    }

    #[test]
    fn awaiting_a_failed_slot_returns_the_fault() {
        let result = block_on(Slot::<u32>::failed(Fault::new(Canceled)));
        let failure = result.unwrap_err();
        assert!(failure.fault().is_some_and(|f| f.downcast_ref::<Canceled>().is_some()));
    }

    #[test]
    fn channel_delivers_across_the_pair() {
        let (slot, completer) = Slot::<String>::channel();
        completer.set("hello".to_string()).resume();
        assert_eq!(block_on(slot).unwrap(), "hello");
    }

    #[test]
    fn dropping_the_completer_cancels_the_slot() {
        let (slot, completer) = Slot::<u32>::channel();
        drop(completer);
        assert!(matches!(block_on(slot), Err(Failure::Canceled)));
    }

    #[test]
    fn try_set_returns_the_value_when_the_consumer_is_gone() {
        let (slot, completer) = Slot::<u32>::channel();
        drop(slot);
        assert!(!completer.is_connected());
        assert_eq!(completer.try_set(9).unwrap_err(), 9);
    }

    #[test]
    fn set_with_skips_construction_for_a_gone_consumer() {
        let (slot, completer) = Slot::<u32>::channel();
        drop(slot);
        let constructed = RefCell::new(false);
        let wakeup = completer.set_with(|| {
            *constructed.borrow_mut() = true;
            3
        });
        assert!(wakeup.is_none());
        assert!(!*constructed.borrow());
    }

    #[test]
    fn defer_runs_the_producer_on_first_await() {
        let mut slot = Slot::<u32>::defer(|done| done.set(21));
        assert!(!slot.is_ready());
        assert_eq!(block_on(&mut slot).unwrap(), 21);
    }

    #[test]
    fn defer_supports_suspension_and_late_completion() {
        let parked: Rc<RefCell<Option<Completer<u32, LocalLock>>>> =
            Rc::new(RefCell::new(None));
        let stash = Rc::clone(&parked);
        let mut slot = Slot::<u32>::defer(move |done| {
            *stash.borrow_mut() = Some(done);
            Wakeup::empty()
        });

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut slot).poll(&mut cx).is_pending());

        let done = parked.borrow_mut().take().expect("producer ran on first poll");
        done.set(33).resume();
        match Pin::new(&mut slot).poll(&mut cx) {
            Poll::Ready(Ok(33)) => {}
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[test]
    fn dropping_an_unawaited_defer_slot_runs_it_detached() {
        let ran = Rc::new(RefCell::new(false));
        let observer = Rc::clone(&ran);
        let slot = Slot::<u32>::defer(move |done| {
            *observer.borrow_mut() = true;
            assert!(!done.is_connected());
            done.set(1)
        });
        drop(slot);
        assert!(*ran.borrow());
    }

    #[test]
    fn ready_reports_presence_without_consuming() {
        block_on(async {
            let mut slot = Slot::<u32>::with_value(2);
            assert!(slot.ready().await);
            assert!(slot.ready().await);
            assert_eq!(slot.take().unwrap(), 2);

            let mut canceled = Slot::<u32>::canceled();
            assert!(!canceled.ready().await);

            let mut failed = Slot::<u32>::failed(Fault::msg("x"));
            assert!(failed.ready().await);
            assert!(failed.take().is_err());
        });
    }

    #[test]
    #[should_panic(expected = "not resolved")]
    fn take_on_a_pending_slot_panics() {
        let (mut slot, _completer) = Slot::<u32>::channel();
        let _ = slot.take();
    }

    #[test]
    fn cancel_discards_an_unstarted_producer() {
        let ran = Rc::new(RefCell::new(false));
        let observer = Rc::clone(&ran);
        let mut slot = Slot::<u32>::defer(move |done| {
            *observer.borrow_mut() = true;
            done.set(1)
        });
        slot.cancel().unwrap();
        assert!(!*ran.borrow());
        assert!(matches!(block_on(slot), Err(Failure::Canceled)));
    }

    #[test]
    fn cancel_rejects_an_in_flight_slot() {
        let (mut slot, _completer) = Slot::<u32>::channel();
        assert_eq!(slot.cancel(), Err(InvalidState));
    }

    #[test]
    fn copy_value_clones_resolved_state_only() {
        let slot = Slot::<u32>::with_value(8);
        assert_eq!(block_on(slot.copy_value()).unwrap(), 8);
        // The original still holds its value.
        assert!(slot.has_value());

        let (pending, _completer) = Slot::<u32>::channel();
        assert!(matches!(block_on(pending.copy_value()), Err(Failure::Canceled)));
    }

    #[test]
    fn thread_affinity_is_encoded_in_the_lock_parameter() {
        assert_not_impl_any!(Slot<u32>: Send, Sync);
        assert_not_impl_any!(Completer<u32, LocalLock>: Send, Sync);

        fn assert_send<T: Send>() {}
        assert_send::<Completer<u32, SyncLock>>();
    }

    #[test]
    fn detach_drives_a_suspended_task_that_drop_would_cancel() {
        let finished = Rc::new(RefCell::new(false));

        // Dropping the slot cancels the never-started task: the body does
        // not run at all.
        {
            let observer = Rc::clone(&finished);
            let slot: Slot<u32> = crate::Task::new(async move {
                *observer.borrow_mut() = true;
                1
            })
            .into();
            drop(slot);
            assert!(!*finished.borrow());
        }

        // Detaching starts the task and keeps driving it: it suspends on an
        // inner slot and still runs to completion once that slot resolves.
        let parked: Rc<RefCell<Option<Completer<u32, LocalLock>>>> = Rc::new(RefCell::new(None));
        let stash = Rc::clone(&parked);
        let observer = Rc::clone(&finished);
        let slot: Slot<u32> = crate::Task::new(async move {
            let gate = Slot::<u32>::defer(move |done| {
                *stash.borrow_mut() = Some(done);
                Wakeup::empty()
            });
            let value = gate.await.unwrap_or(0);
            *observer.borrow_mut() = true;
            value
        })
        .into();
        slot.detach();

        // The body started and is parked at the gate.
        assert!(!*finished.borrow());
        let done = parked.borrow_mut().take().expect("the detached task started");

        // The wake polls the driver; the body resumes and finishes.
        done.set(9).resume();
        assert!(*finished.borrow());
    }

    #[test]
    fn sync_completer_delivers_from_another_thread() {
        let (slot, completer) = Slot::<u32, SyncLock>::channel();
        let worker = std::thread::spawn(move || {
            completer.set(77).resume();
        });
        assert_eq!(block_on(slot).unwrap(), 77);
        worker.join().unwrap();
    }
}
