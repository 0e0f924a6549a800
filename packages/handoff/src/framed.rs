use std::alloc::{self, Layout, handle_alloc_error};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::task::{Context, Poll};

use frame_pool::FrameStore;

/// Where a frame's memory comes from (and goes back to).
pub(crate) enum StoreHold {
    /// The global allocator, with no handle to keep alive.
    Heap,
    /// A shared store; the handle keeps it alive until the frame is freed.
    Shared(Rc<dyn FrameStore>),
}

/// A future placed into frame storage, with its concrete type erased down to
/// two function pointers.
///
/// The future is written into store memory at construction and never moves
/// again, which is exactly the pinning contract; polling goes through a
/// monomorphized function pointer. The frame is dropped and its memory
/// returned as soon as the future completes, so stack-like stores reclaim at
/// the earliest possible moment.
pub(crate) struct Framed<O> {
    ptr: NonNull<u8>,
    layout: Layout,
    poll_fn: unsafe fn(NonNull<u8>, &mut Context<'_>) -> Poll<O>,
    drop_fn: unsafe fn(NonNull<u8>),
    store: StoreHold,
    live: bool,
}

impl<O> Framed<O> {
    pub(crate) fn new<F>(store: StoreHold, future: F) -> Self
    where
        F: Future<Output = O> + 'static,
    {
        let layout = Layout::new::<F>();
        let ptr = alloc_frame(&store, layout);
        // SAFETY: The block satisfies `F`'s layout; zero-sized frames use a
        // dangling-but-aligned pointer, which is valid for zero-sized writes.
        unsafe { ptr.cast::<F>().as_ptr().write(future) };
        Self {
            ptr,
            layout,
            poll_fn: poll_frame::<F>,
            drop_fn: drop_frame::<F>,
            store,
            live: true,
        }
    }

    /// Polls the stored future; on completion the frame is freed before the
    /// output is returned.
    pub(crate) fn poll(&mut self, cx: &mut Context<'_>) -> Poll<O> {
        assert!(self.live, "a completed frame must not be polled again");

        // SAFETY: `live` guarantees the frame still holds the future, and
        // `poll_fn`/`ptr` were created together from the same `F`.
        match unsafe { (self.poll_fn)(self.ptr, cx) } {
            Poll::Ready(output) => {
                self.release();
                Poll::Ready(output)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// Drops the future in place and returns the memory to its store.
    fn release(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        // SAFETY: The frame holds a live future of the matching type.
        unsafe { (self.drop_fn)(self.ptr) };
        if self.layout.size() == 0 {
            return;
        }
        match &self.store {
            // SAFETY: The block was allocated from the matching source with
            // this layout, and is not used past this point.
            StoreHold::Heap => unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) },
            // SAFETY: As above.
            StoreHold::Shared(store) => unsafe { store.dealloc(self.ptr, self.layout) },
        }
    }
}

impl<O> Drop for Framed<O> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<O> fmt::Debug for Framed<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framed")
            .field("frame_bytes", &self.layout.size())
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}

fn alloc_frame(store: &StoreHold, layout: Layout) -> NonNull<u8> {
    if layout.size() == 0 {
        // Zero-sized frames need no storage; a dangling pointer with the
        // right alignment stands in for the block.
        // SAFETY: An alignment is never zero.
        return unsafe { NonNull::new_unchecked(layout.align() as *mut u8) };
    }
    match store {
        StoreHold::Heap => {
            // SAFETY: `layout` is non-zero-sized.
            let ptr = unsafe { alloc::alloc(layout) };
            NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(layout))
        }
        StoreHold::Shared(store) => store.alloc(layout),
    }
}

/// # Safety
///
/// `ptr` must point at a live, pinned `F`.
unsafe fn poll_frame<F: Future>(ptr: NonNull<u8>, cx: &mut Context<'_>) -> Poll<F::Output> {
    // SAFETY: Per the caller's guarantee; the frame never moves after
    // placement, satisfying the pinning contract.
    let future = unsafe { Pin::new_unchecked(&mut *ptr.cast::<F>().as_ptr()) };
    future.poll(cx)
}

/// # Safety
///
/// `ptr` must point at a live `F`, which is dropped in place.
unsafe fn drop_frame<F>(ptr: NonNull<u8>) {
    // SAFETY: Per the caller's guarantee.
    unsafe { ptr::drop_in_place(ptr.cast::<F>().as_ptr()) };
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::future::poll_fn;
    use std::rc::Rc;

    use frame_pool::{FrameStore, ReusableFrame};
    use futures::task::noop_waker;

    use super::*;

    fn poll_once<O>(framed: &mut Framed<O>) -> Poll<O> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        framed.poll(&mut cx)
    }

    #[test]
    fn completes_and_frees_on_the_heap() {
        let mut framed = Framed::new(StoreHold::Heap, async { 40 + 2 });
        assert_eq!(poll_once(&mut framed), Poll::Ready(42));
    }

    #[test]
    fn pending_then_ready() {
        let mut remaining = 2;
        let mut framed = Framed::new(
            StoreHold::Heap,
            poll_fn(move |cx| {
                if remaining == 0 {
                    Poll::Ready("done")
                } else {
                    remaining -= 1;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }),
        );
        assert!(poll_once(&mut framed).is_pending());
        assert!(poll_once(&mut framed).is_pending());
        assert_eq!(poll_once(&mut framed), Poll::Ready("done"));
    }

    #[test]
    fn dropping_a_pending_frame_drops_the_future() {
        let dropped = Rc::new(Cell::new(false));

        struct Probe(Rc<Cell<bool>>);
        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let probe = Probe(Rc::clone(&dropped));
        let framed = Framed::new(StoreHold::Heap, async move {
            let _ = &probe;
            std::future::pending::<()>().await;
        });
        drop(framed);
        assert!(dropped.get());
    }

    #[test]
    fn shared_store_frames_reuse_memory() {
        let store = ReusableFrame::new();
        let before = store.capacity();
        for round in 0..3 {
            let mut framed = Framed::new(StoreHold::Shared(store.share()), async move { round });
            assert_eq!(poll_once(&mut framed), Poll::Ready(round));
        }
        // The buffer grew once and was then reused.
        assert!(store.capacity() >= before);
    }
}
