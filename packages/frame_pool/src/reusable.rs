use std::alloc::{self, Layout, handle_alloc_error};
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::FrameStore;

/// A single-slot store that keeps one buffer and hands it out repeatedly.
///
/// The buffer grows whenever a larger frame is requested and is never shrunk;
/// returning the frame does not free anything. This makes a
/// create-await-destroy loop allocation-free after the first iteration.
///
/// The store holds one frame at a time. If a second frame is requested while
/// the buffer is occupied, the request falls through to the global allocator,
/// so overlapping use is correct but gains nothing.
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
///
/// use frame_pool::{FrameStore, ReusableFrame};
///
/// let store = ReusableFrame::new();
/// let layout = Layout::new::<[usize; 4]>();
/// for _ in 0..3 {
///     let frame = store.alloc(layout);
///     // SAFETY: `frame` came from this store with this layout.
///     unsafe { store.dealloc(frame, layout) };
/// }
/// assert!(store.capacity() >= layout.size());
/// ```
#[derive(Clone, Debug)]
pub struct ReusableFrame {
    inner: Rc<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// The kept buffer, if one has been allocated yet.
    buffer: Cell<Option<(NonNull<u8>, Layout)>>,
    /// Whether the kept buffer currently backs a live frame.
    occupied: Cell<bool>,
}

impl ReusableFrame {
    /// Creates an empty store; the buffer is allocated on first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                buffer: Cell::new(None),
                occupied: Cell::new(false),
            }),
        }
    }

    /// Size in bytes of the kept buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.buffer.get().map_or(0, |(_, l)| l.size())
    }
}

impl Default for ReusableFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn alloc_impl(&self, layout: Layout) -> NonNull<u8> {
        debug_assert!(layout.size() > 0);

        if self.occupied.get() {
            // Overlapping frame; fall through to the global allocator.
            return heap_alloc(layout);
        }

        let kept = self.buffer.get();
        let fits =
            kept.is_some_and(|(_, l)| l.size() >= layout.size() && l.align() >= layout.align());
        if !fits {
            if let Some((ptr, old)) = kept {
                // SAFETY: We own the buffer and nothing points into it while
                // `occupied` is false.
                unsafe { alloc::dealloc(ptr.as_ptr(), old) };
            }
            let grown = Layout::from_size_align(
                layout.size().max(kept.map_or(0, |(_, l)| l.size())),
                layout.align().max(kept.map_or(1, |(_, l)| l.align())),
            )
            .expect("frame layout exceeds the addressable range");
            self.buffer.set(Some((heap_alloc(grown), grown)));
        }

        self.occupied.set(true);
        match self.buffer.get() {
            Some((ptr, _)) => ptr,
            None => unreachable!("buffer was just ensured"),
        }
    }

    unsafe fn dealloc_impl(&self, ptr: NonNull<u8>, layout: Layout) {
        if self.buffer.get().is_some_and(|(kept, _)| kept == ptr) {
            // The kept buffer is merely released for the next frame.
            self.occupied.set(false);
        } else {
            // An overlapping frame that went to the global allocator.
            // SAFETY: Forwarding the caller's guarantee.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

impl FrameStore for ReusableFrame {
    fn alloc(&self, layout: Layout) -> NonNull<u8> {
        self.inner.alloc_impl(layout)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantee.
        unsafe { self.inner.dealloc_impl(ptr, layout) };
    }

    fn share(&self) -> Rc<dyn FrameStore> {
        self.inner.clone()
    }
}

impl FrameStore for Inner {
    fn alloc(&self, layout: Layout) -> NonNull<u8> {
        self.alloc_impl(layout)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantee.
        unsafe { self.dealloc_impl(ptr, layout) };
    }

    fn share(&self) -> Rc<dyn FrameStore> {
        // SAFETY: `Inner` is only ever reachable through an `Rc<Inner>` (see
        // `ReusableFrame` and the `share` above), so the receiver is managed
        // by the `Rc` allocator with a strong count of at least one.
        unsafe {
            Rc::increment_strong_count(self);
            Rc::from_raw(self)
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some((ptr, layout)) = self.buffer.get() {
            // SAFETY: The buffer was allocated with this layout and no frame
            // can outlive the store interior (frames hold a shared handle).
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

fn heap_alloc(layout: Layout) -> NonNull<u8> {
    // SAFETY: The layout is non-zero-sized per the trait contract.
    let ptr = unsafe { alloc::alloc(layout) };
    NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(layout))
}
