use std::alloc::{self, Layout, handle_alloc_error};
use std::ptr::NonNull;
use std::rc::Rc;

/// A source of frame memory.
///
/// A store hands out raw blocks and takes them back. Callers promise to pass
/// the same layout to [`dealloc`](FrameStore::dealloc) that they passed to
/// [`alloc`](FrameStore::alloc), and to never request a zero-sized layout
/// (zero-sized frames need no storage and are handled by the caller).
///
/// Stores are not required to be thread-safe; the implementations in this
/// crate are single-threaded handles.
pub trait FrameStore {
    /// Allocates a block for the given layout.
    ///
    /// The returned pointer is valid for reads and writes of `layout.size()`
    /// bytes and meets `layout.align()`.
    ///
    /// # Panics
    ///
    /// May panic when the store cannot satisfy the request (for example, a
    /// [`FlatStack`](crate::FlatStack) whose arena is exhausted).
    fn alloc(&self, layout: Layout) -> NonNull<u8>;

    /// Returns a block to the store.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`alloc`](FrameStore::alloc) on this
    /// same store with the same `layout`, and must not be used afterwards.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout);

    /// Returns an owning, type-erased handle to this store.
    ///
    /// The handle keeps the store's interior alive for as long as any frame
    /// allocated from it may still need to be returned.
    fn share(&self) -> Rc<dyn FrameStore>;
}

/// The global-allocator adapter: every frame is a plain heap allocation.
///
/// This is the degraded-but-always-correct store, and the default used when
/// no store is supplied.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapStore;

impl HeapStore {
    /// Creates the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl FrameStore for HeapStore {
    fn alloc(&self, layout: Layout) -> NonNull<u8> {
        debug_assert!(layout.size() > 0);

        // SAFETY: The layout is non-zero-sized per the trait contract.
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(layout))
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantee that `ptr` came from
        // `alloc` with this layout.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }

    fn share(&self) -> Rc<dyn FrameStore> {
        Rc::new(Self)
    }
}
