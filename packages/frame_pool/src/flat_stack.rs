use std::alloc::{self, Layout, handle_alloc_error};
use std::cell::Cell;
use std::mem;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::FrameStore;

/// Word granularity of the arena: every block and every trailer is one
/// machine word.
const WORD: usize = mem::size_of::<usize>();

/// Alignment of the arena base; requests above this are rejected.
const BASE_ALIGN: usize = 16;

/// A bump arena over one preallocated block, tuned for stack-like frame
/// lifetimes.
///
/// Allocation advances a top index. Every allocation is followed by a trailer
/// word recording its total extent; freeing marks the trailer, and whenever
/// the topmost allocation is free the top retracts over every contiguous
/// freed tail. The result is that strict LIFO use (recursion, nested awaits)
/// reclaims immediately, while out-of-order frees merely reclaim lazily:
///
/// - alloc a, b, c, d
/// - free d - the top retracts past d
/// - free b - b is only marked; c still pins the top
/// - free c - c and b are both reclaimed, the top retracts past both
///
/// # Panics
///
/// [`alloc`](FrameStore::alloc) panics when the arena is exhausted or when an
/// alignment above 16 is requested.
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
///
/// use frame_pool::{FlatStack, FrameStore};
///
/// let arena = FlatStack::with_capacity(256);
/// let layout = Layout::new::<[usize; 3]>();
///
/// let a = arena.alloc(layout);
/// let b = arena.alloc(layout);
/// // SAFETY: Both blocks came from this arena with this layout.
/// unsafe {
///     arena.dealloc(b, layout);
///     arena.dealloc(a, layout);
/// }
/// assert_eq!(arena.used(), 0);
/// ```
#[derive(Clone, Debug)]
pub struct FlatStack {
    inner: Rc<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Base of the block, in words.
    base: NonNull<usize>,
    /// Capacity in words.
    words: usize,
    /// Current top, in words from the base.
    top: Cell<usize>,
}

/// Bytes rounded up to whole words.
const fn to_words(bytes: usize) -> usize {
    bytes.div_ceil(WORD)
}

impl FlatStack {
    /// Creates an arena backed by a block of at least `bytes` bytes.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        let words = to_words(bytes).max(1);
        let layout = block_layout(words);
        // SAFETY: `layout` is non-zero-sized.
        let base = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(base.cast::<usize>())
            .unwrap_or_else(|| handle_alloc_error(layout));
        Self {
            inner: Rc::new(Inner {
                base,
                words,
                top: Cell::new(0),
            }),
        }
    }

    /// Bytes currently occupied, including trailer words and blocks that are
    /// freed but still pinned under a live allocation.
    #[must_use]
    pub fn used(&self) -> usize {
        self.inner.top.get() * WORD
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.words * WORD
    }
}

fn block_layout(words: usize) -> Layout {
    Layout::from_size_align(words * WORD, BASE_ALIGN.max(WORD))
        .expect("arena capacity exceeds the addressable range")
}

impl Inner {
    /// Word slot accessor for trailer bookkeeping.
    fn word_ptr(&self, index: usize) -> *mut usize {
        debug_assert!(index < self.words);
        // SAFETY: `index` is within the allocated block.
        unsafe { self.base.as_ptr().add(index) }
    }

    fn alloc_impl(&self, layout: Layout) -> NonNull<u8> {
        debug_assert!(layout.size() > 0);
        assert!(
            layout.align() <= BASE_ALIGN,
            "frame alignment {} exceeds the arena's base alignment",
            layout.align()
        );

        let top = self.top.get();
        // Padding, in words, to bring the block to the requested alignment.
        // The base is at least 16-aligned, so word-granular padding suffices.
        let align_words = to_words(layout.align());
        let padding = (align_words - (top % align_words)) % align_words;
        // Payload words, padding, plus one trailer word.
        let extent = to_words(layout.size()) + padding + 1;
        assert!(
            top + extent <= self.words,
            "frame arena exhausted: {} bytes requested, {} free",
            layout.size(),
            (self.words - top) * WORD
        );

        let block = self.word_ptr(top + padding);
        // The trailer records the whole extent (shifted left; the low bit is
        // the freed mark).
        // SAFETY: The trailer index is below `top + extent <= words`.
        unsafe { self.word_ptr(top + extent - 1).write(extent << 1) };
        self.top.set(top + extent);

        // SAFETY: `base` is non-null, so any in-block offset is too.
        unsafe { NonNull::new_unchecked(block.cast::<u8>()) }
    }

    unsafe fn dealloc_impl(&self, ptr: NonNull<u8>, layout: Layout) {
        // Recover the trailer index from the block position and size; this
        // mirrors the arithmetic in `alloc_impl`.
        let offset_bytes =
            (ptr.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize);
        let trailer = to_words(offset_bytes) + to_words(layout.size());
        // SAFETY: The block came from this arena, so the trailer slot is the
        // one written by `alloc_impl`.
        unsafe {
            let slot = self.word_ptr(trailer);
            slot.write(slot.read() | 1);
        }
        self.retract();
    }

    /// Retracts the top over every contiguous freed tail.
    fn retract(&self) {
        let mut top = self.top.get();
        while top > 0 {
            // SAFETY: `top - 1` is the trailer of the topmost allocation.
            let trailer = unsafe { self.word_ptr(top - 1).read() };
            if trailer & 1 == 0 {
                break;
            }
            top -= trailer >> 1;
        }
        self.top.set(top);
    }
}

impl FrameStore for FlatStack {
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
        // `FlatStack` and the `share` above), so the receiver is managed by
        // the `Rc` allocator with a strong count of at least one.
        unsafe {
            Rc::increment_strong_count(self);
            Rc::from_raw(self)
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // SAFETY: The block was allocated with this layout in `with_capacity`
        // and frames hold a shared handle, so none outlive the interior.
        unsafe { alloc::dealloc(self.base.as_ptr().cast::<u8>(), block_layout(self.words)) };
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_not_impl_any;

    use super::*;

    const L: Layout = Layout::new::<[usize; 2]>();

    #[test]
    fn lifo_use_reclaims_immediately() {
        let arena = FlatStack::with_capacity(512);
        let a = arena.alloc(L);
        let used_one = arena.used();
        let b = arena.alloc(L);
        // SAFETY: Blocks came from this arena with layout `L`.
        unsafe {
            arena.dealloc(b, L);
        }
        assert_eq!(arena.used(), used_one);
        // SAFETY: As above.
        unsafe {
            arena.dealloc(a, L);
        }
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn out_of_order_frees_coalesce_lazily() {
        let arena = FlatStack::with_capacity(512);
        let a = arena.alloc(L);
        let b = arena.alloc(L);
        let c = arena.alloc(L);
        let d = arena.alloc(L);
        let used_three = {
            // SAFETY: All blocks came from this arena with layout `L`.
            unsafe { arena.dealloc(d, L) };
            arena.used()
        };
        assert!(used_three > 0);

        // Freeing b does not move the top - c still pins it.
        // SAFETY: As above.
        unsafe { arena.dealloc(b, L) };
        assert_eq!(arena.used(), used_three);

        // Freeing c reclaims both c and b.
        // SAFETY: As above.
        unsafe { arena.dealloc(c, L) };
        let used_one = arena.used();
        assert!(used_one < used_three);

        // SAFETY: As above.
        unsafe { arena.dealloc(a, L) };
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn blocks_are_distinct_and_writable() {
        let arena = FlatStack::with_capacity(512);
        let a = arena.alloc(L).cast::<[usize; 2]>();
        let b = arena.alloc(L).cast::<[usize; 2]>();
        assert_ne!(a, b);
        // SAFETY: Freshly allocated, properly aligned blocks.
        unsafe {
            a.as_ptr().write([1, 2]);
            b.as_ptr().write([3, 4]);
            assert_eq!(a.as_ptr().read(), [1, 2]);
            assert_eq!(b.as_ptr().read(), [3, 4]);
            arena.dealloc(b.cast(), L);
            arena.dealloc(a.cast(), L);
        }
    }

    #[test]
    fn alignment_is_honored() {
        let arena = FlatStack::with_capacity(512);
        let odd = Layout::from_size_align(3, 1).unwrap();
        let aligned = Layout::from_size_align(16, 16).unwrap();

        let a = arena.alloc(odd);
        let b = arena.alloc(aligned);
        assert_eq!(b.as_ptr() as usize % 16, 0);
        // SAFETY: Blocks came from this arena with their layouts.
        unsafe {
            arena.dealloc(b, aligned);
            arena.dealloc(a, odd);
        }
        assert_eq!(arena.used(), 0);
    }

    #[test]
    #[should_panic(expected = "frame arena exhausted")]
    fn exhaustion_panics() {
        let arena = FlatStack::with_capacity(64);
        loop {
            // Leaks arena blocks on purpose; the panic ends the loop.
            let _ = arena.alloc(L);
        }
    }

    #[test]
    fn single_threaded_types() {
        assert_not_impl_any!(FlatStack: Send, Sync);
    }
}
