use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

use lock_api::RawMutex;

use crate::Wakeup;
use crate::slot::Completer;

/// Words of storage available for a producer closure before it spills to the
/// heap.
///
/// Most completion closures capture a couple of pointers (a registry handle,
/// a small payload); four words covers them without a per-slot allocation.
pub const INLINE_WORDS: usize = 4;

type InlineBuf = [MaybeUninit<usize>; INLINE_WORDS];

/// Type-erased storage for a one-shot producer closure
/// (`FnOnce(Completer<T, L>) -> Wakeup`).
///
/// Closures whose size and alignment fit [`INLINE_WORDS`] machine words are
/// stored inline; larger ones are boxed. The erased operations are two
/// monomorphized function pointers (invoke, drop). There is no relocate
/// entry: any Rust closure moves by plain `memcpy`, so moving the whole cell
/// moves the closure with it.
pub(crate) struct Starter<T, L: RawMutex> {
    repr: Repr,
    invoke_fn: unsafe fn(&mut Repr, Completer<T, L>) -> Wakeup,
    drop_fn: unsafe fn(&mut Repr),
}

enum Repr {
    Inline(InlineBuf),
    Boxed(NonNull<u8>),
}

impl<T, L: RawMutex> Starter<T, L> {
    pub(crate) fn new<F>(producer: F) -> Self
    where
        F: FnOnce(Completer<T, L>) -> Wakeup + 'static,
    {
        let fits = mem::size_of::<F>() <= mem::size_of::<InlineBuf>()
            && mem::align_of::<F>() <= mem::align_of::<usize>();
        if fits {
            let mut buf: InlineBuf = [MaybeUninit::uninit(); INLINE_WORDS];
            // SAFETY: `F` fits the buffer in both size and alignment.
            unsafe { buf.as_mut_ptr().cast::<F>().write(producer) };
            Self {
                repr: Repr::Inline(buf),
                invoke_fn: invoke_inline::<T, L, F>,
                drop_fn: drop_inline::<F>,
            }
        } else {
            let ptr = NonNull::from(Box::leak(Box::new(producer))).cast::<u8>();
            Self {
                repr: Repr::Boxed(ptr),
                invoke_fn: invoke_boxed::<T, L, F>,
                drop_fn: drop_boxed::<F>,
            }
        }
    }

    /// Whether the closure lives in the inline buffer.
    pub(crate) fn is_inline(&self) -> bool {
        matches!(self.repr, Repr::Inline(_))
    }

    /// Runs the closure, handing it the write end.
    pub(crate) fn invoke(self, completer: Completer<T, L>) -> Wakeup {
        let invoke_fn = self.invoke_fn;
        // Disarm our own Drop: the closure is consumed by the call below.
        // SAFETY: `self` is forgotten immediately after the read, so the repr
        // has exactly one owner from here on.
        let mut repr = unsafe { ptr::read(&self.repr) };
        mem::forget(self);
        // SAFETY: `invoke_fn` was monomorphized together with this repr.
        unsafe { invoke_fn(&mut repr, completer) }
    }
}

impl<T, L: RawMutex> Drop for Starter<T, L> {
    fn drop(&mut self) {
        // SAFETY: `drop_fn` was monomorphized together with this repr, and
        // `invoke` forgets `self` before consuming the closure.
        unsafe { (self.drop_fn)(&mut self.repr) };
    }
}

impl<T, L: RawMutex> fmt::Debug for Starter<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Starter")
            .field("inline", &self.is_inline())
            .finish_non_exhaustive()
    }
}

/// # Safety
///
/// `repr` must hold a live inline `F`, which this call consumes.
unsafe fn invoke_inline<T, L: RawMutex, F>(repr: &mut Repr, completer: Completer<T, L>) -> Wakeup
where
    F: FnOnce(Completer<T, L>) -> Wakeup,
{
    match repr {
        // SAFETY: The caller guarantees the buffer holds a live `F`; reading
        // it out transfers ownership to this frame.
        Repr::Inline(buf) => (unsafe { buf.as_mut_ptr().cast::<F>().read() })(completer),
        Repr::Boxed(_) => unreachable!("inline invoke on a boxed producer"),
    }
}

/// # Safety
///
/// `repr` must hold a live boxed `F`, which this call consumes.
unsafe fn invoke_boxed<T, L: RawMutex, F>(repr: &mut Repr, completer: Completer<T, L>) -> Wakeup
where
    F: FnOnce(Completer<T, L>) -> Wakeup,
{
    match repr {
        Repr::Inline(_) => unreachable!("boxed invoke on an inline producer"),
        // SAFETY: The caller guarantees the pointer came from `Box::leak` of
        // an `F` and has not been consumed yet.
        Repr::Boxed(ptr) => (unsafe { Box::from_raw(ptr.as_ptr().cast::<F>()) })(completer),
    }
}

/// # Safety
///
/// `repr` must hold a live inline `F`; the value is dropped in place.
unsafe fn drop_inline<F>(repr: &mut Repr) {
    if let Repr::Inline(buf) = repr {
        // SAFETY: Per the caller's guarantee the buffer holds a live `F`.
        unsafe { ptr::drop_in_place(buf.as_mut_ptr().cast::<F>()) };
    }
}

/// # Safety
///
/// `repr` must hold a live boxed `F`, which is dropped and freed.
unsafe fn drop_boxed<F>(repr: &mut Repr) {
    if let Repr::Boxed(ptr) = repr {
        // SAFETY: Per the caller's guarantee the pointer came from
        // `Box::leak` of an `F` and has not been consumed yet.
        drop(unsafe { Box::from_raw(ptr.as_ptr().cast::<F>()) });
    }
}
