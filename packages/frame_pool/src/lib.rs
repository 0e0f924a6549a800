//! Pluggable storage for the frames of short-lived suspendable operations.
//!
//! Creating and awaiting an operation usually costs one heap allocation for its
//! frame (the state that must survive across suspension points). When the same
//! shape of operation is created and destroyed in a loop, or recursively, that
//! allocation dominates the cost of the hand-off itself. This crate provides
//! stores that recycle frame memory instead:
//!
//! - [`HeapStore`] - the trivial adapter over the global allocator. Always
//!   correct, never faster.
//! - [`ReusableFrame`] - keeps a single buffer and hands it out again and
//!   again. Intended for hot loops that create and await one operation at a
//!   time.
//! - [`FlatStack`] - a bump arena over one preallocated block. Optimal for
//!   stack-like (LIFO) allocation patterns such as recursion, while tolerating
//!   out-of-order frees.
//!
//! Stores are cheap-to-clone handles sharing their interior, and are
//! single-threaded by design.
//!
//! # Example
//!
//! ```rust
//! use std::alloc::Layout;
//!
//! use frame_pool::{FrameStore, ReusableFrame};
//!
//! let store = ReusableFrame::new();
//! let layout = Layout::new::<[u64; 8]>();
//!
//! let first = store.alloc(layout);
//! // SAFETY: `first` was just allocated from this store with this layout.
//! unsafe { store.dealloc(first, layout) };
//!
//! // The same buffer is handed out again.
//! let second = store.alloc(layout);
//! assert_eq!(first, second);
//! # // SAFETY: `second` came from this store with this layout.
//! # unsafe { store.dealloc(second, layout) };
//! ```

mod flat_stack;
mod reusable;
mod store;

pub use flat_stack::FlatStack;
pub use reusable::ReusableFrame;
pub use store::{FrameStore, HeapStore};
