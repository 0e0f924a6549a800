//! Asynchronous hand-off primitives for cooperative, suspension-based code.
//!
//! The central type is the result slot, [`Slot<T>`](Slot): one container unifying
//! every way an asynchronous value can arrive - an eager value, a captured
//! error, a lazily started [`Task`], a completion closure, or a write end
//! ([`Completer`]) donated to a container. Around it the crate provides:
//!
//! - **Wake-signal plumbing** - [`Wakeup`], an owned at-most-once wake whose
//!   drop delivers it, and [`WakeupList`] for batching wakes out of critical
//!   sections.
//! - **Tasks and generators** - [`Task`] (lazy, cancelable, optionally
//!   frame-pooled via [`frame_pool`]), [`Generator`] with an optional
//!   argument per resume, and the [`detached`] probe.
//! - **Containers** - [`Queue`] (bounded or unbounded FIFO), [`Mutex`] with
//!   FIFO ownership hand-off and [`lock_all`], and the broadcast
//!   [`Distributor`] with its [`AlertFlag`] protocol.
//! - **Combinators** - [`when_all`] (join), [`WhenEach`] (completion-order
//!   iteration), and [`aggregate`] (N-way generator merge).
//! - **The synchronous bridge** - [`sync_wait`], for driving an awaitable
//!   from a plain thread.
//!
//! Single-threaded by default: containers take a lock parameter, and the
//! default [`LocalLock`] compiles the locking away while pinning the
//! container to its thread. The `Shared*` aliases substitute a real mutex,
//! after which write ends may complete from other threads - the intended
//! path for I/O callbacks and timers.
//!
//! # Example
//!
//! ```rust
//! use futures::executor::block_on;
//! use handoff::{Queue, Task};
//!
//! block_on(async {
//!     let queue = Queue::<u32>::unbounded();
//!     for n in 0..3_u32 {
//!         queue.push(n).await.unwrap();
//!     }
//!     queue.close();
//!
//!     let total = Task::new(async move {
//!         let mut total = 0;
//!         loop {
//!             let mut next = queue.pop();
//!             if !next.ready().await {
//!                 break total;
//!             }
//!             total += next.take().unwrap();
//!         }
//!     });
//!     assert_eq!(handoff::Slot::<u32>::from(total).await.unwrap(), 3);
//! });
//! ```

mod aggregator;
mod alert;
mod distributor;
mod driver;
mod error;
mod framed;
mod generator;
mod lock;
mod mutex;
mod queue;
mod slot;
mod starter;
mod sync_wait;
mod task;
#[cfg(test)]
mod test_utils;
mod wake;
mod when_all;
mod when_each;

pub use aggregator::aggregate;
pub use alert::AlertFlag;
pub use distributor::{Distributor, SharedDistributor};
pub use error::{Canceled, Failure, Fault, InvalidState, SourceError};
pub use generator::{Emit, Generator, IntoIter, Yielder};
pub use lock::{LocalLock, SyncLock};
pub use mutex::{Mutex, Ownership, SharedMutex, lock_all};
pub use queue::{Queue, SharedQueue};
pub use slot::{Completer, ReadyProbe, SharedSlot, Slot};
pub use starter::INLINE_WORDS;
pub use sync_wait::sync_wait;
pub use task::{Detached, Task, detached, set_lost_failure_hook};
pub use wake::{Wakeup, WakeupList};
pub use when_all::{WhenAll, when_all};
pub use when_each::{NextCompleted, WhenEach};
