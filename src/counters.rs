//! Sharded counter cells backing the accumulator.
//!
//! Every raw counter of an [`Accumulator`](crate::accumulator::Accumulator)
//! is a [`ShardedU64`](sharded::ShardedU64): a small array of cache-padded
//! atomics, one slot per thread group. Request-handling threads add into
//! their own slot, the collector sums all slots once the accumulator has been
//! retired.
//!
//! ```text
//!                          ┌─────────────────────────────────────┐
//!                          │           ShardedU64                │
//!                          ├─────────────────────────────────────┤
//!   Thread 0 ──adds───►    │ [Slot 0] ████████ (CachePadded)     │
//!   Thread 1 ──adds───►    │ [Slot 1] ████████ (CachePadded)     │
//!        ...               │    ...                              │
//!   Thread 15 ─adds───►    │ [Slot 15] ███████ (CachePadded)     │
//!                          └─────────────────────────────────────┘
//!                                          │
//!                                          ▼
//!                                  value() sums all
//!                                  slots after finish()
//! ```
//!
//! # Thread Slot Assignment
//!
//! Slots are assigned round-robin the first time a thread touches any
//! counter. Thread 16 shares slot 0 with thread 0; that only costs some
//! contention, never correctness.

pub mod sharded;

use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of slots per counter.
///
/// An accumulator carries nine counters and a fresh one is allocated every
/// collection interval, so the slot count stays small:
/// `16 slots × 9 counters × 128 bytes ≈ 18KB`.
pub(crate) const NUM_SHARDS: usize = 16;

static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot index of the current thread, assigned lazily and stable for the
    /// lifetime of the thread.
    pub(crate) static THREAD_SLOT_INDEX: usize = next_slot_id();
}

/// Hands out the next slot in `[0, NUM_SHARDS)`.
///
/// `Relaxed` is enough: two threads racing for the same id only share a
/// slot.
pub fn next_slot_id() -> usize {
    NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed) % NUM_SHARDS
}
