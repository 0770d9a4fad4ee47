//! Unsigned 64-bit counter with sharded atomic storage.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::counters::{NUM_SHARDS, THREAD_SLOT_INDEX};

/// A monotonically increasing counter spread over cache-padded slots.
///
/// Adds are lock-free and touch only the calling thread's slot. [`value`]
/// sums every slot and is meant to be called once writers are done, which is
/// exactly how the accumulator uses it.
///
/// # Examples
///
/// ```rust
/// use quickpulse::counters::sharded::ShardedU64;
/// use std::sync::Arc;
/// use std::thread;
///
/// let counter = Arc::new(ShardedU64::new());
/// let mut handles = vec![];
///
/// for _ in 0..4 {
///     let c = Arc::clone(&counter);
///     handles.push(thread::spawn(move || {
///         for _ in 0..1000 {
///             c.add(1);
///         }
///     }));
/// }
///
/// for h in handles {
///     h.join().unwrap();
/// }
///
/// assert_eq!(counter.value(), 4000);
/// ```
///
/// [`value`]: ShardedU64::value
pub struct ShardedU64 {
    slots: [CachePadded<AtomicU64>; NUM_SHARDS],
}

impl ShardedU64 {
    /// Creates a counter with every slot at zero.
    pub const fn new() -> Self {
        const ZERO: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
        ShardedU64 {
            slots: [ZERO; NUM_SHARDS],
        }
    }

    /// Returns the slot owned by the calling thread.
    #[inline]
    fn shard(&self) -> &AtomicU64 {
        THREAD_SLOT_INDEX.with(|idx| &self.slots[*idx])
    }

    /// Adds `value` to the calling thread's slot.
    ///
    /// Wraps on overflow, which at 100 ns ticks would take tens of thousands
    /// of years within a single interval.
    #[inline]
    pub fn add(&self, value: u64) {
        self.shard().fetch_add(value, Ordering::Relaxed);
    }

    /// Increments the calling thread's slot by one.
    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    /// Returns the calling thread's contribution.
    #[inline]
    pub fn local_value(&self) -> u64 {
        self.shard().load(Ordering::Relaxed)
    }

    /// Sums all slots.
    #[inline]
    pub fn value(&self) -> u64 {
        self.slots
            .iter()
            .fold(0u64, |acc, slot| acc.wrapping_add(slot.load(Ordering::Relaxed)))
    }
}

impl Default for ShardedU64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ShardedU64 {
    /// Formats the non-zero slots: `{ [slot]:value ... }`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, slot) in self.slots.iter().enumerate() {
            let val = slot.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let counter = ShardedU64::new();
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn test_add() {
        let counter = ShardedU64::new();
        counter.add(5);
        counter.increment();
        assert_eq!(counter.value(), 6);
        assert_eq!(counter.local_value(), 6);
    }

    #[test]
    fn test_debug() {
        let counter = ShardedU64::new();
        counter.add(7);
        let debug_str = format!("{:?}", counter);
        assert!(debug_str.starts_with('{'));
        assert!(debug_str.contains('7'));
        assert!(debug_str.ends_with('}'));
    }

    #[test]
    fn test_multiple_threads() {
        use std::sync::Arc;
        use std::thread;

        let counter = Arc::new(ShardedU64::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let counter_clone = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    counter_clone.add(2);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.value(), 4000);
    }

    #[test]
    fn test_default() {
        assert_eq!(ShardedU64::default().value(), 0);
    }
}
