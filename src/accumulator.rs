//! Per-interval counter accumulator and the live slot that holds it.
//!
//! An [`Accumulator`] collects everything that happens during one collection
//! interval. Request-handling threads update it through lock-free sharded
//! adds; each counter is independent, so a concurrent reader may see a
//! duration without its matching count. That is harmless because counters
//! are only read after the accumulator has been retired by
//! [`LiveAccumulator::rotate`], which waits for writers still holding it.
//!
//! # Lifecycle
//!
//! ```text
//!   rotate() ──► fresh accumulator, start stamped ──► live: written by all threads
//!                                                          │
//!   rotate() ──► swapped out, end stamped ──► reduced into a DataSample ──► dropped
//! ```
//!
//! # Examples
//!
//! ```rust
//! use quickpulse::accumulator::LiveAccumulator;
//! use std::time::Duration;
//!
//! let live = LiveAccumulator::new();
//!
//! // Hot path, from any thread.
//! live.record_request(Duration::from_millis(12), true);
//! live.record_dependency(Duration::from_millis(3), false);
//!
//! // Collector, once per interval.
//! let retired = live.rotate();
//! assert_eq!(retired.request_count(), 1);
//! assert_eq!(retired.dependency_call_failure_count(), 1);
//! assert!(retired.end_timestamp().is_some());
//! assert_eq!(live.current().request_count(), 0);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::counters::sharded::ShardedU64;
use crate::document::{DocumentKind, TelemetryDocument};
use crate::error::{QuickPulseError, Result};

/// Duration counters are kept in ticks of 100 ns.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Default number of exemplar documents queued per kind and interval.
pub const DEFAULT_DOCUMENT_CAPACITY: usize = 30;

/// Converts a duration to 100 ns ticks, saturating at `u64::MAX`.
pub fn duration_to_ticks(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos() / 100).unwrap_or(u64::MAX)
}

/// Counter bank for a single collection interval.
#[derive(Debug)]
pub struct Accumulator {
    start: OnceLock<DateTime<Utc>>,
    end: OnceLock<DateTime<Utc>>,

    request_count: ShardedU64,
    request_duration_ticks: ShardedU64,
    request_success_count: ShardedU64,
    request_failure_count: ShardedU64,

    dependency_call_count: ShardedU64,
    dependency_call_duration_ticks: ShardedU64,
    dependency_call_success_count: ShardedU64,
    dependency_call_failure_count: ShardedU64,

    exception_count: ShardedU64,

    documents: [Mutex<Vec<TelemetryDocument>>; DocumentKind::COUNT],
    document_capacity: usize,
    dropped_documents: AtomicU64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    /// Creates an accumulator with all counters at zero and neither timestamp
    /// set.
    pub fn new() -> Self {
        Self::with_document_capacity(DEFAULT_DOCUMENT_CAPACITY)
    }

    /// Like [`new`](Self::new) with a custom per-kind document queue bound.
    pub fn with_document_capacity(document_capacity: usize) -> Self {
        Self {
            start: OnceLock::new(),
            end: OnceLock::new(),
            request_count: ShardedU64::new(),
            request_duration_ticks: ShardedU64::new(),
            request_success_count: ShardedU64::new(),
            request_failure_count: ShardedU64::new(),
            dependency_call_count: ShardedU64::new(),
            dependency_call_duration_ticks: ShardedU64::new(),
            dependency_call_success_count: ShardedU64::new(),
            dependency_call_failure_count: ShardedU64::new(),
            exception_count: ShardedU64::new(),
            documents: std::array::from_fn(|_| Mutex::new(Vec::new())),
            document_capacity,
            dropped_documents: AtomicU64::new(0),
        }
    }

    fn started_at(now: DateTime<Utc>, document_capacity: usize) -> Self {
        let accumulator = Self::with_document_capacity(document_capacity);
        let _ = accumulator.start.set(now);
        accumulator
    }

    /// Stamps the start timestamp with the current time.
    pub fn start(&self) -> Result<()> {
        self.start_at(Utc::now())
    }

    /// Stamps the start timestamp. Fails with
    /// [`QuickPulseError::InvalidState`] if it was already set.
    pub fn start_at(&self, timestamp: DateTime<Utc>) -> Result<()> {
        self.start.set(timestamp).map_err(|_| {
            QuickPulseError::InvalidState("accumulator already started".to_string())
        })
    }

    /// Stamps the end timestamp with the current time.
    pub fn finish(&self) -> Result<()> {
        self.finish_at(Utc::now())
    }

    /// Stamps the end timestamp. Fails with
    /// [`QuickPulseError::InvalidState`] if it was already set.
    ///
    /// Nothing stops a caller from adding to a finished accumulator; the
    /// live slot guarantees it by handing writers only the fresh instance.
    pub fn finish_at(&self, timestamp: DateTime<Utc>) -> Result<()> {
        self.end.set(timestamp).map_err(|_| {
            QuickPulseError::InvalidState("accumulator already finished".to_string())
        })
    }

    /// When the interval began, if stamped.
    pub fn start_timestamp(&self) -> Option<DateTime<Utc>> {
        self.start.get().copied()
    }

    /// When the interval ended, if stamped.
    pub fn end_timestamp(&self) -> Option<DateTime<Utc>> {
        self.end.get().copied()
    }

    /// True once the end timestamp is set.
    pub fn is_finished(&self) -> bool {
        self.end.get().is_some()
    }

    #[inline]
    pub fn increment_request_count(&self) {
        self.request_count.increment();
    }

    /// Adds `ticks` (100 ns units) to the summed request duration.
    #[inline]
    pub fn add_request_duration(&self, ticks: u64) {
        self.request_duration_ticks.add(ticks);
    }

    #[inline]
    pub fn increment_request_success_count(&self) {
        self.request_success_count.increment();
    }

    #[inline]
    pub fn increment_request_failure_count(&self) {
        self.request_failure_count.increment();
    }

    #[inline]
    pub fn increment_dependency_call_count(&self) {
        self.dependency_call_count.increment();
    }

    /// Adds `ticks` (100 ns units) to the summed dependency call duration.
    #[inline]
    pub fn add_dependency_call_duration(&self, ticks: u64) {
        self.dependency_call_duration_ticks.add(ticks);
    }

    #[inline]
    pub fn increment_dependency_call_success_count(&self) {
        self.dependency_call_success_count.increment();
    }

    #[inline]
    pub fn increment_dependency_call_failure_count(&self) {
        self.dependency_call_failure_count.increment();
    }

    #[inline]
    pub fn increment_exception_count(&self) {
        self.exception_count.increment();
    }

    /// Records one finished request: count, duration and outcome.
    pub fn record_request(&self, duration: Duration, success: bool) {
        self.increment_request_count();
        self.add_request_duration(duration_to_ticks(duration));
        if success {
            self.increment_request_success_count();
        } else {
            self.increment_request_failure_count();
        }
    }

    /// Records one finished dependency call: count, duration and outcome.
    pub fn record_dependency(&self, duration: Duration, success: bool) {
        self.increment_dependency_call_count();
        self.add_dependency_call_duration(duration_to_ticks(duration));
        if success {
            self.increment_dependency_call_success_count();
        } else {
            self.increment_dependency_call_failure_count();
        }
    }

    /// Records one exception.
    pub fn record_exception(&self) {
        self.increment_exception_count();
    }

    /// Requests finished during the interval.
    pub fn request_count(&self) -> u64 {
        self.request_count.value()
    }

    /// Summed request duration, in 100 ns ticks.
    pub fn request_duration_ticks(&self) -> u64 {
        self.request_duration_ticks.value()
    }

    pub fn request_success_count(&self) -> u64 {
        self.request_success_count.value()
    }

    pub fn request_failure_count(&self) -> u64 {
        self.request_failure_count.value()
    }

    pub fn dependency_call_count(&self) -> u64 {
        self.dependency_call_count.value()
    }

    /// Summed dependency call duration, in 100 ns ticks.
    pub fn dependency_call_duration_ticks(&self) -> u64 {
        self.dependency_call_duration_ticks.value()
    }

    pub fn dependency_call_success_count(&self) -> u64 {
        self.dependency_call_success_count.value()
    }

    pub fn dependency_call_failure_count(&self) -> u64 {
        self.dependency_call_failure_count.value()
    }

    /// Exceptions recorded during the interval.
    pub fn exception_count(&self) -> u64 {
        self.exception_count.value()
    }

    /// Queues an exemplar document. Returns `false` and counts the document
    /// as dropped when its kind's queue is full.
    pub fn enqueue_document(&self, document: TelemetryDocument) -> bool {
        let mut queue = self.documents[document.kind.index()].lock();
        if queue.len() >= self.document_capacity {
            drop(queue);
            self.dropped_documents.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        queue.push(document);
        true
    }

    /// Number of documents queued for `kind`.
    pub fn queued_documents(&self, kind: DocumentKind) -> usize {
        self.documents[kind.index()].lock().len()
    }

    /// Documents rejected because their queue was full.
    pub fn dropped_documents(&self) -> u64 {
        self.dropped_documents.load(Ordering::Relaxed)
    }

    /// Takes every queued document, kind by kind, each kind in arrival order.
    pub fn drain_documents(&self) -> Vec<TelemetryDocument> {
        let mut drained = Vec::new();
        for queue in &self.documents {
            drained.append(&mut queue.lock());
        }
        drained
    }
}

/// Longest time a rotation waits for writers to release the retired
/// accumulator.
const WRITER_RELEASE_TIMEOUT: Duration = Duration::from_millis(50);

/// Waits until `retired` is referenced only by the caller.
///
/// The swap converts every outstanding `ArcSwap` guard into a strong
/// reference, so writers that loaded the slot before the swap keep the
/// count above one until their adds are done. Returns `false` if the
/// timeout expires first.
fn wait_for_writers(retired: &Arc<Accumulator>) -> bool {
    let deadline = Instant::now() + WRITER_RELEASE_TIMEOUT;
    while Arc::strong_count(retired) > 1 {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::yield_now();
    }
    true
}

/// Holder of the accumulator that writers currently update.
///
/// The slot is a single [`ArcSwap`]: writers load it without locking and the
/// collector exchanges it in one atomic swap, so no write ever lands in
/// an accumulator that was not live at the moment it was loaded.
#[derive(Debug)]
pub struct LiveAccumulator {
    current: ArcSwap<Accumulator>,
    document_capacity: usize,
}

impl Default for LiveAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveAccumulator {
    /// Creates a slot holding a started accumulator.
    pub fn new() -> Self {
        Self::with_document_capacity(DEFAULT_DOCUMENT_CAPACITY)
    }

    /// Creates a slot whose accumulators queue at most `document_capacity`
    /// documents per kind.
    pub fn with_document_capacity(document_capacity: usize) -> Self {
        Self {
            current: ArcSwap::from_pointee(Accumulator::started_at(
                Utc::now(),
                document_capacity,
            )),
            document_capacity,
        }
    }

    /// Returns the live accumulator.
    ///
    /// Drop the returned handle promptly: [`rotate`](Self::rotate) waits for
    /// outstanding handles to the accumulator it retires, up to a short bound.
    pub fn current(&self) -> Arc<Accumulator> {
        self.current.load_full()
    }

    /// Installs a fresh accumulator and returns the previous one with its
    /// end timestamp stamped now, once writers that loaded it have let go.
    pub fn rotate(&self) -> Arc<Accumulator> {
        self.rotate_at(Utc::now())
    }

    /// Like [`rotate`](Self::rotate) with an explicit boundary: the retired
    /// accumulator ends and the fresh one starts at `now`.
    pub fn rotate_at(&self, now: DateTime<Utc>) -> Arc<Accumulator> {
        let fresh = Arc::new(Accumulator::started_at(now, self.document_capacity));
        let previous = self.current.swap(fresh);
        if !wait_for_writers(&previous) {
            tracing::debug!(
                handles = Arc::strong_count(&previous) - 1,
                "retiring an accumulator that is still referenced"
            );
        }
        if previous.finish_at(now).is_err() {
            tracing::debug!("retired accumulator was already finished");
        }
        previous
    }

    /// Installs a fresh accumulator and discards the previous one.
    pub fn reset(&self) {
        self.current
            .store(Arc::new(Accumulator::started_at(Utc::now(), self.document_capacity)));
    }

    /// Records a request into the live accumulator.
    pub fn record_request(&self, duration: Duration, success: bool) {
        self.current.load().record_request(duration, success);
    }

    pub fn record_dependency(&self, duration: Duration, success: bool) {
        self.current.load().record_dependency(duration, success);
    }

    pub fn record_exception(&self) {
        self.current.load().record_exception();
    }

    pub fn enqueue_document(&self, document: TelemetryDocument) -> bool {
        self.current.load().enqueue_document(document)
    }
}
