//! # Quickpulse - Live Metrics Core
//!
//! An in-process live-metrics ("quick pulse") subsystem. Request-handling
//! threads record what they do into a lock-light accumulator; a background
//! collector reduces it into one sample per interval and streams the samples,
//! plus a throttled set of exemplar documents, to a remote service.
//!
//! ## The Problem
//!
//! Live metrics are watched by a human, in near real time, only some of the
//! time. The subsystem has to:
//!
//! - cost almost nothing on the request path, even with many threads
//!   recording at once
//! - cost almost nothing on the network while nobody is watching
//! - keep verbose exemplar documents from flooding the channel when
//!   somebody is
//!
//! ## The Design
//!
//! 1. **Sharded counters**: every counter of an [`Accumulator`] is a
//!    [`ShardedU64`](counters::sharded::ShardedU64), one cache-padded atomic
//!    per thread slot, summed on read. Writers on different threads never
//!    touch the same cache line.
//!
//! 2. **Swap-and-reset**: the live accumulator sits behind a single
//!    [`ArcSwap`](arc_swap::ArcSwap) in a [`LiveAccumulator`]. Each interval
//!    the collector installs a fresh one in one atomic exchange and reduces
//!    the retired one into an immutable [`DataSample`].
//!
//! 3. **Ping/post**: the [`state`] machine pings at a long interval while no
//!    viewer is attached and posts at a short one while a viewer is. Failures
//!    back off exponentially up to a cap; the service can also tell the
//!    process to stop.
//!
//! 4. **Token buckets**: a [`QuotaTracker`](quota::QuotaTracker) bounds the
//!    exemplar documents of each kind. Aggregate counters are never throttled.
//!
//! 5. **Pluggable encoding**: payloads are written through the
//!    [`SerializationWriter`](serialization::SerializationWriter) trait, into
//!    either nested JSON or a flattened dotted-key dictionary.
//!
//! ```text
//!  request threads                     collector task
//!  ───────────────                     ──────────────
//!  record_request() ─┐
//!  record_exception()├──► LiveAccumulator ──rotate()──► DataSample ──┐
//!  enqueue_document()┘         (ArcSwap)                             │
//!                                  │ drain_documents()               ▼
//!                                  └──────► QuotaTracker ──► MonitoringDataPoint
//!                                                                    │
//!                                          StateMachine ◄── Transport::send()
//! ```
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`counters`] | Sharded atomic counter cells |
//! | [`accumulator`] | Per-interval counters, document queues and the live slot |
//! | [`sample`] | Reduction of an accumulator into rates and averages |
//! | [`document`] | Exemplar documents |
//! | [`quota`] | Per-kind token buckets |
//! | [`serialization`] | Writer trait, nested JSON and flattened encoders |
//! | [`payload`] | Outbound monitoring data points |
//! | [`transport`] | Contract with the network and the service response |
//! | [`state`] | Pure ping/post state machine |
//! | [`collector`] | The tokio timer loop tying it all together |
//! | [`config`] | Collector configuration |
//!
//! ## Quick Start
//!
//! ```rust
//! use quickpulse::accumulator::LiveAccumulator;
//! use quickpulse::sample::DataSample;
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! let live = LiveAccumulator::new();
//!
//! // From any request thread
//! live.record_request(Duration::from_millis(20), true);
//! live.record_request(Duration::from_millis(40), false);
//!
//! // From the collector, once per interval
//! let retired = live.rotate();
//! let sample = DataSample::reduce(&retired, &HashMap::<String, f64>::new()).unwrap();
//! assert_eq!(sample.request_duration_average(), 300_000.0); // 30 ms in ticks
//! assert_eq!(live.current().request_count(), 0);
//! ```
//!
//! To stream samples, implement [`Transport`](transport::Transport) on your
//! HTTP client and spawn a [`Collector`](collector::Collector).
//!
//! ## Thread Safety
//!
//! [`Accumulator`] and [`LiveAccumulator`] are `Send + Sync`; share the live
//! slot with `Arc`. Counter writes are `Relaxed` atomic adds and never block.
//! Exemplar documents go through a short per-kind mutex.
//!
//! ## Memory Usage
//!
//! Each counter uses 16 cache-padded slots, about 1-2 KB depending on the
//! platform's cache line. An accumulator holds nine of them plus its document
//! queues, and at most two accumulators are alive at the rotation boundary.

pub mod accumulator;
pub mod collector;
pub mod config;
pub mod counters;
pub mod document;
pub mod error;
pub mod payload;
pub mod quota;
pub mod sample;
pub mod serialization;
pub mod state;
pub mod transport;

pub use accumulator::{Accumulator, LiveAccumulator};
pub use sample::DataSample;
