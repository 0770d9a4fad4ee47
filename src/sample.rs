//! Reduction of a retired accumulator into an immutable sample.
//!
//! [`DataSample::reduce`] turns raw counts into per-second rates and
//! per-item averages over the accumulator's window, and snapshots the
//! performance counters the host reported for the same interval.
//!
//! Zero activity is an ordinary outcome, not a fault: averages over an empty
//! count are `0.0`, and a performance counter the platform does not provide
//! reads as `0.0` instead of failing the whole sample.
//!
//! # Examples
//!
//! ```rust
//! use quickpulse::accumulator::Accumulator;
//! use quickpulse::sample::{DataSample, PROCESSOR_TIME};
//! use chrono::{Duration, Utc};
//! use std::collections::HashMap;
//!
//! let start = Utc::now();
//! let acc = Accumulator::new();
//! acc.start_at(start).unwrap();
//! for _ in 0..10 {
//!     acc.increment_request_count();
//! }
//! acc.finish_at(start + Duration::seconds(2)).unwrap();
//!
//! let mut counters = HashMap::new();
//! counters.insert(PROCESSOR_TIME.to_string(), 37.5);
//!
//! let sample = DataSample::reduce(&acc, &counters).unwrap();
//! assert_eq!(sample.requests_per_second(), 5.0);
//! assert_eq!(sample.request_duration_average(), 0.0);
//! assert_eq!(sample.performance_counter(PROCESSOR_TIME), 37.5);
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::accumulator::Accumulator;
use crate::error::{QuickPulseError, Result};

pub const PROCESSOR_TIME: &str = r"\Processor(_Total)\% Processor Time";
pub const COMMITTED_BYTES: &str = r"\Memory\Committed Bytes";
pub const REQUESTS_PER_SECOND: &str = r"\ASP.NET Applications(__Total__)\Requests/Sec";
pub const REQUESTS_IN_QUEUE: &str =
    r"\ASP.NET Applications(__Total__)\Requests In Application Queue";

/// Performance counters every sample carries.
pub const DEFAULT_PERFORMANCE_COUNTERS: [&str; 4] = [
    PROCESSOR_TIME,
    COMMITTED_BYTES,
    REQUESTS_PER_SECOND,
    REQUESTS_IN_QUEUE,
];

/// Most recent performance-counter readings, looked up by exact name.
pub trait CounterLookup {
    fn get(&self, name: &str) -> Option<f64>;
}

impl CounterLookup for HashMap<String, f64> {
    fn get(&self, name: &str) -> Option<f64> {
        HashMap::get(self, name).copied()
    }
}

impl CounterLookup for BTreeMap<String, f64> {
    fn get(&self, name: &str) -> Option<f64> {
        BTreeMap::get(self, name).copied()
    }
}

/// Immutable per-interval reduction of an [`Accumulator`].
#[derive(Debug, Clone, PartialEq)]
pub struct DataSample {
    start_timestamp: DateTime<Utc>,
    end_timestamp: DateTime<Utc>,

    requests_per_second: f64,
    requests_failed_per_second: f64,
    requests_succeeded_per_second: f64,
    request_duration_average: f64,

    dependency_calls_per_second: f64,
    dependency_calls_failed_per_second: f64,
    dependency_calls_succeeded_per_second: f64,
    dependency_call_duration_average: f64,

    exceptions_per_second: f64,

    performance_counters: BTreeMap<String, f64>,
}

impl DataSample {
    /// Reduces `accumulator` with the [`DEFAULT_PERFORMANCE_COUNTERS`].
    ///
    /// # Errors
    ///
    /// - [`QuickPulseError::InvalidArgument`] if either timestamp is unset
    /// - [`QuickPulseError::InvalidState`] if the end precedes the start
    pub fn reduce(
        accumulator: &Accumulator,
        lookup: &(impl CounterLookup + ?Sized),
    ) -> Result<Self> {
        Self::reduce_with_counters(accumulator, lookup, &DEFAULT_PERFORMANCE_COUNTERS)
    }

    /// Reduces `accumulator`, snapshotting the performance counters named in
    /// `counter_names`.
    pub fn reduce_with_counters(
        accumulator: &Accumulator,
        lookup: &(impl CounterLookup + ?Sized),
        counter_names: &[&str],
    ) -> Result<Self> {
        let start = accumulator.start_timestamp().ok_or_else(|| {
            QuickPulseError::InvalidArgument("accumulator start timestamp is not set".to_string())
        })?;
        let end = accumulator.end_timestamp().ok_or_else(|| {
            QuickPulseError::InvalidArgument("accumulator end timestamp is not set".to_string())
        })?;
        if end < start {
            return Err(QuickPulseError::InvalidState(format!(
                "accumulator ends at {end} before it starts at {start}"
            )));
        }

        let elapsed_seconds = (end - start)
            .to_std()
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0);

        let rate = |count: u64| {
            if elapsed_seconds > 0.0 {
                count as f64 / elapsed_seconds
            } else {
                0.0
            }
        };
        let average = |ticks: u64, count: u64| {
            if count > 0 {
                ticks as f64 / count as f64
            } else {
                0.0
            }
        };

        let request_count = accumulator.request_count();
        let dependency_call_count = accumulator.dependency_call_count();

        let performance_counters = counter_names
            .iter()
            .map(|name| (name.to_string(), lookup.get(name).unwrap_or(0.0)))
            .collect();

        Ok(Self {
            start_timestamp: start,
            end_timestamp: end,
            requests_per_second: rate(request_count),
            requests_failed_per_second: rate(accumulator.request_failure_count()),
            requests_succeeded_per_second: rate(accumulator.request_success_count()),
            request_duration_average: average(accumulator.request_duration_ticks(), request_count),
            dependency_calls_per_second: rate(dependency_call_count),
            dependency_calls_failed_per_second: rate(accumulator.dependency_call_failure_count()),
            dependency_calls_succeeded_per_second: rate(
                accumulator.dependency_call_success_count(),
            ),
            dependency_call_duration_average: average(
                accumulator.dependency_call_duration_ticks(),
                dependency_call_count,
            ),
            exceptions_per_second: rate(accumulator.exception_count()),
            performance_counters,
        })
    }

    /// Start of the window the sample covers.
    pub fn start_timestamp(&self) -> DateTime<Utc> {
        self.start_timestamp
    }

    /// End of the window the sample covers.
    pub fn end_timestamp(&self) -> DateTime<Utc> {
        self.end_timestamp
    }

    /// Finished requests per second over the window.
    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
    }

    pub fn requests_failed_per_second(&self) -> f64 {
        self.requests_failed_per_second
    }

    pub fn requests_succeeded_per_second(&self) -> f64 {
        self.requests_succeeded_per_second
    }

    /// Average request duration in 100 ns ticks.
    pub fn request_duration_average(&self) -> f64 {
        self.request_duration_average
    }

    /// Dependency calls per second over the window.
    pub fn dependency_calls_per_second(&self) -> f64 {
        self.dependency_calls_per_second
    }

    pub fn dependency_calls_failed_per_second(&self) -> f64 {
        self.dependency_calls_failed_per_second
    }

    pub fn dependency_calls_succeeded_per_second(&self) -> f64 {
        self.dependency_calls_succeeded_per_second
    }

    /// Average dependency call duration in 100 ns ticks.
    pub fn dependency_call_duration_average(&self) -> f64 {
        self.dependency_call_duration_average
    }

    pub fn exceptions_per_second(&self) -> f64 {
        self.exceptions_per_second
    }

    /// Value of a performance counter, `0.0` if it was not reported.
    pub fn performance_counter(&self, name: &str) -> f64 {
        self.performance_counters.get(name).copied().unwrap_or(0.0)
    }

    /// Every requested performance counter, by name.
    pub fn performance_counters(&self) -> &BTreeMap<String, f64> {
        &self.performance_counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::TICKS_PER_SECOND;
    use chrono::Duration;

    fn empty_lookup() -> HashMap<String, f64> {
        HashMap::new()
    }

    fn window(seconds: i64) -> Accumulator {
        let start = Utc::now();
        let acc = Accumulator::new();
        acc.start_at(start).unwrap();
        acc.finish_at(start + Duration::seconds(seconds)).unwrap();
        acc
    }

    #[test]
    fn test_missing_start_timestamp() {
        let acc = Accumulator::new();
        acc.finish().unwrap();
        assert!(matches!(
            DataSample::reduce(&acc, &empty_lookup()),
            Err(QuickPulseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_missing_end_timestamp() {
        let acc = Accumulator::new();
        acc.start().unwrap();
        assert!(matches!(
            DataSample::reduce(&acc, &empty_lookup()),
            Err(QuickPulseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reversed_timestamps() {
        let now = Utc::now();
        let acc = Accumulator::new();
        acc.start_at(now).unwrap();
        acc.finish_at(now - Duration::seconds(1)).unwrap();
        assert!(matches!(
            DataSample::reduce(&acc, &empty_lookup()),
            Err(QuickPulseError::InvalidState(_))
        ));
    }

    #[test]
    fn test_timestamps_carried_over() {
        let start = Utc::now();
        let end = start + Duration::seconds(3);
        let acc = Accumulator::new();
        acc.start_at(start).unwrap();
        acc.finish_at(end).unwrap();

        let sample = DataSample::reduce(&acc, &empty_lookup()).unwrap();
        assert_eq!(sample.start_timestamp(), start);
        assert_eq!(sample.end_timestamp(), end);
    }

    #[test]
    fn test_request_rates() {
        let acc = window(2);
        for _ in 0..10 {
            acc.increment_request_count();
            acc.increment_request_failure_count();
            acc.increment_request_success_count();
        }
        let sample = DataSample::reduce(&acc, &empty_lookup()).unwrap();
        assert_eq!(sample.requests_per_second(), 5.0);
        assert_eq!(sample.requests_failed_per_second(), 5.0);
        assert_eq!(sample.requests_succeeded_per_second(), 5.0);
    }

    #[test]
    fn test_request_duration_average() {
        let acc = window(2);
        for _ in 0..10 {
            acc.increment_request_count();
        }
        acc.add_request_duration(5 * TICKS_PER_SECOND);
        let sample = DataSample::reduce(&acc, &empty_lookup()).unwrap();
        assert_eq!(
            sample.request_duration_average(),
            (5 * TICKS_PER_SECOND) as f64 / 10.0
        );
    }

    #[test]
    fn test_dependency_rates_and_average() {
        let acc = window(2);
        for _ in 0..10 {
            acc.increment_dependency_call_count();
            acc.increment_dependency_call_failure_count();
            acc.increment_dependency_call_success_count();
        }
        acc.add_dependency_call_duration(5 * TICKS_PER_SECOND);
        let sample = DataSample::reduce(&acc, &empty_lookup()).unwrap();
        assert_eq!(sample.dependency_calls_per_second(), 5.0);
        assert_eq!(sample.dependency_calls_failed_per_second(), 5.0);
        assert_eq!(sample.dependency_calls_succeeded_per_second(), 5.0);
        assert_eq!(
            sample.dependency_call_duration_average(),
            (5 * TICKS_PER_SECOND) as f64 / 10.0
        );
    }

    #[test]
    fn test_averages_with_zero_count() {
        let acc = window(2);
        acc.add_request_duration(500_000_000);
        acc.add_dependency_call_duration(500_000_000);
        let sample = DataSample::reduce(&acc, &empty_lookup()).unwrap();
        assert_eq!(sample.request_duration_average(), 0.0);
        assert_eq!(sample.dependency_call_duration_average(), 0.0);
    }

    #[test]
    fn test_zero_length_window() {
        let acc = window(0);
        acc.increment_exception_count();
        let sample = DataSample::reduce(&acc, &empty_lookup()).unwrap();
        assert_eq!(sample.exceptions_per_second(), 0.0);
    }

    #[test]
    fn test_absent_performance_counter() {
        let acc = window(2);
        let sample = DataSample::reduce(&acc, &empty_lookup()).unwrap();
        assert_eq!(sample.performance_counter(REQUESTS_PER_SECOND), 0.0);
        assert_eq!(sample.performance_counter("not a counter"), 0.0);
        assert_eq!(
            sample.performance_counters().len(),
            DEFAULT_PERFORMANCE_COUNTERS.len()
        );
    }

    #[test]
    fn test_performance_counters_by_exact_name() {
        let acc = window(1);
        let mut lookup = BTreeMap::new();
        lookup.insert(COMMITTED_BYTES.to_string(), 1024.0);
        lookup.insert(r"\memory\committed bytes".to_string(), 1.0);

        let sample = DataSample::reduce(&acc, &lookup).unwrap();
        assert_eq!(sample.performance_counter(COMMITTED_BYTES), 1024.0);
        assert_eq!(sample.performance_counter(PROCESSOR_TIME), 0.0);
    }

    #[test]
    fn test_custom_counter_names() {
        let acc = window(1);
        let mut lookup = HashMap::new();
        lookup.insert("custom".to_string(), 3.0);
        let sample = DataSample::reduce_with_counters(&acc, &lookup, &["custom"]).unwrap();
        assert_eq!(sample.performance_counters().len(), 1);
        assert_eq!(sample.performance_counter("custom"), 3.0);
    }
}
