//! Collector configuration.
//!
//! [`QuickPulseConfig`] is a plain struct with defaults and `with_*`
//! setters. It also implements [`serde::Deserialize`] so hosts can load it
//! from whatever format they already use; every field is optional and
//! durations are given in milliseconds.
//!
//! # Examples
//!
//! ```rust
//! use quickpulse::config::{PayloadFormat, QuickPulseConfig};
//! use std::time::Duration;
//!
//! let config = QuickPulseConfig::default()
//!     .with_instance_name("web-1")
//!     .with_collection_interval(Duration::from_millis(500))
//!     .with_payload_format(PayloadFormat::Flat);
//!
//! assert_eq!(config.idle_interval, Duration::from_secs(5));
//! assert_eq!(config.max_buffered_samples, 10);
//!
//! let loaded: QuickPulseConfig =
//!     serde_json::from_str(r#"{"collection_interval": 250, "instance_name": "api"}"#).unwrap();
//! assert_eq!(loaded.collection_interval, Duration::from_millis(250));
//! assert_eq!(loaded.instance_name, "api");
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::accumulator::DEFAULT_DOCUMENT_CAPACITY;
use crate::quota::QuotaConfig;
use crate::sample::DEFAULT_PERFORMANCE_COUNTERS;

/// Protocol version stamped on every data point.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Outbound payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// JSON array of nested data points.
    #[default]
    Json,
    /// Flattened `{"properties": .., "measurements": ..}` dictionary.
    Flat,
}

/// Everything the collector needs to know.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuickPulseConfig {
    /// Delay between pings while no viewer is attached.
    #[serde(deserialize_with = "millis")]
    pub idle_interval: Duration,
    /// Delay between posts while collecting.
    #[serde(deserialize_with = "millis")]
    pub collection_interval: Duration,
    /// Upper bound for the failure backoff.
    #[serde(deserialize_with = "millis")]
    pub max_backoff: Duration,
    /// Bound for one transport round trip.
    #[serde(deserialize_with = "millis")]
    pub send_timeout: Duration,
    /// Unsent samples kept for the next post. The oldest are dropped first.
    pub max_buffered_samples: usize,
    /// Per-kind bound of the exemplar document queues.
    pub document_capacity: usize,
    pub quota: QuotaConfig,
    pub payload_format: PayloadFormat,
    pub instance_name: String,
    pub machine_name: String,
    pub stream_id: String,
    /// Performance counters read from the counter source on each post.
    pub performance_counters: Vec<String>,
}

impl Default for QuickPulseConfig {
    fn default() -> Self {
        let machine_name = default_machine_name();
        Self {
            idle_interval: Duration::from_secs(5),
            collection_interval: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            send_timeout: Duration::from_secs(3),
            max_buffered_samples: 10,
            document_capacity: DEFAULT_DOCUMENT_CAPACITY,
            quota: QuotaConfig::default(),
            payload_format: PayloadFormat::default(),
            instance_name: machine_name.clone(),
            machine_name,
            stream_id: uuid::Uuid::new_v4().simple().to_string(),
            performance_counters: DEFAULT_PERFORMANCE_COUNTERS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl QuickPulseConfig {
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn with_collection_interval(mut self, interval: Duration) -> Self {
        self.collection_interval = interval;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_max_buffered_samples(mut self, max: usize) -> Self {
        self.max_buffered_samples = max;
        self
    }

    pub fn with_document_capacity(mut self, capacity: usize) -> Self {
        self.document_capacity = capacity;
        self
    }

    pub fn with_quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = format;
        self
    }

    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    pub fn with_machine_name(mut self, name: impl Into<String>) -> Self {
        self.machine_name = name.into();
        self
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    /// Replaces the performance counters reduced into each sample.
    pub fn with_performance_counters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.performance_counters = names.into_iter().map(Into::into).collect();
        self
    }
}

fn default_machine_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QuickPulseConfig::default();
        assert_eq!(config.idle_interval, Duration::from_secs(5));
        assert_eq!(config.collection_interval, Duration::from_secs(1));
        assert_eq!(config.document_capacity, 30);
        assert_eq!(config.quota, QuotaConfig::default());
        assert_eq!(config.payload_format, PayloadFormat::Json);
        assert_eq!(config.performance_counters.len(), 4);
        assert_eq!(config.stream_id.len(), 32);
        assert!(!config.machine_name.is_empty());
    }

    #[test]
    fn test_stream_ids_differ() {
        assert_ne!(
            QuickPulseConfig::default().stream_id,
            QuickPulseConfig::default().stream_id
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: QuickPulseConfig = serde_json::from_str(
            r#"{
                "idle_interval": 10000,
                "max_backoff": 120000,
                "payload_format": "flat",
                "quota": {"max_tokens": 5.0},
                "performance_counters": ["\\Memory\\Committed Bytes"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.idle_interval, Duration::from_secs(10));
        assert_eq!(config.max_backoff, Duration::from_secs(120));
        assert_eq!(config.collection_interval, Duration::from_secs(1));
        assert_eq!(config.payload_format, PayloadFormat::Flat);
        assert_eq!(config.quota.max_tokens, 5.0);
        assert_eq!(config.quota.refill_rate_per_second, 0.5);
        assert_eq!(config.performance_counters, vec![r"\Memory\Committed Bytes"]);
    }

    #[test]
    fn test_builders() {
        let config = QuickPulseConfig::default()
            .with_max_buffered_samples(2)
            .with_stream_id("s-1")
            .with_performance_counters(["a", "b"]);
        assert_eq!(config.max_buffered_samples, 2);
        assert_eq!(config.stream_id, "s-1");
        assert_eq!(config.performance_counters, vec!["a", "b"]);
    }
}
