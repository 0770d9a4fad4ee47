//! Outbound payload.
//!
//! Every request carries one or more [`MonitoringDataPoint`]s: the identity
//! of this process, and while collecting, the metrics of one reduced sample
//! plus the exemplar documents the quota let through. Pings carry a single
//! identity-only point.
//!
//! [`encode`] renders a batch either as a JSON array of nested objects or as
//! the flattened `{"properties": .., "measurements": ..}` dictionary, where
//! each point is keyed `Key1`, `Key2`, ... in batch order.

use chrono::{DateTime, Utc};

use crate::accumulator::TICKS_PER_SECOND;
use crate::config::{PayloadFormat, QuickPulseConfig, PROTOCOL_VERSION};
use crate::document::TelemetryDocument;
use crate::error::{QuickPulseError, Result};
use crate::sample::DataSample;
use crate::serialization::dictionary::DictionaryWriter;
use crate::serialization::json::JsonWriter;
use crate::serialization::{Serializable, SerializationWriter};

pub const REQUESTS_PER_SECOND: &str = r"\ApplicationInsights\Requests/Sec";
pub const REQUEST_DURATION: &str = r"\ApplicationInsights\Request Duration";
pub const REQUESTS_FAILED_PER_SECOND: &str = r"\ApplicationInsights\Requests Failed/Sec";
pub const REQUESTS_SUCCEEDED_PER_SECOND: &str = r"\ApplicationInsights\Requests Succeeded/Sec";
pub const DEPENDENCY_CALLS_PER_SECOND: &str = r"\ApplicationInsights\Dependency Calls/Sec";
pub const DEPENDENCY_CALL_DURATION: &str = r"\ApplicationInsights\Dependency Call Duration";
pub const DEPENDENCY_CALLS_FAILED_PER_SECOND: &str =
    r"\ApplicationInsights\Dependency Calls Failed/Sec";
pub const DEPENDENCY_CALLS_SUCCEEDED_PER_SECOND: &str =
    r"\ApplicationInsights\Dependency Calls Succeeded/Sec";
pub const EXCEPTIONS_PER_SECOND: &str = r"\ApplicationInsights\Exceptions/Sec";

const TICKS_PER_MILLISECOND: f64 = (TICKS_PER_SECOND / 1_000) as f64;

/// One named value.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub weight: i64,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            weight: 1,
        }
    }
}

impl Serializable for MetricPoint {
    fn serialize(&self, writer: &mut dyn SerializationWriter) -> Result<()> {
        writer.write_str("Name", Some(self.name.as_str()))?;
        writer.write_f64("Value", Some(self.value))?;
        writer.write_i64("Weight", Some(self.weight))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringDataPoint {
    pub version: String,
    pub instance: String,
    pub machine_name: String,
    pub stream_id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: Vec<MetricPoint>,
    pub documents: Vec<TelemetryDocument>,
}

impl MonitoringDataPoint {
    /// An identity-only point, as sent with pings.
    pub fn identity(config: &QuickPulseConfig, timestamp: DateTime<Utc>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            instance: config.instance_name.clone(),
            machine_name: config.machine_name.clone(),
            stream_id: config.stream_id.clone(),
            timestamp,
            metrics: Vec::new(),
            documents: Vec::new(),
        }
    }

    /// A point carrying the metrics of `sample`, stamped with its end.
    /// Durations are reported in milliseconds.
    pub fn from_sample(
        config: &QuickPulseConfig,
        sample: &DataSample,
        documents: Vec<TelemetryDocument>,
    ) -> Self {
        let mut metrics = vec![
            MetricPoint::new(REQUESTS_PER_SECOND, sample.requests_per_second()),
            MetricPoint::new(
                REQUEST_DURATION,
                sample.request_duration_average() / TICKS_PER_MILLISECOND,
            ),
            MetricPoint::new(REQUESTS_FAILED_PER_SECOND, sample.requests_failed_per_second()),
            MetricPoint::new(
                REQUESTS_SUCCEEDED_PER_SECOND,
                sample.requests_succeeded_per_second(),
            ),
            MetricPoint::new(DEPENDENCY_CALLS_PER_SECOND, sample.dependency_calls_per_second()),
            MetricPoint::new(
                DEPENDENCY_CALL_DURATION,
                sample.dependency_call_duration_average() / TICKS_PER_MILLISECOND,
            ),
            MetricPoint::new(
                DEPENDENCY_CALLS_FAILED_PER_SECOND,
                sample.dependency_calls_failed_per_second(),
            ),
            MetricPoint::new(
                DEPENDENCY_CALLS_SUCCEEDED_PER_SECOND,
                sample.dependency_calls_succeeded_per_second(),
            ),
            MetricPoint::new(EXCEPTIONS_PER_SECOND, sample.exceptions_per_second()),
        ];
        metrics.extend(
            sample
                .performance_counters()
                .iter()
                .map(|(name, value)| MetricPoint::new(name.clone(), *value)),
        );

        Self {
            metrics,
            documents,
            ..Self::identity(config, sample.end_timestamp())
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }
}

impl Serializable for MonitoringDataPoint {
    fn serialize(&self, writer: &mut dyn SerializationWriter) -> Result<()> {
        writer.write_str("Version", Some(self.version.as_str()))?;
        writer.write_str("Instance", Some(self.instance.as_str()))?;
        writer.write_str("MachineName", Some(self.machine_name.as_str()))?;
        writer.write_str("StreamId", Some(self.stream_id.as_str()))?;
        writer.write_timestamp("Timestamp", Some(self.timestamp))?;

        let metrics: Vec<&dyn Serializable> =
            self.metrics.iter().map(|m| m as &dyn Serializable).collect();
        writer.write_object_list("Metrics", Some(metrics.as_slice()))?;

        let documents: Vec<&dyn Serializable> = self
            .documents
            .iter()
            .map(|d| d as &dyn Serializable)
            .collect();
        writer.write_object_list("Documents", Some(documents.as_slice()))
    }
}

/// Renders a batch of points in the requested format.
pub fn encode(points: &[MonitoringDataPoint], format: PayloadFormat) -> Result<String> {
    match format {
        PayloadFormat::Json => {
            let items: Vec<&dyn Serializable> =
                points.iter().map(|p| p as &dyn Serializable).collect();
            JsonWriter::to_json_array(&items)
        }
        PayloadFormat::Flat => {
            let mut writer = DictionaryWriter::new();
            for point in points {
                writer.write_anonymous_object(Some(point as &dyn Serializable))?;
            }
            writer
                .to_json()
                .map_err(|err| QuickPulseError::InvalidState(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::Accumulator;
    use crate::document::DocumentKind;
    use crate::sample::PROCESSOR_TIME;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config() -> QuickPulseConfig {
        QuickPulseConfig::default()
            .with_instance_name("web-1")
            .with_machine_name("host-a")
            .with_stream_id("s1")
            .with_performance_counters([PROCESSOR_TIME])
    }

    fn sample() -> DataSample {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let acc = Accumulator::new();
        acc.start_at(start).unwrap();
        acc.record_request(Duration::from_millis(30), true);
        acc.record_request(Duration::from_millis(10), false);
        acc.finish_at(start + chrono::Duration::seconds(2)).unwrap();
        let counters: HashMap<String, f64> = [(PROCESSOR_TIME.to_string(), 12.5)].into();
        DataSample::reduce_with_counters(&acc, &counters, &[PROCESSOR_TIME]).unwrap()
    }

    #[test]
    fn test_metrics_from_sample() {
        let point = MonitoringDataPoint::from_sample(&config(), &sample(), Vec::new());
        assert_eq!(point.metric(REQUESTS_PER_SECOND), Some(1.0));
        assert_eq!(point.metric(REQUESTS_FAILED_PER_SECOND), Some(0.5));
        assert_eq!(point.metric(REQUEST_DURATION), Some(20.0));
        assert_eq!(point.metric(DEPENDENCY_CALL_DURATION), Some(0.0));
        assert_eq!(point.metric(PROCESSOR_TIME), Some(12.5));
        assert_eq!(
            point.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 2).unwrap()
        );
    }

    #[test]
    fn test_identity_json() {
        let point = MonitoringDataPoint::identity(
            &config(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        );
        let json = encode(&[point], PayloadFormat::Json).unwrap();
        assert_eq!(
            json,
            concat!(
                r#"[{"Version":"1.0","Instance":"web-1","MachineName":"host-a","#,
                r#""StreamId":"s1","Timestamp":"2024-05-01T12:00:00Z"}]"#
            )
        );
    }

    #[test]
    fn test_json_batch_parses() {
        let doc = TelemetryDocument::new(DocumentKind::Request, "GET /");
        let points = vec![
            MonitoringDataPoint::from_sample(&config(), &sample(), vec![doc]),
            MonitoringDataPoint::from_sample(&config(), &sample(), Vec::new()),
        ];
        let json = encode(&points, PayloadFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["Documents"][0]["Name"], "GET /");
        assert!(array[1].get("Documents").is_none());
        assert_eq!(array[0]["Metrics"][0]["Name"], REQUESTS_PER_SECOND);
        assert_eq!(array[0]["Metrics"][0]["Weight"], 1);
    }

    #[test]
    fn test_flat_batch_keys() {
        let points = vec![
            MonitoringDataPoint::from_sample(&config(), &sample(), Vec::new()),
            MonitoringDataPoint::identity(&config(), Utc::now()),
        ];
        let flat = encode(&points, PayloadFormat::Flat).unwrap();
        let value: serde_json::Value = serde_json::from_str(&flat).unwrap();
        let properties = &value["properties"];
        assert_eq!(properties["Key1.Instance"], "web-1");
        assert_eq!(properties["Key1.Metrics0.Name"], REQUESTS_PER_SECOND);
        assert_eq!(properties["Key2.StreamId"], "s1");
        assert!(value["measurements"].as_object().unwrap().is_empty());
    }
}
