//! Structured writers for outbound payloads.
//!
//! Payload types implement [`Serializable`] once, against the
//! [`SerializationWriter`] trait, and can then be rendered by either backend:
//!
//! - [`json`] - [`JsonWriter`](json::JsonWriter), a nested JSON document
//! - [`dictionary`] - [`DictionaryWriter`](dictionary::DictionaryWriter), a
//!   flat map from dotted key to string value plus a separate map of numeric
//!   measurements
//!
//! Every value parameter is an `Option`; `None` means "absent". What absence
//! turns into is backend specific: the JSON writer omits the property, the
//! dictionary writer records an explicit null placeholder for properties and
//! nothing at all for measurements.
//!
//! Both backends reject an empty property name with
//! [`QuickPulseError::InvalidArgument`](crate::error::QuickPulseError::InvalidArgument).
//!
//! # Example
//!
//! ```rust
//! use quickpulse::error::Result;
//! use quickpulse::serialization::{Serializable, SerializationWriter};
//! use quickpulse::serialization::dictionary::DictionaryWriter;
//! use quickpulse::serialization::json::JsonWriter;
//!
//! struct Heartbeat {
//!     instance: String,
//!     healthy: bool,
//! }
//!
//! impl Serializable for Heartbeat {
//!     fn serialize(&self, writer: &mut dyn SerializationWriter) -> Result<()> {
//!         writer.write_str("Instance", Some(self.instance.as_str()))?;
//!         writer.write_bool("Healthy", Some(self.healthy))
//!     }
//! }
//!
//! let beat = Heartbeat { instance: "web-1".into(), healthy: true };
//!
//! let json = JsonWriter::to_json(&beat).unwrap();
//! assert_eq!(json, r#"{"Instance":"web-1","Healthy":true}"#);
//!
//! let mut flat = DictionaryWriter::new();
//! beat.serialize(&mut flat).unwrap();
//! assert_eq!(flat.property("Instance"), Some(Some("web-1")));
//! ```

pub mod dictionary;
pub mod json;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;

/// A value that knows how to write its fields into a [`SerializationWriter`].
pub trait Serializable {
    /// Writes the fields of `self` into the currently open object of
    /// `writer`.
    fn serialize(&self, writer: &mut dyn SerializationWriter) -> Result<()>;
}

/// Structured-write operations shared by all payload encoders.
pub trait SerializationWriter {
    /// Opens a nested object stored under `name`.
    fn write_start_object(&mut self, name: &str) -> Result<()>;

    /// Opens an unnamed object: the document root, a list element, or a
    /// sequentially keyed child depending on the backend.
    fn write_start_anonymous_object(&mut self) -> Result<()>;

    /// Closes the innermost open object.
    fn write_end_object(&mut self) -> Result<()>;

    fn write_str(&mut self, name: &str, value: Option<&str>) -> Result<()>;

    fn write_i64(&mut self, name: &str, value: Option<i64>) -> Result<()>;

    fn write_bool(&mut self, name: &str, value: Option<bool>) -> Result<()>;

    fn write_f64(&mut self, name: &str, value: Option<f64>) -> Result<()>;

    fn write_duration(&mut self, name: &str, value: Option<Duration>) -> Result<()>;

    fn write_timestamp(&mut self, name: &str, value: Option<DateTime<Utc>>) -> Result<()>;

    /// Writes `value` as a nested object under `name`.
    fn write_object(&mut self, name: &str, value: Option<&dyn Serializable>) -> Result<()>;

    /// Writes `value` as an unnamed nested object.
    fn write_anonymous_object(&mut self, value: Option<&dyn Serializable>) -> Result<()>;

    fn write_str_list(&mut self, name: &str, items: Option<&[String]>) -> Result<()>;

    fn write_object_list(
        &mut self,
        name: &str,
        items: Option<&[&dyn Serializable]>,
    ) -> Result<()>;

    fn write_str_map(
        &mut self,
        name: &str,
        values: Option<&BTreeMap<String, String>>,
    ) -> Result<()>;

    fn write_f64_map(
        &mut self,
        name: &str,
        values: Option<&BTreeMap<String, f64>>,
    ) -> Result<()>;
}

/// Renders a duration as `[d.]hh:mm:ss[.fffffff]`, with 100 ns resolution.
pub fn format_duration(value: Duration) -> String {
    let total_secs = value.as_secs();
    let days = total_secs / 86_400;
    let hours = (total_secs / 3_600) % 24;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    let ticks = value.subsec_nanos() / 100;

    let mut out = String::with_capacity(16);
    if days > 0 {
        let _ = write!(out, "{days}.");
    }
    let _ = write!(out, "{hours:02}:{minutes:02}:{seconds:02}");
    if ticks > 0 {
        let _ = write!(out, ".{ticks:07}");
    }
    out
}

/// Renders a timestamp as RFC 3339 in UTC (`2024-05-01T10:00:00.5Z`).
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
