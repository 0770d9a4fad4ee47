//! Exemplar documents.
//!
//! A [`TelemetryDocument`] describes one specific operation (a failed
//! request, a slow dependency call, an exception) in detail. Producers in the
//! host enqueue them into the live accumulator; the collector forwards the
//! ones the [`QuotaTracker`](crate::quota::QuotaTracker) lets through.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::serialization::{Serializable, SerializationWriter};

/// Kind of an exemplar document. Each kind has its own queue and its own
/// quota bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKind {
    Request,
    RemoteDependency,
    Exception,
    Event,
    Trace,
}

impl DocumentKind {
    /// Number of kinds.
    pub const COUNT: usize = 5;

    /// All kinds, in queue order.
    pub const ALL: [DocumentKind; Self::COUNT] = [
        DocumentKind::Request,
        DocumentKind::RemoteDependency,
        DocumentKind::Exception,
        DocumentKind::Event,
        DocumentKind::Trace,
    ];

    /// Position of this kind in [`DocumentKind::ALL`].
    pub const fn index(self) -> usize {
        match self {
            DocumentKind::Request => 0,
            DocumentKind::RemoteDependency => 1,
            DocumentKind::Exception => 2,
            DocumentKind::Event => 3,
            DocumentKind::Trace => 4,
        }
    }

    /// Name used on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Request => "Request",
            DocumentKind::RemoteDependency => "RemoteDependency",
            DocumentKind::Exception => "Exception",
            DocumentKind::Event => "Event",
            DocumentKind::Trace => "Trace",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detailed record of one operation.
///
/// # Examples
///
/// ```rust
/// use quickpulse::document::{DocumentKind, TelemetryDocument};
/// use std::time::Duration;
///
/// let doc = TelemetryDocument::new(DocumentKind::Request, "GET /cart")
///     .with_duration(Duration::from_millis(840))
///     .with_success(false)
///     .with_result_code("500")
///     .with_property("customer", "c-17");
///
/// assert_eq!(doc.kind, DocumentKind::Request);
/// assert_eq!(doc.success, Some(false));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryDocument {
    pub kind: DocumentKind,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub success: Option<bool>,
    pub result_code: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl TelemetryDocument {
    /// Creates a document stamped with the current time.
    pub fn new(kind: DocumentKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            timestamp: Utc::now(),
            duration: None,
            success: None,
            result_code: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_result_code(mut self, code: impl Into<String>) -> Self {
        self.result_code = Some(code.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl Serializable for TelemetryDocument {
    fn serialize(&self, writer: &mut dyn SerializationWriter) -> Result<()> {
        writer.write_str("DocumentType", Some(self.kind.as_str()))?;
        writer.write_str("Name", Some(self.name.as_str()))?;
        writer.write_timestamp("Timestamp", Some(self.timestamp))?;
        writer.write_duration("Duration", self.duration)?;
        writer.write_bool("Success", self.success)?;
        writer.write_str("ResultCode", self.result_code.as_deref())?;
        writer.write_str_map("Properties", Some(&self.properties))
    }
}
