//! Contract between the collector and the network.
//!
//! The crate does not ship an HTTP client. Hosts implement [`Transport`] on
//! top of whatever client they already use; the collector only needs
//! "send this payload to this endpoint and tell me what the service said".
//! HTTP-based implementations can hand the raw body to
//! [`ServiceResponse::from_body`].
//!
//! # Example
//!
//! ```rust,ignore
//! use quickpulse::error::TransportError;
//! use quickpulse::transport::{Endpoint, ServiceResponse, Transport, TransportRequest};
//!
//! struct HttpTransport {
//!     client: reqwest::Client,
//!     base_url: String,
//! }
//!
//! impl Transport for HttpTransport {
//!     async fn send(&self, request: TransportRequest) -> Result<ServiceResponse, TransportError> {
//!         let url = format!("{}/{}", self.base_url, request.endpoint.path());
//!         let response = self
//!             .client
//!             .post(url)
//!             .timeout(request.timeout)
//!             .body(request.payload)
//!             .send()
//!             .await
//!             .map_err(|e| TransportError::Network(e.to_string()))?;
//!         let status_ok = response.status().is_success();
//!         let body = response.bytes().await.map_err(|e| TransportError::Network(e.to_string()))?;
//!         ServiceResponse::from_body(status_ok, &body)
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::TransportError;

/// Service operation a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Lightweight probe sent while no viewer is attached.
    Ping,
    /// Data-bearing request sent while collecting.
    Post,
}

impl Endpoint {
    /// Conventional path segment for the endpoint.
    pub const fn path(self) -> &'static str {
        match self {
            Endpoint::Ping => "ping",
            Endpoint::Post => "post",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub endpoint: Endpoint,
    /// Serialized payload.
    pub payload: String,
    /// Upper bound for the round trip. The collector enforces it as well.
    pub timeout: Duration,
}

/// What the service answered.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceResponse {
    /// Whether the service accepted the request.
    pub status_ok: bool,
    /// Whether a viewer is attached. `None` means the response did not say,
    /// which the collector treats as a malformed response.
    pub subscribed: Option<bool>,
    /// Suggested interval until the next request.
    pub next_interval_hint: Option<Duration>,
    /// The service asks this process to stop sending for good.
    pub stop: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBody {
    subscribed: Option<bool>,
    next_interval_ms: Option<u64>,
    #[serde(default)]
    stop: bool,
}

impl ServiceResponse {
    /// A successful response with the given subscription flag.
    pub fn ok(subscribed: bool) -> Self {
        Self {
            status_ok: true,
            subscribed: Some(subscribed),
            ..Self::default()
        }
    }

    /// A successful response telling the process to stop.
    pub fn stop() -> Self {
        Self {
            status_ok: true,
            stop: true,
            ..Self::default()
        }
    }

    pub fn with_next_interval_hint(mut self, hint: Duration) -> Self {
        self.next_interval_hint = Some(hint);
        self
    }

    /// Parses a JSON response body:
    /// `{"subscribed": bool, "nextIntervalMs": u64?, "stop": bool?}`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Malformed`] if the body is empty or not valid JSON
    /// of that shape.
    pub fn from_body(status_ok: bool, body: &[u8]) -> Result<Self, TransportError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(TransportError::Malformed("empty response body".to_string()));
        }
        let body: ResponseBody = serde_json::from_slice(body)?;
        Ok(Self {
            status_ok,
            subscribed: body.subscribed,
            next_interval_hint: body.next_interval_ms.map(Duration::from_millis),
            stop: body.stop,
        })
    }
}

/// Sends requests to the collection service.
///
/// Implementations should honor [`TransportRequest::timeout`]; the collector
/// additionally wraps every call in `tokio::time::timeout` and treats expiry
/// like any other failure.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<ServiceResponse, TransportError>> + Send;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<ServiceResponse, TransportError>> + Send {
        (**self).send(request)
    }
}
