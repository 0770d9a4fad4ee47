//! The background driver.
//!
//! A [`Collector`] owns the transport, the quota tracker, the unsent-sample
//! buffer and the state machine, and shares the [`LiveAccumulator`] with the
//! host. Each [`tick`](Collector::tick):
//!
//! - **idle**: pings with an identity-only data point
//! - **collecting**: retires the live accumulator, reduces it with a fresh
//!   performance-counter reading, lets the quota pick exemplar documents,
//!   appends the data point to the buffer and posts the whole buffer
//! - **stopped**: does nothing
//!
//! The response drives the state machine, which decides how long to sleep.
//! Transport errors never reach the host; they are logged and turned into
//! backoff.
//!
//! # Examples
//!
//! ```rust,no_run
//! use quickpulse::collector::{Collector, NoCounters};
//! use quickpulse::config::QuickPulseConfig;
//! use quickpulse::error::TransportError;
//! use quickpulse::transport::{ServiceResponse, Transport, TransportRequest};
//! use std::time::Duration;
//!
//! struct AlwaysWatching;
//!
//! impl Transport for AlwaysWatching {
//!     async fn send(&self, _request: TransportRequest) -> Result<ServiceResponse, TransportError> {
//!         Ok(ServiceResponse::ok(true))
//!     }
//! }
//!
//! # async fn run() {
//! let collector = Collector::new(QuickPulseConfig::default(), AlwaysWatching, NoCounters);
//! let handle = collector.spawn();
//!
//! handle.live().record_request(Duration::from_millis(12), true);
//!
//! handle.stop().await;
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accumulator::LiveAccumulator;
use crate::config::QuickPulseConfig;
use crate::document::TelemetryDocument;
use crate::error::TransportError;
use crate::payload::{self, MonitoringDataPoint};
use crate::quota::QuotaTracker;
use crate::sample::DataSample;
use crate::state::{CollectionState, StateMachine, Transition};
use crate::transport::{Endpoint, ServiceResponse, Transport, TransportRequest};

/// Produces a fresh performance-counter reading for each posted sample.
pub trait CounterSource: Send + 'static {
    fn read(&mut self) -> HashMap<String, f64>;
}

impl<F> CounterSource for F
where
    F: FnMut() -> HashMap<String, f64> + Send + 'static,
{
    fn read(&mut self) -> HashMap<String, f64> {
        self()
    }
}

/// A source reporting no performance counters; every one reads as `0.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCounters;

impl CounterSource for NoCounters {
    fn read(&mut self) -> HashMap<String, f64> {
        HashMap::new()
    }
}

pub struct Collector<T, C> {
    config: QuickPulseConfig,
    live: Arc<LiveAccumulator>,
    machine: StateMachine,
    quota: QuotaTracker,
    pending: VecDeque<MonitoringDataPoint>,
    transport: T,
    counters: C,
}

impl<T: Transport, C: CounterSource> Collector<T, C> {
    pub fn new(config: QuickPulseConfig, transport: T, counters: C) -> Self {
        Self {
            live: Arc::new(LiveAccumulator::with_document_capacity(
                config.document_capacity,
            )),
            machine: StateMachine::new(&config),
            quota: QuotaTracker::new(config.quota),
            pending: VecDeque::with_capacity(config.max_buffered_samples),
            config,
            transport,
            counters,
        }
    }

    /// The accumulator slot host code records into.
    pub fn live(&self) -> &Arc<LiveAccumulator> {
        &self.live
    }

    pub fn state(&self) -> CollectionState {
        self.machine.state()
    }

    /// Delay until the next tick is due, `None` once stopped.
    pub fn next_delay(&self) -> Option<Duration> {
        self.machine.next_delay()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.machine.consecutive_failures()
    }

    /// Samples waiting for a successful post.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Runs one round trip for the current state and returns the delay
    /// until the next one, or `None` once stopped.
    pub async fn tick(&mut self) -> Option<Duration> {
        let transition = match self.machine.state() {
            CollectionState::Stopped => return None,
            CollectionState::Idle => self.ping().await,
            CollectionState::Collecting => self.post().await,
        };
        if transition.changed() {
            self.on_state_change(transition);
        }
        transition.delay
    }

    async fn ping(&mut self) -> Transition {
        let point = MonitoringDataPoint::identity(&self.config, Utc::now());
        match payload::encode(std::slice::from_ref(&point), self.config.payload_format) {
            Ok(payload) => {
                let result = self.send(Endpoint::Ping, payload).await;
                self.apply(Endpoint::Ping, result)
            }
            Err(err) => {
                warn!(error = %err, "failed to encode ping");
                self.machine.on_failure()
            }
        }
    }

    async fn post(&mut self) -> Transition {
        self.collect_sample();
        if self.pending.is_empty() {
            let identity = MonitoringDataPoint::identity(&self.config, Utc::now());
            self.pending.push_back(identity);
        }

        let encoded = payload::encode(self.pending.make_contiguous(), self.config.payload_format);
        let payload = match encoded {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, samples = self.pending.len(), "failed to encode samples");
                self.pending.clear();
                return self.machine.on_failure();
            }
        };

        let samples = self.pending.len();
        let result = self.send(Endpoint::Post, payload).await;
        if matches!(&result, Ok(response) if response.status_ok) {
            self.pending.clear();
        } else {
            debug!(samples, "keeping samples for the next post");
        }
        self.apply(Endpoint::Post, result)
    }

    /// Retires the live accumulator and buffers its sample.
    fn collect_sample(&mut self) {
        let retired = self.live.rotate();
        let reading = self.counters.read();
        let names: Vec<&str> = self
            .config
            .performance_counters
            .iter()
            .map(String::as_str)
            .collect();

        let sample = match DataSample::reduce_with_counters(&retired, &reading, &names) {
            Ok(sample) => sample,
            Err(err) => {
                warn!(error = %err, "dropping sample");
                return;
            }
        };
        let dropped = retired.dropped_documents();
        if dropped > 0 {
            debug!(dropped, "document queues overflowed during the interval");
        }
        let documents = self.admit_documents(retired.drain_documents());
        let point = MonitoringDataPoint::from_sample(&self.config, &sample, documents);

        self.pending.push_back(point);
        let max = self.config.max_buffered_samples.max(1);
        while self.pending.len() > max {
            self.pending.pop_front();
            debug!(max, "unsent sample buffer full, dropped the oldest sample");
        }
    }

    fn admit_documents(&mut self, documents: Vec<TelemetryDocument>) -> Vec<TelemetryDocument> {
        let now = tokio::time::Instant::now().into_std();
        let offered = documents.len();
        let admitted: Vec<_> = documents
            .into_iter()
            .filter(|doc| self.quota.try_consume_at(doc.kind, now))
            .collect();
        if admitted.len() < offered {
            debug!(offered, admitted = admitted.len(), "documents throttled by quota");
        }
        admitted
    }

    fn send(
        &self,
        endpoint: Endpoint,
        payload: String,
    ) -> impl std::future::Future<Output = Result<ServiceResponse, TransportError>> + Send + '_
    {
        let timeout = self.config.send_timeout;
        let request = TransportRequest {
            endpoint,
            payload,
            timeout,
        };
        debug!(%endpoint, bytes = request.payload.len(), "sending request");
        let transport = &self.transport;
        async move {
            match tokio::time::timeout(timeout, transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            }
        }
    }

    fn apply(
        &mut self,
        endpoint: Endpoint,
        result: Result<ServiceResponse, TransportError>,
    ) -> Transition {
        match result {
            Ok(response) => {
                if !response.status_ok {
                    warn!(%endpoint, "service rejected the request");
                } else if response.subscribed.is_none() && !response.stop {
                    warn!(%endpoint, "response did not say whether a viewer is attached");
                }
                self.machine.on_response(&response)
            }
            Err(err) => {
                let transition = self.machine.on_failure();
                warn!(
                    %endpoint,
                    error = %err,
                    failures = self.machine.consecutive_failures(),
                    retry_in = ?transition.delay,
                    "request failed"
                );
                transition
            }
        }
    }

    fn on_state_change(&mut self, transition: Transition) {
        info!(from = %transition.from, to = %transition.to, "collection state changed");
        match transition.to {
            CollectionState::Collecting => self.live.reset(),
            CollectionState::Idle | CollectionState::Stopped => self.pending.clear(),
        }
    }

    /// Ticks until stopped by the service or until `shutdown` changes.
    /// Shutdown is only observed between ticks, so a request in flight
    /// always completes or times out first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            instance = %self.config.instance_name,
            stream_id = %self.config.stream_id,
            "live metrics collector started"
        );
        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }
            let Some(delay) = self.tick().await else {
                info!("service asked to stop sending");
                break;
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!(state = %self.machine.state(), "live metrics collector stopped");
    }

    /// Starts [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(self) -> CollectorHandle {
        let (shutdown, receiver) = watch::channel(false);
        let live = Arc::clone(&self.live);
        let task = tokio::spawn(self.run(receiver));
        CollectorHandle {
            shutdown,
            task,
            live,
        }
    }
}

/// Handle to a spawned collector. Dropping it also stops the collector at
/// its next sleep.
#[derive(Debug)]
pub struct CollectorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    live: Arc<LiveAccumulator>,
}

impl CollectorHandle {
    pub fn live(&self) -> &Arc<LiveAccumulator> {
        &self.live
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the loop and waits for it to exit.
    pub async fn stop(self) {
        // The loop may already be gone after a stop instruction.
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "collector task ended abnormally");
        }
    }
}
