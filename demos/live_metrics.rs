//! Demo of a collector streaming live metrics to a simulated service.
//!
//! Worker threads record requests, dependency calls and exceptions while a
//! collector pings a fake service. After a few pings the service reports a
//! viewer, the collector switches to posting, and every payload is printed.
//!
//! Run with:
//! ```bash
//! RUST_LOG=quickpulse=debug cargo run --example live_metrics --features demo -- --help
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use quickpulse::accumulator::LiveAccumulator;
use quickpulse::collector::Collector;
use quickpulse::config::{PayloadFormat, QuickPulseConfig};
use quickpulse::document::{DocumentKind, TelemetryDocument};
use quickpulse::error::TransportError;
use quickpulse::sample::{COMMITTED_BYTES, PROCESSOR_TIME};
use quickpulse::transport::{Endpoint, ServiceResponse, Transport, TransportRequest};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatChoice {
    Json,
    Flat,
}

impl From<FormatChoice> for PayloadFormat {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::Json => PayloadFormat::Json,
            FormatChoice::Flat => PayloadFormat::Flat,
        }
    }
}

/// Streams simulated traffic through a live-metrics collector.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Payload encoding
    #[arg(short, long, value_enum, default_value = "json")]
    format: FormatChoice,

    /// Worker threads recording traffic
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// How long to run, in seconds
    #[arg(short, long, default_value = "10")]
    seconds: u64,

    /// Ping interval in milliseconds
    #[arg(long, default_value = "1000")]
    idle_ms: u64,

    /// Post interval in milliseconds
    #[arg(long, default_value = "500")]
    collection_ms: u64,

    /// Pings answered before the simulated viewer attaches
    #[arg(long, default_value = "2")]
    subscribe_after: usize,

    /// Every Nth post fails, 0 to never fail
    #[arg(long, default_value = "0")]
    fail_every: usize,

    /// Exemplar documents per kind allowed per minute
    #[arg(long, default_value = "30")]
    quota: f64,
}

/// A service that attaches a viewer after a number of pings.
struct SimulatedService {
    pings: AtomicUsize,
    posts: AtomicUsize,
    subscribe_after: usize,
    fail_every: usize,
}

impl Transport for SimulatedService {
    async fn send(&self, request: TransportRequest) -> Result<ServiceResponse, TransportError> {
        match request.endpoint {
            Endpoint::Ping => {
                let pings = self.pings.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(ServiceResponse::ok(pings > self.subscribe_after))
            }
            Endpoint::Post => {
                let posts = self.posts.fetch_add(1, Ordering::Relaxed) + 1;
                if self.fail_every > 0 && posts % self.fail_every == 0 {
                    return Err(TransportError::Status(503));
                }
                println!("--- post #{posts} ({} bytes)", request.payload.len());
                println!("{}", request.payload);
                Ok(ServiceResponse::ok(true))
            }
        }
    }
}

fn simulate_traffic(
    live: &Arc<LiveAccumulator>,
    running: &Arc<AtomicBool>,
    num_threads: usize,
) -> Vec<thread::JoinHandle<()>> {
    (0..num_threads)
        .map(|t| {
            let live = Arc::clone(live);
            let running = Arc::clone(running);
            thread::spawn(move || {
                let mut i: u64 = 0;
                while running.load(Ordering::Relaxed) {
                    i += 1;
                    let latency = Duration::from_micros(500 + (i * 37 + t as u64 * 11) % 4_000);
                    let success = i % 50 != 0;
                    live.record_request(latency, success);
                    live.record_dependency(latency / 3, i % 120 != 0);
                    if !success {
                        live.record_exception();
                        live.enqueue_document(
                            TelemetryDocument::new(DocumentKind::Request, "GET /checkout")
                                .with_duration(latency)
                                .with_success(false)
                                .with_result_code("500")
                                .with_property("worker", t.to_string()),
                        );
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quickpulse=info")),
        )
        .init();

    let args = Args::parse();

    let config = QuickPulseConfig::default()
        .with_instance_name("demo")
        .with_idle_interval(Duration::from_millis(args.idle_ms))
        .with_collection_interval(Duration::from_millis(args.collection_ms))
        .with_payload_format(args.format.into())
        .with_performance_counters([PROCESSOR_TIME, COMMITTED_BYTES])
        .with_quota(quickpulse::quota::QuotaConfig::new(args.quota, args.quota / 60.0));

    let service = SimulatedService {
        pings: AtomicUsize::new(0),
        posts: AtomicUsize::new(0),
        subscribe_after: args.subscribe_after,
        fail_every: args.fail_every,
    };

    let mut tick = 0.0_f64;
    let counters = move || {
        tick += 1.0;
        HashMap::from([
            (PROCESSOR_TIME.to_string(), 20.0 + (tick * 7.0) % 30.0),
            (COMMITTED_BYTES.to_string(), 512.0 * 1024.0 * 1024.0),
        ])
    };

    let handle = Collector::new(config, service, counters).spawn();

    let running = Arc::new(AtomicBool::new(true));
    let workers = simulate_traffic(handle.live(), &running, args.threads);

    tokio::time::sleep(Duration::from_secs(args.seconds)).await;

    running.store(false, Ordering::Relaxed);
    for worker in workers {
        worker.join().unwrap();
    }
    handle.stop().await;
}
