//! Token-bucket throttle for exemplar documents.
//!
//! Aggregate counters are cheap and always sent in full. Exemplar documents
//! are not, so each [`DocumentKind`] gets its own bucket:
//!
//! - tokens accrue at `refill_rate_per_second`, up to `max_tokens`
//! - forwarding one document spends one token
//! - with less than one token left, documents of that kind are dropped
//!
//! The tracker is owned by the collector task and only touched from there,
//! so it takes `&mut self` and needs no locking.
//!
//! # Examples
//!
//! ```rust
//! use quickpulse::document::DocumentKind;
//! use quickpulse::quota::{QuotaConfig, QuotaTracker};
//! use std::time::{Duration, Instant};
//!
//! let mut tracker = QuotaTracker::new(QuotaConfig::new(5.0, 1.0));
//! let t0 = Instant::now();
//!
//! for _ in 0..5 {
//!     assert!(tracker.try_consume_at(DocumentKind::Request, t0));
//! }
//! assert!(!tracker.try_consume_at(DocumentKind::Request, t0));
//!
//! let t1 = t0 + Duration::from_secs(1);
//! assert!(tracker.try_consume_at(DocumentKind::Request, t1));
//! assert!(!tracker.try_consume_at(DocumentKind::Request, t1));
//! ```

use std::collections::HashMap;
use std::time::Instant;

use serde::Deserialize;

use crate::document::DocumentKind;

/// Bucket parameters for one document kind.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Bucket capacity.
    pub max_tokens: f64,
    /// Tokens added per second of elapsed time.
    pub refill_rate_per_second: f64,
    /// Tokens in a new bucket. `None` starts the bucket full.
    pub initial_tokens: Option<f64>,
}

impl Default for QuotaConfig {
    /// 30 documents per minute with a burst of 30.
    fn default() -> Self {
        Self {
            max_tokens: 30.0,
            refill_rate_per_second: 0.5,
            initial_tokens: None,
        }
    }
}

impl QuotaConfig {
    pub fn new(max_tokens: f64, refill_rate_per_second: f64) -> Self {
        Self {
            max_tokens,
            refill_rate_per_second,
            initial_tokens: None,
        }
    }

    pub fn with_initial_tokens(mut self, tokens: f64) -> Self {
        self.initial_tokens = Some(tokens);
        self
    }
}

/// Token-bucket state of one document kind.
///
/// Invariant: `0 <= tokens_available <= max_tokens`.
#[derive(Debug, Clone)]
pub struct QuotaState {
    tokens_available: f64,
    max_tokens: f64,
    refill_rate_per_second: f64,
    last_refill: Instant,
}

impl QuotaState {
    pub fn new(config: &QuotaConfig, now: Instant) -> Self {
        let max_tokens = config.max_tokens.max(0.0);
        let initial = config.initial_tokens.unwrap_or(max_tokens);
        Self {
            tokens_available: initial.clamp(0.0, max_tokens),
            max_tokens,
            refill_rate_per_second: config.refill_rate_per_second.max(0.0),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        // A clock reading older than the last refill adds nothing.
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        self.tokens_available = (self.tokens_available
            + elapsed.as_secs_f64() * self.refill_rate_per_second)
            .min(self.max_tokens);
        self.last_refill = now;
    }

    /// Refills for the time elapsed since the last call, then spends one
    /// token if at least one is available.
    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens_available >= 1.0 {
            self.tokens_available -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn tokens_available(&self) -> f64 {
        self.tokens_available
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }
}

/// Per-kind document throttle.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    default_config: QuotaConfig,
    overrides: HashMap<DocumentKind, QuotaConfig>,
    buckets: HashMap<DocumentKind, QuotaState>,
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}

impl QuotaTracker {
    /// Creates a tracker applying `config` to every kind.
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            default_config: config,
            overrides: HashMap::new(),
            buckets: HashMap::new(),
        }
    }

    /// Uses `config` for `kind` instead of the default.
    pub fn with_kind_config(mut self, kind: DocumentKind, config: QuotaConfig) -> Self {
        self.overrides.insert(kind, config);
        self.buckets.remove(&kind);
        self
    }

    /// Asks whether one document of `kind` may be forwarded now.
    pub fn try_consume(&mut self, kind: DocumentKind) -> bool {
        self.try_consume_at(kind, Instant::now())
    }

    /// Like [`try_consume`](Self::try_consume) with an explicit clock
    /// reading. Buckets are created on first use, starting at `now`.
    pub fn try_consume_at(&mut self, kind: DocumentKind, now: Instant) -> bool {
        let config = self
            .overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.default_config);
        self.buckets
            .entry(kind)
            .or_insert_with(|| QuotaState::new(&config, now))
            .try_consume_at(now)
    }

    /// Current bucket of `kind`, if one has been created.
    pub fn state(&self, kind: DocumentKind) -> Option<&QuotaState> {
        self.buckets.get(&kind)
    }
}
