//! Ping/post state machine.
//!
//! ```text
//!              ping ok, subscribed
//!        ┌──────────────────────────────┐
//!        │                              ▼
//!    ┌───────┐                   ┌────────────┐
//!    │ Idle  │                   │ Collecting │
//!    └───────┘                   └────────────┘
//!        ▲                              │
//!        └──────────────────────────────┘
//!              post ok, unsubscribed
//!
//!    any state ──(stop instruction)──► Stopped
//! ```
//!
//! Failures leave the state unchanged and grow the delay exponentially from
//! the base interval of the current state up to the configured cap. The
//! next success resets it. No I/O happens here; the collector feeds
//! responses in and sleeps for whatever [`StateMachine::next_delay`] says.

use std::fmt;
use std::time::Duration;

use crate::config::QuickPulseConfig;
use crate::transport::ServiceResponse;

/// Where the collector stands with the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionState {
    /// No viewer attached; pinging at the idle interval.
    Idle,
    /// A viewer is attached; posting samples at the collection interval.
    Collecting,
    /// The service asked us to stop. Terminal.
    Stopped,
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CollectionState::Idle => "idle",
            CollectionState::Collecting => "collecting",
            CollectionState::Stopped => "stopped",
        })
    }
}

/// Result of feeding one outcome into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CollectionState,
    pub to: CollectionState,
    /// Delay before the next tick. `None` once stopped.
    pub delay: Option<Duration>,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: CollectionState,
    idle_interval: Duration,
    collection_interval: Duration,
    max_backoff: Duration,
    consecutive_failures: u32,
    delay: Duration,
}

impl StateMachine {
    /// Starts idle, with the first tick due immediately.
    pub fn new(config: &QuickPulseConfig) -> Self {
        Self {
            state: CollectionState::Idle,
            idle_interval: config.idle_interval,
            collection_interval: config.collection_interval,
            max_backoff: config.max_backoff,
            consecutive_failures: 0,
            delay: Duration::ZERO,
        }
    }

    /// Current state.
    pub fn state(&self) -> CollectionState {
        self.state
    }

    /// Failed round trips since the last success, used for backoff.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay until the next tick, `None` once stopped.
    pub fn next_delay(&self) -> Option<Duration> {
        match self.state {
            CollectionState::Stopped => None,
            _ => Some(self.delay),
        }
    }

    /// Current base interval of `state`.
    pub fn base_interval(&self, state: CollectionState) -> Duration {
        match state {
            CollectionState::Collecting => self.collection_interval,
            _ => self.idle_interval,
        }
    }

    /// Applies a response. Non-success statuses and responses that do not
    /// say whether a viewer is attached count as failures.
    pub fn on_response(&mut self, response: &ServiceResponse) -> Transition {
        let from = self.state;
        if from == CollectionState::Stopped {
            return self.transition(from);
        }
        if response.stop {
            self.state = CollectionState::Stopped;
            return self.transition(from);
        }
        let subscribed = match (response.status_ok, response.subscribed) {
            (true, Some(subscribed)) => subscribed,
            _ => return self.on_failure(),
        };

        self.state = if subscribed {
            CollectionState::Collecting
        } else {
            CollectionState::Idle
        };
        if let Some(hint) = response.next_interval_hint.filter(|hint| !hint.is_zero()) {
            match self.state {
                CollectionState::Collecting => self.collection_interval = hint,
                _ => self.idle_interval = hint,
            }
        }
        self.consecutive_failures = 0;
        self.delay = self.base_interval(self.state);
        self.transition(from)
    }

    /// Records a failed round trip: the state stays, the delay becomes
    /// `base * 2^failures`, capped at `max_backoff`.
    pub fn on_failure(&mut self) -> Transition {
        let from = self.state;
        if from == CollectionState::Stopped {
            return self.transition(from);
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let base = self.base_interval(from);
        let factor = 2u32.saturating_pow(self.consecutive_failures);
        self.delay = base
            .saturating_mul(factor)
            .min(self.max_backoff)
            .max(base);
        self.transition(from)
    }

    fn transition(&self, from: CollectionState) -> Transition {
        Transition {
            from,
            to: self.state,
            delay: self.next_delay(),
        }
    }
}
