//! Per-provider circuit breaker
//!
//! ```text
//! +--------+   N failures in window   +------+    cooldown elapsed    +-----------+
//! | Closed | -----------------------> | Open | ---------------------> | Half-Open |
//! +--------+                          +------+                        +-----------+
//!     ^                                   ^         trial fails             |
//!     |                                   +---------------------------------+
//!     |                 trial succeeds                                      |
//!     +---------------------------------------------------------------------+
//! ```
//!
//! Half-open admits exactly one trial call at a time. All state is atomic so
//! concurrent requests never serialise on the breaker.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const CLOSED: u32 = 0;
const OPEN: u32 = 1;
const HALF_OPEN: u32 = 2;

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    #[default]
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// One trial call is allowed through to test recovery
    HalfOpen,
}

/// Breaker thresholds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures inside the window that trip the breaker
    pub failure_threshold: u32,

    /// Failures older than this no longer count toward the threshold
    #[serde(with = "duration_secs")]
    pub failure_window: Duration,

    /// Time spent open before a trial is allowed
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`]
///
/// Report the outcome through the permit. A trial permit dropped without an
/// outcome hands the half-open slot back, so a cancelled call cannot leave
/// the breaker stuck.
#[must_use = "report the call outcome through the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
}

impl CallPermit<'_> {
    /// Whether this is the single half-open trial
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record a successful call
    pub fn record_success(mut self) {
        let trial = std::mem::take(&mut self.trial);
        self.breaker.on_success(trial);
    }

    /// Record a failure that reflects provider health
    pub fn record_failure(mut self) {
        let trial = std::mem::take(&mut self.trial);
        self.breaker.on_failure(trial);
    }

    /// Give the permit back without an outcome
    pub fn release(mut self) {
        if std::mem::take(&mut self.trial) {
            self.breaker.trial_in_flight.store(false, Ordering::Release);
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial {
            self.breaker.trial_in_flight.store(false, Ordering::Release);
            tracing::debug!(provider = %self.breaker.provider, "Half-open trial abandoned");
        }
    }
}

impl std::fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit")
            .field("provider", &self.breaker.provider)
            .field("trial", &self.trial)
            .finish()
    }
}

/// Point-in-time view of a breaker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// Provider the breaker guards
    pub provider: String,
    /// Current state
    pub state: CircuitState,
    /// Failures counted toward the threshold
    pub consecutive_failures: u32,
    /// How many times the breaker has opened
    pub times_opened: u64,
    /// Remaining cooldown while open
    pub retry_in_ms: Option<u64>,
}

/// Circuit breaker for a single provider
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,

    /// `CLOSED`, `OPEN` or `HALF_OPEN`
    state: AtomicU32,
    consecutive_failures: AtomicU32,

    /// Millis since `epoch`, +1 so that 0 means "never"
    last_failure_ms: AtomicU64,
    opened_at_ms: AtomicU64,

    trial_in_flight: AtomicBool,
    times_opened: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            state: AtomicU32::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            opened_at_ms: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            times_opened: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Provider name
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Current state, without triggering the open to half-open transition
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            OPEN => CircuitState::Open,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Ask to make a call
    ///
    /// # Errors
    ///
    /// Returns the remaining cooldown when the breaker is open, or
    /// [`Duration::ZERO`] when a half-open trial is already in flight.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, Duration> {
        match self.state.load(Ordering::Acquire) {
            CLOSED => Ok(self.permit(false)),
            OPEN => {
                let remaining = self.remaining_cooldown();
                if !remaining.is_zero() {
                    return Err(remaining);
                }
                if self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.trial_in_flight.store(false, Ordering::Release);
                    tracing::info!(provider = %self.provider, "Circuit breaker half-open, allowing trial call");
                }
                self.acquire_trial()
            }
            _ => self.acquire_trial(),
        }
    }

    /// Remaining wait if [`Self::try_acquire`] would reject right now
    ///
    /// Consumes nothing and never moves the breaker to half-open.
    #[must_use]
    pub fn rejection(&self) -> Option<Duration> {
        match self.state.load(Ordering::Acquire) {
            OPEN => {
                let remaining = self.remaining_cooldown();
                (!remaining.is_zero()).then_some(remaining)
            }
            HALF_OPEN if self.trial_in_flight.load(Ordering::Acquire) => Some(Duration::ZERO),
            _ => None,
        }
    }

    fn permit(&self, trial: bool) -> CallPermit<'_> {
        CallPermit {
            breaker: self,
            trial,
        }
    }

    fn acquire_trial(&self) -> Result<CallPermit<'_>, Duration> {
        // A concurrent failure may have re-opened the breaker.
        if self.state.load(Ordering::Acquire) == OPEN {
            return Err(self.remaining_cooldown());
        }
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| self.permit(true))
            .map_err(|_| Duration::ZERO)
    }

    fn on_success(&self, trial: bool) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.state.load(Ordering::Acquire) != CLOSED {
            self.transition_to_closed();
        }
        if trial {
            self.trial_in_flight.store(false, Ordering::Release);
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = self.now_millis();
        let last = self.last_failure_ms.swap(now, Ordering::AcqRel);
        let window_ms = u64::try_from(self.config.failure_window.as_millis()).unwrap_or(u64::MAX);
        if last != 0 && now.saturating_sub(last) > window_ms {
            self.consecutive_failures.store(0, Ordering::Release);
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match self.state.load(Ordering::Acquire) {
            HALF_OPEN => self.transition_to_open(failures),
            CLOSED if failures >= self.config.failure_threshold => self.transition_to_open(failures),
            _ => {}
        }
        if trial {
            self.trial_in_flight.store(false, Ordering::Release);
        }
    }

    /// Close the breaker and clear counters
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.last_failure_ms.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);
        self.state.store(CLOSED, Ordering::Release);
    }

    /// Point-in-time view
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state();
        let retry_in_ms = (state == CircuitState::Open)
            .then(|| u64::try_from(self.remaining_cooldown().as_millis()).unwrap_or(u64::MAX));
        CircuitSnapshot {
            provider: self.provider.clone(),
            state,
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            times_opened: self.times_opened.load(Ordering::Relaxed),
            retry_in_ms,
        }
    }

    fn transition_to_open(&self, failures: u32) {
        self.opened_at_ms.store(self.now_millis(), Ordering::Release);
        self.state.store(OPEN, Ordering::Release);
        self.times_opened.fetch_add(1, Ordering::Relaxed);

        tracing::warn!(
            provider = %self.provider,
            consecutive_failures = failures,
            cooldown_secs = self.config.cooldown.as_secs_f64(),
            "Circuit breaker opened"
        );
    }

    fn transition_to_closed(&self) {
        self.state.store(CLOSED, Ordering::Release);
        tracing::info!(provider = %self.provider, "Circuit breaker closed, provider recovered");
    }

    fn remaining_cooldown(&self) -> Duration {
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        let elapsed = Duration::from_millis(self.now_millis().saturating_sub(opened_at));
        self.config.cooldown.saturating_sub(elapsed)
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis())
            .unwrap_or(u64::MAX)
            .saturating_add(1)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("state", &self.state())
            .field(
                "consecutive_failures",
                &self.consecutive_failures.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}
