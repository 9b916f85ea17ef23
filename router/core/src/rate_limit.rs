//! Per-Provider Rate Limiting
//!
//! Fixed-window budgets enforced before every outbound call:
//!
//! - requests per minute (always)
//! - tokens per minute (optional, charged after each response)
//! - requests per day (optional)
//!
//! # Design
//!
//! `check` never blocks. A denial is returned as data and the router treats
//! it like any other dispatch failure, so the request moves on to the next
//! fallback family instead of waiting. Windows live in a `DashMap` keyed by
//! family; each check holds only that family's shard lock.
//!
//! # Usage
//!
//! ```
//! use radiant_router::rate_limit::{RateLimitConfig, RateLimiter};
//! use radiant_router::ProviderFamily;
//!
//! let limiter = RateLimiter::new()
//!     .with_config(ProviderFamily::Groq, RateLimitConfig::new().with_requests_per_minute(30));
//!
//! let decision = limiter.check(ProviderFamily::Groq);
//! assert!(decision.allowed);
//! assert_eq!(decision.remaining, 29);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::registry::ProviderFamily;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Configuration
// =============================================================================

/// Budget for one provider family
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub requests_per_minute: u32,

    /// Tokens (prompt + completion) allowed per window
    pub tokens_per_minute: Option<u64>,

    /// Requests allowed per day
    pub daily_requests: Option<u32>,

    /// Whether the budget is enforced at all
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: None,
            daily_requests: None,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request budget
    #[must_use]
    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    /// Set the token budget
    #[must_use]
    pub fn with_tokens_per_minute(mut self, tpm: u64) -> Self {
        self.tokens_per_minute = Some(tpm);
        self
    }

    /// Set the daily request cap
    #[must_use]
    pub fn with_daily_requests(mut self, cap: u32) -> Self {
        self.daily_requests = Some(cap);
        self
    }

    /// Enable or disable enforcement
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// No enforcement
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Default budget for a family's account tier
    #[must_use]
    pub fn for_family(family: ProviderFamily) -> Self {
        match family {
            ProviderFamily::Bedrock => Self::new().with_requests_per_minute(200),
            ProviderFamily::LiteLlm | ProviderFamily::OpenAi => {
                Self::new().with_requests_per_minute(500)
            }
            ProviderFamily::Anthropic => Self::new()
                .with_requests_per_minute(50)
                .with_tokens_per_minute(400_000),
            ProviderFamily::Groq => Self::new()
                .with_requests_per_minute(30)
                .with_daily_requests(14_400),
            ProviderFamily::Perplexity => Self::new().with_requests_per_minute(50),
            ProviderFamily::OpenRouter => Self::new().with_requests_per_minute(200),
            ProviderFamily::Ollama => Self::disabled(),
        }
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Which budget denied a call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Request budget for the window is spent
    RequestsPerMinute,
    /// Token budget for the window is spent
    TokensPerMinute,
    /// Daily request cap reached
    DailyCap,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestsPerMinute => write!(f, "requests per minute"),
            Self::TokensPerMinute => write!(f, "tokens per minute"),
            Self::DailyCap => write!(f, "daily cap"),
        }
    }
}

/// Outcome of [`RateLimiter::check`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the call may proceed
    pub allowed: bool,
    /// Size of the budget that applied
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Time until the limiting window resets
    pub reset_in: Duration,
    /// Set when denied
    pub reason: Option<DenialReason>,
}

impl RateLimitDecision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: u64::MAX,
            remaining: u64::MAX,
            reset_in: Duration::ZERO,
            reason: None,
        }
    }

    fn denied(reason: DenialReason, limit: u64, reset_in: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_in,
            reason: Some(reason),
        }
    }
}

/// Budget usage for one family
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Requests allowed per window
    pub limit: u64,
    /// Requests used in the current window
    pub used: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Time until the window resets
    pub reset_in_ms: u64,
    /// Tokens charged in the current window
    pub tokens_used: u64,
    /// Token budget, if any
    pub token_limit: Option<u64>,
    /// Requests used today
    pub daily_used: u64,
    /// Daily cap, if any
    pub daily_limit: Option<u64>,
    /// Whether enforcement is on
    pub enabled: bool,
}

// =============================================================================
// Windows
// =============================================================================

#[derive(Debug)]
struct Window {
    started: Instant,
    requests: u64,
    tokens: u64,
    day_started: Instant,
    day_requests: u64,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            requests: 0,
            tokens: 0,
            day_started: now,
            day_requests: 0,
        }
    }

    fn roll(&mut self, now: Instant, length: Duration) {
        if now.duration_since(self.started) >= length {
            self.started = now;
            self.requests = 0;
            self.tokens = 0;
        }
        if now.duration_since(self.day_started) >= DAY {
            self.day_started = now;
            self.day_requests = 0;
        }
    }

    fn reset_in(&self, now: Instant, length: Duration) -> Duration {
        length.saturating_sub(now.duration_since(self.started))
    }

    fn day_reset_in(&self, now: Instant) -> Duration {
        DAY.saturating_sub(now.duration_since(self.day_started))
    }
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Per-family fixed-window limiter
#[derive(Debug)]
pub struct RateLimiter {
    configs: HashMap<ProviderFamily, RateLimitConfig>,
    windows: DashMap<ProviderFamily, Window>,
    window_length: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Limiter with per-family default budgets
    #[must_use]
    pub fn new() -> Self {
        Self {
            configs: ProviderFamily::ALL
                .into_iter()
                .map(|family| (family, RateLimitConfig::for_family(family)))
                .collect(),
            windows: DashMap::new(),
            window_length: MINUTE,
        }
    }

    /// Override one family's budget
    #[must_use]
    pub fn with_config(mut self, family: ProviderFamily, config: RateLimitConfig) -> Self {
        self.configs.insert(family, config);
        self
    }

    /// Shorten or lengthen the request window
    #[must_use]
    pub fn with_window(mut self, length: Duration) -> Self {
        self.window_length = length;
        self
    }

    /// Budget in force for `family`
    #[must_use]
    pub fn config(&self, family: ProviderFamily) -> RateLimitConfig {
        self.configs.get(&family).cloned().unwrap_or_default()
    }

    /// Check and, when allowed, consume one request slot
    pub fn check(&self, family: ProviderFamily) -> RateLimitDecision {
        let config = self.config(family);
        if !config.enabled {
            return RateLimitDecision::unlimited();
        }

        let now = Instant::now();
        let mut window = self
            .windows
            .entry(family)
            .or_insert_with(|| Window::new(now));
        window.roll(now, self.window_length);

        let rpm = u64::from(config.requests_per_minute);
        let reset_in = window.reset_in(now, self.window_length);

        if window.requests >= rpm {
            return RateLimitDecision::denied(DenialReason::RequestsPerMinute, rpm, reset_in);
        }
        if let Some(tpm) = config.tokens_per_minute {
            if window.tokens >= tpm {
                return RateLimitDecision::denied(DenialReason::TokensPerMinute, tpm, reset_in);
            }
        }
        if let Some(cap) = config.daily_requests.map(u64::from) {
            if window.day_requests >= cap {
                return RateLimitDecision::denied(
                    DenialReason::DailyCap,
                    cap,
                    window.day_reset_in(now),
                );
            }
        }

        window.requests += 1;
        window.day_requests += 1;

        RateLimitDecision {
            allowed: true,
            limit: rpm,
            remaining: rpm - window.requests,
            reset_in,
            reason: None,
        }
    }

    /// Charge tokens consumed by a completed call
    pub fn record_tokens(&self, family: ProviderFamily, tokens: u64) {
        if !self.config(family).enabled {
            return;
        }
        let now = Instant::now();
        let mut window = self
            .windows
            .entry(family)
            .or_insert_with(|| Window::new(now));
        window.roll(now, self.window_length);
        window.tokens = window.tokens.saturating_add(tokens);
    }

    /// Charge extra upstream requests, such as retries, without a check
    ///
    /// The window may overshoot its limit; the next [`Self::check`] denies.
    pub fn record_requests(&self, family: ProviderFamily, requests: u64) {
        if !self.config(family).enabled {
            return;
        }
        let now = Instant::now();
        let mut window = self
            .windows
            .entry(family)
            .or_insert_with(|| Window::new(now));
        window.roll(now, self.window_length);
        window.requests = window.requests.saturating_add(requests);
        window.day_requests = window.day_requests.saturating_add(requests);
    }

    /// Usage for one family, without consuming anything
    #[must_use]
    pub fn status_for(&self, family: ProviderFamily) -> RateLimitStatus {
        let config = self.config(family);
        let now = Instant::now();
        let limit = u64::from(config.requests_per_minute);

        let (used, tokens_used, daily_used, reset_in) = match self.windows.get(&family) {
            Some(window) => {
                let daily = if now.duration_since(window.day_started) >= DAY {
                    0
                } else {
                    window.day_requests
                };
                if now.duration_since(window.started) >= self.window_length {
                    (0, 0, daily, self.window_length)
                } else {
                    let reset_in = window.reset_in(now, self.window_length);
                    (window.requests, window.tokens, daily, reset_in)
                }
            }
            None => (0, 0, 0, self.window_length),
        };

        RateLimitStatus {
            limit,
            used,
            remaining: limit.saturating_sub(used),
            reset_in_ms: u64::try_from(reset_in.as_millis()).unwrap_or(u64::MAX),
            tokens_used,
            token_limit: config.tokens_per_minute,
            daily_used,
            daily_limit: config.daily_requests.map(u64::from),
            enabled: config.enabled,
        }
    }

    /// Usage for every family
    #[must_use]
    pub fn status(&self) -> BTreeMap<ProviderFamily, RateLimitStatus> {
        ProviderFamily::ALL
            .into_iter()
            .map(|family| (family, self.status_for(family)))
            .collect()
    }

    /// Clear every window
    pub fn reset(&self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limiter(config: RateLimitConfig) -> RateLimiter {
        RateLimiter::new().with_config(ProviderFamily::OpenAi, config)
    }

    #[test]
    fn test_allows_under_limit() {
        let limiter = limiter(RateLimitConfig::new().with_requests_per_minute(3));

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check(ProviderFamily::OpenAi);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
        }
    }

    #[test]
    fn test_denies_over_limit_with_reset_time() {
        let limiter = limiter(RateLimitConfig::new().with_requests_per_minute(1));

        assert!(limiter.check(ProviderFamily::OpenAi).allowed);
        let denied = limiter.check(ProviderFamily::OpenAi);
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some(DenialReason::RequestsPerMinute));
        assert!(denied.reset_in > Duration::ZERO);
        assert!(denied.reset_in <= MINUTE);
    }

    #[test]
    fn test_denial_consumes_nothing() {
        let limiter = limiter(RateLimitConfig::new().with_requests_per_minute(1));
        limiter.check(ProviderFamily::OpenAi);
        limiter.check(ProviderFamily::OpenAi);
        limiter.check(ProviderFamily::OpenAi);

        let status = limiter.status_for(ProviderFamily::OpenAi);
        assert_eq!(status.used, 1);
        assert_eq!(status.daily_used, 1);
    }

    #[test]
    fn test_recorded_retries_use_the_budget() {
        let limiter = limiter(RateLimitConfig::new().with_requests_per_minute(3));

        assert!(limiter.check(ProviderFamily::OpenAi).allowed);
        limiter.record_requests(ProviderFamily::OpenAi, 2);

        let status = limiter.status_for(ProviderFamily::OpenAi);
        assert_eq!(status.used, 3);
        assert_eq!(status.remaining, 0);
        assert!(!limiter.check(ProviderFamily::OpenAi).allowed);
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(RateLimitConfig::new().with_requests_per_minute(1))
            .with_window(Duration::from_millis(10));

        assert!(limiter.check(ProviderFamily::OpenAi).allowed);
        assert!(!limiter.check(ProviderFamily::OpenAi).allowed);

        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check(ProviderFamily::OpenAi).allowed);
    }

    #[test]
    fn test_token_budget() {
        let limiter = limiter(
            RateLimitConfig::new()
                .with_requests_per_minute(100)
                .with_tokens_per_minute(1000),
        );

        assert!(limiter.check(ProviderFamily::OpenAi).allowed);
        limiter.record_tokens(ProviderFamily::OpenAi, 1200);

        let denied = limiter.check(ProviderFamily::OpenAi);
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some(DenialReason::TokensPerMinute));
        assert_eq!(denied.limit, 1000);
    }

    #[test]
    fn test_daily_cap_outlives_window() {
        let limiter = limiter(
            RateLimitConfig::new()
                .with_requests_per_minute(100)
                .with_daily_requests(2),
        )
        .with_window(Duration::from_millis(5));

        assert!(limiter.check(ProviderFamily::OpenAi).allowed);
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.check(ProviderFamily::OpenAi).allowed);
        std::thread::sleep(Duration::from_millis(10));

        let denied = limiter.check(ProviderFamily::OpenAi);
        assert_eq!(denied.reason, Some(DenialReason::DailyCap));
        assert!(denied.reset_in > Duration::from_secs(60 * 60));
    }

    #[test]
    fn test_disabled_always_allows() {
        let limiter = limiter(RateLimitConfig::disabled());
        for _ in 0..1000 {
            assert!(limiter.check(ProviderFamily::OpenAi).allowed);
        }
        assert_eq!(limiter.status_for(ProviderFamily::OpenAi).used, 0);
    }

    #[test]
    fn test_families_are_independent() {
        let limiter = RateLimiter::new()
            .with_config(ProviderFamily::OpenAi, RateLimitConfig::new().with_requests_per_minute(1))
            .with_config(ProviderFamily::Groq, RateLimitConfig::new().with_requests_per_minute(1));

        assert!(limiter.check(ProviderFamily::OpenAi).allowed);
        assert!(!limiter.check(ProviderFamily::OpenAi).allowed);
        assert!(limiter.check(ProviderFamily::Groq).allowed);
    }

    #[test]
    fn test_status_reports_every_family() {
        let limiter = limiter(RateLimitConfig::new().with_requests_per_minute(10));
        limiter.check(ProviderFamily::OpenAi);
        limiter.check(ProviderFamily::OpenAi);

        let status = limiter.status();
        assert_eq!(status.len(), ProviderFamily::ALL.len());
        let openai = &status[&ProviderFamily::OpenAi];
        assert_eq!(openai.limit, 10);
        assert_eq!(openai.used, 2);
        assert_eq!(openai.remaining, 8);
        assert!(openai.reset_in_ms <= 60_000);
    }

    #[test]
    fn test_concurrent_checks_never_overshoot() {
        use std::sync::Arc;
        use std::thread;

        let limiter = Arc::new(limiter(RateLimitConfig::new().with_requests_per_minute(50)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    (0..20)
                        .filter(|_| limiter.check(ProviderFamily::OpenAi).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }
}
