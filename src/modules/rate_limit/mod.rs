//! Per-domain adaptive rate limiting.
//!
//! Each remote domain carries its own suggested delay that grows
//! multiplicatively under rate-limit signals and decays gently on success.
//! Keys are independent; a single map lock is enough because mutations per
//! domain are short and atomic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use http::HeaderMap;
use http::header::RETRY_AFTER;
use tokio::time::sleep;

/// Bounds and factors for the backoff state machine.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub initial_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub decay_factor: f64,
    /// Consecutive bare-429 failures before a forced cooldown kicks in.
    pub failure_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 1.5,
            decay_factor: 0.9,
            failure_threshold: 3,
        }
    }
}

/// Per-domain backoff state. `suggested_delay` always stays within bounds.
#[derive(Debug, Clone)]
struct DomainRateState {
    suggested_delay: Duration,
    last_request_at: Option<Instant>,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl DomainRateState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            suggested_delay: initial_delay,
            last_request_at: None,
            consecutive_failures: 0,
            cooldown_until: None,
        }
    }

    fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown_until
            .and_then(|until| until.checked_duration_since(now))
    }
}

/// Outcome of inspecting a response for rate-limit signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitCheck {
    pub is_rate_limited: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitCheck {
    fn clear() -> Self {
        Self {
            is_rate_limited: false,
            retry_after: None,
        }
    }
}

/// Observability snapshot for one domain.
#[derive(Debug, Clone)]
pub struct DomainRateSnapshot {
    pub domain: String,
    pub suggested_delay: Duration,
    pub consecutive_failures: u32,
    pub cooldown_remaining: Option<Duration>,
}

/// Per-domain adaptive delay/backoff state machine.
#[derive(Debug, Default)]
pub struct RateLimitDetector {
    config: RateLimitConfig,
    domains: Mutex<HashMap<String, DomainRateState>>,
}

impl RateLimitDetector {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep until the domain may be hit again, then stamp the request time.
    ///
    /// The wait is `max(0, suggested_delay - elapsed_since_last_request)`,
    /// or the remaining cooldown when one is active.
    pub async fn wait_for_rate_limit(&self, domain: &str) {
        let wait = {
            let mut guard = self.lock();
            let state = Self::entry(&mut guard, domain, &self.config);
            let now = Instant::now();
            if let Some(remaining) = state.cooldown_remaining(now) {
                remaining
            } else {
                match state.last_request_at {
                    Some(last) => state
                        .suggested_delay
                        .saturating_sub(now.saturating_duration_since(last)),
                    None => Duration::ZERO,
                }
            }
        };

        if wait > Duration::ZERO {
            log::debug!("rate limit: waiting {:.1}s for {}", wait.as_secs_f64(), domain);
            sleep(wait).await;
        }

        let mut guard = self.lock();
        let state = Self::entry(&mut guard, domain, &self.config);
        state.last_request_at = Some(Instant::now());
        if state
            .cooldown_until
            .is_some_and(|until| until <= Instant::now())
        {
            state.cooldown_until = None;
        }
    }

    /// Inspect an HTTP response for rate-limit signals and adjust state.
    pub fn check_rate_limit(
        &self,
        domain: &str,
        status: u16,
        headers: &HeaderMap,
    ) -> RateLimitCheck {
        let mut guard = self.lock();
        let state = Self::entry(&mut guard, domain, &self.config);

        match status {
            429 => {
                state.consecutive_failures += 1;
                if let Some(retry_after) = parse_retry_after(headers) {
                    let delay = retry_after.min(self.config.max_delay);
                    state.suggested_delay = clamp(delay, &self.config);
                    state.cooldown_until = Some(Instant::now() + state.suggested_delay);
                    log::warn!(
                        "rate limited by {} (Retry-After {:.0}s)",
                        domain,
                        state.suggested_delay.as_secs_f64()
                    );
                    RateLimitCheck {
                        is_rate_limited: true,
                        retry_after: Some(state.suggested_delay),
                    }
                } else {
                    state.suggested_delay =
                        backoff(state.suggested_delay, &self.config);
                    if state.consecutive_failures >= self.config.failure_threshold {
                        state.cooldown_until =
                            Some(Instant::now() + state.suggested_delay * 2);
                    }
                    log::warn!(
                        "rate limited by {} (no header), backing off to {:.1}s",
                        domain,
                        state.suggested_delay.as_secs_f64()
                    );
                    RateLimitCheck {
                        is_rate_limited: true,
                        retry_after: Some(state.suggested_delay),
                    }
                }
            }
            403 | 503 => {
                // Soft block: back off but do not force a cooldown.
                state.consecutive_failures += 1;
                state.suggested_delay = backoff(state.suggested_delay, &self.config);
                RateLimitCheck {
                    is_rate_limited: true,
                    retry_after: Some(state.suggested_delay),
                }
            }
            200..=299 => {
                state.consecutive_failures = 0;
                state.cooldown_until = None;
                state.suggested_delay = decay(state.suggested_delay, &self.config);
                RateLimitCheck::clear()
            }
            _ => RateLimitCheck::clear(),
        }
    }

    /// Status-agnostic success path: applies the 2xx rules.
    pub fn record_success(&self, domain: &str) {
        self.check_rate_limit(domain, 200, &HeaderMap::new());
    }

    /// Status-agnostic failure path: applies the bare-429 rules.
    pub fn record_failure(&self, domain: &str) {
        self.check_rate_limit(domain, 429, &HeaderMap::new());
    }

    /// Current suggested delay for a domain (initial delay if unseen).
    pub fn suggested_delay(&self, domain: &str) -> Duration {
        let guard = self.lock();
        guard
            .get(domain)
            .map(|state| state.suggested_delay)
            .unwrap_or(self.config.initial_delay)
    }

    pub fn stats(&self) -> Vec<DomainRateSnapshot> {
        let now = Instant::now();
        let guard = self.lock();
        let mut snapshots: Vec<_> = guard
            .iter()
            .map(|(domain, state)| DomainRateSnapshot {
                domain: domain.clone(),
                suggested_delay: state.suggested_delay,
                consecutive_failures: state.consecutive_failures,
                cooldown_remaining: state.cooldown_remaining(now),
            })
            .collect();
        snapshots.sort_by(|a, b| a.domain.cmp(&b.domain));
        snapshots
    }

    /// Drop all learned state. Test/teardown entry point.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DomainRateState>> {
        self.domains.lock().expect("rate limit lock poisoned")
    }

    fn entry<'a>(
        guard: &'a mut HashMap<String, DomainRateState>,
        domain: &str,
        config: &RateLimitConfig,
    ) -> &'a mut DomainRateState {
        guard
            .entry(domain.to_string())
            .or_insert_with(|| DomainRateState::new(config.initial_delay))
    }
}

fn clamp(delay: Duration, config: &RateLimitConfig) -> Duration {
    delay.clamp(config.min_delay, config.max_delay)
}

fn backoff(delay: Duration, config: &RateLimitConfig) -> Duration {
    clamp(delay.mul_f64(config.backoff_factor), config)
}

fn decay(delay: Duration, config: &RateLimitConfig) -> Duration {
    clamp(delay.mul_f64(config.decay_factor), config)
}

/// Parse `Retry-After` as delta-seconds, falling back to an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = raw.parse::<f64>()
        && seconds.is_finite()
        && seconds >= 0.0
    {
        return Some(Duration::from_secs_f64(seconds));
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        && let Ok(duration) = (date.with_timezone(&Utc) - Utc::now()).to_std()
    {
        return Some(duration);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers_with_retry_after(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn retry_after_header_sets_delay_directly() {
        let detector = RateLimitDetector::new(RateLimitConfig::default());
        let check =
            detector.check_rate_limit("flashscore.com", 429, &headers_with_retry_after("120"));
        assert!(check.is_rate_limited);
        // 120s capped to the 60s ceiling.
        assert_eq!(check.retry_after, Some(Duration::from_secs(60)));

        let check =
            detector.check_rate_limit("oddsportal.com", 429, &headers_with_retry_after("45"));
        assert_eq!(check.retry_after, Some(Duration::from_secs(45)));
        assert_eq!(
            detector.suggested_delay("oddsportal.com"),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn bare_429s_compound_and_trigger_cooldown() {
        let detector = RateLimitDetector::new(RateLimitConfig::default());
        let headers = HeaderMap::new();

        detector.check_rate_limit("flashscore.com", 429, &headers);
        detector.check_rate_limit("flashscore.com", 429, &headers);
        detector.check_rate_limit("flashscore.com", 429, &headers);

        // 3s * 1.5^3 = 10.125s
        let delay = detector.suggested_delay("flashscore.com");
        assert!((delay.as_secs_f64() - 10.125).abs() < 0.01);

        let snapshot = &detector.stats()[0];
        assert_eq!(snapshot.consecutive_failures, 3);
        assert!(snapshot.cooldown_remaining.is_some());
    }

    #[test]
    fn soft_blocks_back_off_without_cooldown() {
        let detector = RateLimitDetector::new(RateLimitConfig::default());
        for _ in 0..4 {
            detector.check_rate_limit("flashscore.com", 403, &HeaderMap::new());
        }
        let snapshot = &detector.stats()[0];
        assert!(snapshot.suggested_delay > Duration::from_secs(3));
        assert!(snapshot.cooldown_remaining.is_none());
    }

    #[test]
    fn success_decays_toward_floor() {
        let config = RateLimitConfig::default();
        let detector = RateLimitDetector::new(config);
        detector.record_failure("flashscore.com");
        for _ in 0..50 {
            detector.record_success("flashscore.com");
        }
        assert_eq!(
            detector.suggested_delay("flashscore.com"),
            Duration::from_secs(1)
        );
        assert_eq!(detector.stats()[0].consecutive_failures, 0);
    }

    #[test]
    fn delay_never_exceeds_ceiling() {
        let detector = RateLimitDetector::new(RateLimitConfig::default());
        for _ in 0..20 {
            detector.record_failure("flashscore.com");
        }
        assert_eq!(
            detector.suggested_delay("flashscore.com"),
            Duration::from_secs(60)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_does_not_wait() {
        let detector = RateLimitDetector::new(RateLimitConfig::default());
        // With no prior request the wait resolves immediately even under a
        // paused clock.
        detector.wait_for_rate_limit("flashscore.com").await;
        assert!(detector.stats().is_empty() || detector.stats()[0].cooldown_remaining.is_none());
    }
}
