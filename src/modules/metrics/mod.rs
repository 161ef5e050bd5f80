//! Ingestion metrics.
//!
//! Aggregates navigation outcomes, blocks, and validator flags per domain
//! with windowed latency percentiles for the monitoring surface.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Aggregated metrics across all domains.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub navigations: u64,
    pub successes: u64,
    pub failures: u64,
    pub blocks: u64,
    pub flags: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            navigations: 0,
            successes: 0,
            failures: 0,
            blocks: 0,
            flags: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Domain-scoped metrics snapshot.
#[derive(Debug, Clone)]
pub struct DomainStats {
    pub domain: String,
    pub navigations: u64,
    pub successes: u64,
    pub failures: u64,
    pub blocks: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
}

impl DomainStats {
    fn from_accumulator(domain: &str, acc: &DomainAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            domain: domain.to_string(),
            navigations: acc.navigations,
            successes: acc.successes,
            failures: acc.failures,
            blocks: acc.blocks,
            average_latency: avg,
            p95_latency: p95,
            consecutive_failures: acc.consecutive_failures,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub domains: Vec<DomainStats>,
}

#[derive(Debug)]
struct DomainAccumulator {
    navigations: u64,
    successes: u64,
    failures: u64,
    blocks: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
}

impl DomainAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            navigations: 0,
            successes: 0,
            failures: 0,
            blocks: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
        }
    }

    fn record(&mut self, success: bool, latency: Duration) {
        self.navigations += 1;

        if success {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        let p95 = samples[p95_index];
        (Some(Duration::from_secs_f64(avg)), Some(p95))
    }
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    domains: HashMap<String, DomainAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            domains: HashMap::new(),
        }
    }

    fn accumulator_mut(&mut self, domain: &str) -> &mut DomainAccumulator {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccumulator::new(self.max_window))
    }
}

/// Thread-safe metrics collector shared by the orchestration layer.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(128))),
        }
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_navigation(&self, domain: &str, success: bool, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.navigations += 1;
        if success {
            guard.global.successes += 1;
        } else {
            guard.global.failures += 1;
        }

        if let Some(avg) = guard.global.average_latency {
            let blended = (avg.as_secs_f64() * 0.9) + (latency.as_secs_f64() * 0.1);
            guard.global.average_latency = Some(Duration::from_secs_f64(blended));
        } else {
            guard.global.average_latency = Some(latency);
        }

        let acc = guard.accumulator_mut(domain);
        acc.record(success, latency);

        // Global p95 over every domain window.
        let mut samples: Vec<_> = guard
            .domains
            .values()
            .flat_map(|domain| domain.latencies.iter())
            .cloned()
            .collect();
        samples.sort_unstable();
        if !samples.is_empty() {
            let idx = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
            guard.global.p95_latency = Some(samples[idx]);
        }
    }

    pub fn record_block(&self, domain: &str) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.blocks += 1;
        guard.accumulator_mut(domain).blocks += 1;
    }

    pub fn record_flag(&self) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.flags += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let mut domains: Vec<_> = guard
            .domains
            .iter()
            .map(|(domain, acc)| DomainStats::from_accumulator(domain, acc))
            .collect();
        domains.sort_by(|a, b| a.domain.cmp(&b.domain));
        MetricsSnapshot {
            global: guard.global.clone(),
            domains,
        }
    }

    pub fn reset(&self) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        let window = guard.max_window;
        *guard = MetricsState::new(window);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_outcomes_and_blocks() {
        let metrics = MetricsCollector::new();
        metrics.record_navigation("flashscore.com", true, Duration::from_millis(150));
        metrics.record_navigation("flashscore.com", false, Duration::from_millis(800));
        metrics.record_block("flashscore.com");

        let snapshot = metrics.snapshot();
        let domain = snapshot
            .domains
            .iter()
            .find(|d| d.domain == "flashscore.com")
            .unwrap();
        assert_eq!(domain.navigations, 2);
        assert_eq!(domain.successes, 1);
        assert_eq!(domain.failures, 1);
        assert_eq!(domain.blocks, 1);
        assert_eq!(domain.consecutive_failures, 1);
        assert_eq!(snapshot.global.blocks, 1);
    }

    #[test]
    fn reset_clears_state() {
        let metrics = MetricsCollector::new();
        metrics.record_navigation("flashscore.com", true, Duration::from_millis(100));
        metrics.reset();
        let snapshot = metrics.snapshot();
        assert!(snapshot.domains.is_empty());
        assert_eq!(snapshot.global.navigations, 0);
    }
}
