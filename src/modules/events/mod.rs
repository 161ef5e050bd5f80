//! Event hooks around ingestion activity.
//!
//! Jobs and subsystems publish structured events; handlers fan them out to
//! logging, metrics, or custom reactions registered by the embedding
//! process.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::metrics::MetricsCollector;

/// Outcome of one navigation through the pool.
#[derive(Debug, Clone)]
pub struct NavigationEvent {
    pub domain: String,
    pub success: bool,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// A challenge/block signature fired during navigation.
#[derive(Debug, Clone)]
pub struct BlockEvent {
    pub domain: String,
    pub session_id: String,
    pub challenge_type: String,
    pub cleared: bool,
    pub timestamp: DateTime<Utc>,
}

/// An odds update was flagged (and possibly rejected).
#[derive(Debug, Clone)]
pub struct OddsFlaggedEvent {
    pub event_id: String,
    pub severity: String,
    pub applied: bool,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// A score update failed validation.
#[derive(Debug, Clone)]
pub struct ScoreRejectedEvent {
    pub event_id: String,
    pub sport: String,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum CoreEvent {
    Navigation(NavigationEvent),
    Block(BlockEvent),
    OddsFlagged(OddsFlaggedEvent),
    ScoreRejected(ScoreRejectedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &CoreEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: CoreEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &CoreEvent) {
        match event {
            CoreEvent::Navigation(nav) => {
                log::debug!(
                    "nav {} success={} ({:.2}s)",
                    nav.domain,
                    nav.success,
                    nav.latency.as_secs_f64()
                );
            }
            CoreEvent::Block(block) => {
                log::info!(
                    "block {} type={} session={} cleared={}",
                    block.domain,
                    block.challenge_type,
                    block.session_id,
                    block.cleared
                );
            }
            CoreEvent::OddsFlagged(odds) => {
                log::warn!(
                    "odds flagged {} severity={} applied={}: {}",
                    odds.event_id,
                    odds.severity,
                    odds.applied,
                    odds.reasons.join("; ")
                );
            }
            CoreEvent::ScoreRejected(score) => {
                log::warn!(
                    "score rejected {} ({}): {}",
                    score.event_id,
                    score.sport,
                    score.reasons.join("; ")
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &CoreEvent) {
        match event {
            CoreEvent::Navigation(nav) => {
                self.metrics
                    .record_navigation(&nav.domain, nav.success, nav.latency);
            }
            CoreEvent::Block(block) => {
                self.metrics.record_block(&block.domain);
            }
            CoreEvent::OddsFlagged(_) | CoreEvent::ScoreRejected(_) => {
                self.metrics.record_flag();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &CoreEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.dispatch(CoreEvent::Block(BlockEvent {
            domain: "flashscore.com".into(),
            session_id: "sess-0".into(),
            challenge_type: "cloudflare_challenge".into(),
            cleared: false,
            timestamp: Utc::now(),
        }));
        assert_eq!(*counter.0.lock().unwrap(), 1);
    }
}
