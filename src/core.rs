//! High level ingestion orchestration.
//!
//! Wires together the browser pool, session manager, proxy rotator, rate
//! limiter, validators, and team resolver into one context object that
//! ingestion jobs hold for the process lifetime. Every public operation of
//! the core lives here; jobs never touch the subsystems directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use http::HeaderMap;
use thiserror::Error;
use url::Url;

use crate::browser::{BrowserEngine, EngineError};
use crate::challenges::{ChallengeKind, CloudflareHandler, detect_challenge};
use crate::config::CoreConfig;
use crate::modules::events::{
	BlockEvent, CoreEvent, EventDispatcher, EventHandler, LoggingHandler, MetricsHandler,
	NavigationEvent, OddsFlaggedEvent, ScoreRejectedEvent,
};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::modules::pool::{BrowserPool, PageLease, PoolStats};
use crate::modules::proxy::{ProxyProfile, ProxyRotator, ProxyStatsEntry};
use crate::modules::rate_limit::{DomainRateSnapshot, RateLimitCheck, RateLimitDetector};
use crate::modules::session::{SessionManager, SessionManagerStats};
use crate::resolver::{ResolverStats, TeamResolver};
use crate::storage::{
	EventDataStore, EventFlag, MemoryStore, OddsRecord, RedbStore, ScoreRecord, StoreError,
	TeamId, TeamStore,
};
use crate::validation::odds::{OddsAnomalyDetector, OddsUpdate, Severity};
use crate::validation::score::{ScoreValidator, count_transitions};

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failures surfaced to ingestion jobs.
///
/// Validators never appear here: they return structured results. Storage
/// failures do, because the audit trail is money-safety critical.
#[derive(Debug, Error)]
pub enum CoreError {
	#[error("engine failure: {0}")]
	Engine(#[from] EngineError),
	#[error("blocked by {challenge} on {domain}")]
	BlockDetected {
		domain: String,
		challenge: &'static str,
	},
	#[error("storage failure: {0}")]
	Store(#[from] StoreError),
	#[error("invalid configuration: {0}")]
	Config(String),
}

/// Successful navigation outcome handed to the parsing layer.
#[derive(Debug, Clone)]
pub struct FetchedPage {
	pub url: Url,
	pub body: String,
}

/// Result of odds validation and processing.
#[derive(Debug, Clone)]
pub struct OddsOutcome {
	pub valid: bool,
	pub flagged: bool,
	pub severity: Option<Severity>,
	pub reasons: Vec<String>,
}

/// Result of score validation and processing.
#[derive(Debug, Clone)]
pub struct ScoreOutcome {
	pub valid: bool,
	pub flagged: bool,
	pub reasons: Vec<String>,
}

/// Combined observability snapshot across every subsystem.
#[derive(Debug, Clone)]
pub struct CoreStats {
	pub pool: PoolStats,
	pub rotator: Vec<ProxyStatsEntry>,
	pub rate_limits: Vec<DomainRateSnapshot>,
	pub sessions: SessionManagerStats,
	pub resolver: ResolverStats,
	pub metrics: MetricsSnapshot,
}

/// Fluent builder for [`IngestCore`].
pub struct IngestCoreBuilder {
	config: CoreConfig,
	engine: Option<Arc<dyn BrowserEngine>>,
	team_store: Option<Arc<dyn TeamStore>>,
	event_store: Option<Arc<dyn EventDataStore>>,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl IngestCoreBuilder {
	pub fn new() -> Self {
		Self {
			config: CoreConfig::default(),
			engine: None,
			team_store: None,
			event_store: None,
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: CoreConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_engine(mut self, engine: Arc<dyn BrowserEngine>) -> Self {
		self.engine = Some(engine);
		self
	}

	pub fn with_team_store(mut self, store: Arc<dyn TeamStore>) -> Self {
		self.team_store = Some(store);
		self
	}

	pub fn with_event_store(mut self, store: Arc<dyn EventDataStore>) -> Self {
		self.event_store = Some(store);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn build(self) -> CoreResult<IngestCore> {
		let engine = self
			.engine
			.ok_or_else(|| CoreError::Config("browser engine is required".into()))?;

		// Stores default to the embedded database when a path is
		// configured, otherwise stay in memory.
		let (team_store, event_store): (Arc<dyn TeamStore>, Arc<dyn EventDataStore>) =
			match (self.team_store, self.event_store) {
				(Some(team), Some(event)) => (team, event),
				(team, event) => {
					let fallback: (Arc<dyn TeamStore>, Arc<dyn EventDataStore>) =
						match self.config.store_path {
							Some(ref path) => {
								let store = Arc::new(RedbStore::open(path)?);
								(store.clone(), store)
							}
							None => {
								let store = Arc::new(MemoryStore::new());
								(store.clone(), store)
							}
						};
					(team.unwrap_or(fallback.0), event.unwrap_or(fallback.1))
				}
			};

		let metrics = MetricsCollector::new();
		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		events.register_handler(Arc::new(MetricsHandler::new(metrics.clone())));
		for handler in self.handlers {
			events.register_handler(handler);
		}

		let sessions = Arc::new(SessionManager::new(self.config.session.clone()));
		let pool = BrowserPool::new(engine, sessions.clone(), self.config.pool.clone());
		let rotator = ProxyRotator::new(self.config.rotator.clone());
		rotator.load(self.config.proxies.iter().cloned());

		Ok(IngestCore {
			rate_limiter: RateLimitDetector::new(self.config.rate_limit.clone()),
			odds_detector: OddsAnomalyDetector::new(self.config.odds.clone()),
			resolver: TeamResolver::new(team_store, self.config.resolver.clone()),
			cloudflare: CloudflareHandler::default(),
			score_validator: ScoreValidator,
			config: self.config,
			pool,
			sessions,
			rotator,
			event_store,
			events,
			metrics,
		})
	}
}

impl Default for IngestCoreBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Process-wide ingestion context. Construct once, pass by reference into
/// jobs; `reset` exists for test teardown.
pub struct IngestCore {
	config: CoreConfig,
	pool: BrowserPool,
	sessions: Arc<SessionManager>,
	rate_limiter: RateLimitDetector,
	rotator: ProxyRotator,
	cloudflare: CloudflareHandler,
	odds_detector: OddsAnomalyDetector,
	score_validator: ScoreValidator,
	resolver: TeamResolver<dyn TeamStore>,
	event_store: Arc<dyn EventDataStore>,
	events: EventDispatcher,
	metrics: MetricsCollector,
}

impl IngestCore {
	pub fn builder() -> IngestCoreBuilder {
		IngestCoreBuilder::new()
	}

	/// Check out a browser context routed through the next egress proxy.
	pub async fn acquire_page(&self) -> CoreResult<PageLease> {
		let proxy = self.rotator.select_proxy();
		let lease = self
			.pool
			.acquire_with_proxy(proxy.as_ref().map(|p| &p.endpoint))
			.await?;
		Ok(lease)
	}

	/// Navigate a leased page with the full resilience flow: rate-limit
	/// pacing, outcome accounting, challenge detection, and the bounded
	/// Cloudflare clearance wait.
	pub async fn navigate(&self, lease: &mut PageLease, url: &Url) -> CoreResult<FetchedPage> {
		let domain = url.host_str().unwrap_or_default().to_string();
		let session_id = lease.session_id().to_string();

		self.rate_limiter.wait_for_rate_limit(&domain).await;
		self.sessions.record_request(&session_id);

		let started = Instant::now();
		let navigated = lease.page().navigate(url).await;
		let latency = started.elapsed();

		if let Err(err) = navigated {
			self.record_navigation_failure(lease, &domain, &session_id, latency);
			return Err(err.into());
		}

		let body = match lease.page().content().await {
			Ok(body) => body,
			Err(err) => {
				self.record_navigation_failure(lease, &domain, &session_id, latency);
				return Err(err.into());
			}
		};
		let final_url = lease
			.page()
			.current_url()
			.await
			.unwrap_or_else(|_| url.clone());

		if let Some(signal) = detect_challenge(&final_url, &body) {
			self.sessions.record_challenge(&session_id);
			self.rate_limiter.record_failure(&domain);
			if let Some(proxy) = lease.proxy() {
				self.rotator.record_failure(proxy);
			}

			let cleared = if signal.kind == ChallengeKind::Cloudflare {
				self.cloudflare
					.wait_for_clearance(lease.page())
					.await
					.unwrap_or(false)
			} else {
				false
			};

			self.events.dispatch(CoreEvent::Block(BlockEvent {
				domain: domain.clone(),
				session_id: session_id.clone(),
				challenge_type: signal.kind.as_str().to_string(),
				cleared,
				timestamp: Utc::now(),
			}));

			if !cleared {
				return Err(CoreError::BlockDetected {
					domain,
					challenge: signal.kind.as_str(),
				});
			}

			// Challenge resolved by the browser; re-read the settled page.
			let body = lease.page().content().await?;
			let final_url = lease
				.page()
				.current_url()
				.await
				.unwrap_or_else(|_| url.clone());
			self.record_navigation_success(lease, &domain, &session_id, started.elapsed());
			return Ok(FetchedPage {
				url: final_url,
				body,
			});
		}

		self.record_navigation_success(lease, &domain, &session_id, latency);
		Ok(FetchedPage {
			url: final_url,
			body,
		})
	}

	fn record_navigation_success(
		&self,
		lease: &PageLease,
		domain: &str,
		session_id: &str,
		latency: Duration,
	) {
		self.sessions.record_success(session_id);
		self.rate_limiter.record_success(domain);
		if let Some(proxy) = lease.proxy() {
			self.rotator.record_success(proxy);
		}
		self.events.dispatch(CoreEvent::Navigation(NavigationEvent {
			domain: domain.to_string(),
			success: true,
			latency,
			timestamp: Utc::now(),
		}));
	}

	fn record_navigation_failure(
		&self,
		lease: &PageLease,
		domain: &str,
		session_id: &str,
		latency: Duration,
	) {
		self.sessions.record_failure(session_id);
		self.rate_limiter.record_failure(domain);
		if let Some(proxy) = lease.proxy() {
			self.rotator.record_failure(proxy);
		}
		self.events.dispatch(CoreEvent::Navigation(NavigationEvent {
			domain: domain.to_string(),
			success: false,
			latency,
			timestamp: Utc::now(),
		}));
	}

	/// Pace the next request against `domain`.
	pub async fn wait_for_rate_limit(&self, domain: &str) {
		self.rate_limiter.wait_for_rate_limit(domain).await;
	}

	/// Feed raw HTTP metadata into the rate limiter.
	pub fn check_rate_limit(
		&self,
		domain: &str,
		status: u16,
		headers: &HeaderMap,
	) -> RateLimitCheck {
		self.rate_limiter.check_rate_limit(domain, status, headers)
	}

	pub fn select_proxy(&self) -> Option<ProxyProfile> {
		self.rotator.select_proxy()
	}

	pub fn record_proxy_success(&self, endpoint: &Url) {
		self.rotator.record_success(endpoint);
	}

	pub fn record_proxy_failure(&self, endpoint: &Url) {
		self.rotator.record_failure(endpoint);
	}

	/// Probe a proxy through the configured health URL and feed the outcome
	/// back into its counters.
	pub async fn probe_proxy(&self, profile: &ProxyProfile) -> bool {
		self.rotator.probe(profile).await
	}

	/// Validate an odds update against the previous snapshot and persist
	/// per policy: critical anomalies are rejected outright, everything
	/// else is applied; any anomaly flags the event for review.
	pub fn validate_and_process_odds(
		&self,
		event_id: &str,
		update: &OddsUpdate,
	) -> CoreResult<OddsOutcome> {
		let previous = self.event_store.latest_odds(event_id)?;
		let result = self.odds_detector.evaluate(update, previous.as_ref());

		let mut flagged = false;
		if result.is_anomalous {
			let severity = result.severity.unwrap_or(Severity::Low);
			// Flag write failure must propagate: the audit trail is the
			// guarantee that held predictions stay held.
			self.event_store.flag_event(&EventFlag {
				event_id: event_id.to_string(),
				severity: severity.as_str().to_string(),
				reason: format!("odds: {}", result.reasons.join("; ")),
				flagged_at: Utc::now(),
			})?;
			flagged = true;
			self.events.dispatch(CoreEvent::OddsFlagged(OddsFlaggedEvent {
				event_id: event_id.to_string(),
				severity: severity.as_str().to_string(),
				applied: !result.is_critical(),
				reasons: result.reasons.clone(),
				timestamp: Utc::now(),
			}));
		}

		if result.is_critical() {
			return Ok(OddsOutcome {
				valid: false,
				flagged,
				severity: result.severity,
				reasons: result.reasons,
			});
		}

		// Append-only history, bounded to meaningful moves. The newest row
		// becomes the previous snapshot of the next evaluation.
		if self.odds_detector.should_record(update, previous.as_ref()) {
			self.event_store.append_odds(&OddsRecord {
				event_id: event_id.to_string(),
				home: update.home,
				draw: update.draw,
				away: update.away,
				source: update.source.clone(),
				recorded_at: Utc::now(),
			})?;
		}

		Ok(OddsOutcome {
			valid: true,
			flagged,
			severity: result.severity,
			reasons: result.reasons,
		})
	}

	/// Validate a score update against sport limits and persist it to the
	/// audit history whether or not it passes.
	#[allow(clippy::too_many_arguments)]
	pub fn validate_and_process_score(
		&self,
		event_id: &str,
		sport: &str,
		home_score: Option<i32>,
		away_score: Option<i32>,
		period: Option<&str>,
		minute: Option<i32>,
		source: &str,
	) -> CoreResult<ScoreOutcome> {
		// Previous = newest valid row with both sides present; rejected rows
		// stay in history but must not poison future comparisons.
		let history = self.event_store.score_history(event_id, 10)?;
		let previous = history
			.iter()
			.filter(|record| record.valid)
			.find_map(|record| match (record.home, record.away) {
				(Some(home), Some(away)) => Some((home, away)),
				_ => None,
			});

		let validation = self
			.score_validator
			.validate(sport, home_score, away_score, previous);

		self.event_store.append_score(&ScoreRecord {
			event_id: event_id.to_string(),
			home: home_score,
			away: away_score,
			period: period.map(str::to_string),
			minute,
			source: source.to_string(),
			valid: validation.valid,
			scraped_at: Utc::now(),
		})?;

		if !validation.valid {
			self.event_store.flag_event(&EventFlag {
				event_id: event_id.to_string(),
				severity: Severity::High.as_str().to_string(),
				reason: format!("score: {}", validation.reasons.join("; ")),
				flagged_at: Utc::now(),
			})?;
			self.events.dispatch(CoreEvent::ScoreRejected(ScoreRejectedEvent {
				event_id: event_id.to_string(),
				sport: sport.to_string(),
				reasons: validation.reasons.clone(),
				timestamp: Utc::now(),
			}));
			return Ok(ScoreOutcome {
				valid: false,
				flagged: true,
				reasons: validation.reasons,
			});
		}

		Ok(ScoreOutcome {
			valid: true,
			flagged: false,
			reasons: validation.reasons,
		})
	}

	/// Zero score transitions inside the window: the stability gate held
	/// payouts wait on.
	pub fn is_score_stable(&self, event_id: &str, window: Duration) -> CoreResult<bool> {
		let history = self.event_store.score_history(event_id, 50)?;
		Ok(count_transitions(&history, window, Utc::now()) == 0)
	}

	pub fn find_or_create_team(&self, name: &str, source: &str) -> CoreResult<TeamId> {
		Ok(self.resolver.find_or_create_team(name, source)?)
	}

	pub fn bulk_find_or_create_teams(
		&self,
		names: &[&str],
		source: &str,
	) -> CoreResult<std::collections::HashMap<String, TeamId>> {
		Ok(self.resolver.bulk_find_or_create_teams(names, source)?)
	}

	pub fn merge_teams(&self, target: TeamId, source_team: TeamId) -> CoreResult<usize> {
		Ok(self.resolver.merge_teams(target, source_team)?)
	}

	/// Sweep sessions older than the configured age.
	pub fn cleanup_sessions(&self) -> usize {
		self.sessions.cleanup()
	}

	/// Snapshot every subsystem for the monitoring surface.
	pub fn stats(&self) -> CoreStats {
		CoreStats {
			pool: self.pool.stats(),
			rotator: self.rotator.stats(),
			rate_limits: self.rate_limiter.stats(),
			sessions: self.sessions.stats(),
			resolver: self.resolver.stats(),
			metrics: self.metrics.snapshot(),
		}
	}

	/// Drop all learned state and idle contexts. Test teardown entry point;
	/// configured proxies are re-registered.
	pub fn reset(&self) {
		self.pool.reset();
		self.sessions.reset();
		self.rate_limiter.reset();
		self.resolver.reset();
		self.metrics.reset();
		self.rotator.reset();
		self.rotator.load(self.config.proxies.iter().cloned());
	}
}
