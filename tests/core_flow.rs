//! End-to-end flows through the ingestion core against a scripted browser
//! engine and the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use matchwire::{
    BrowserEngine, CoreConfig, CoreError, EngineError, IngestCore, OddsUpdate, PageHandle,
    PoolConfig,
};

const FIXTURE_PAGE: &str = r#"<html><head><title>Premier League fixtures</title></head>
<body><table><tr><td>Arsenal</td><td>2 - 1</td><td>Chelsea</td></tr></table></body></html>"#;

const DENIED_PAGE: &str =
    "<html><head><title>Access denied | flashscore.com</title></head></html>";

/// Engine serving canned bodies per host, tracking navigation counts.
struct ScriptedEngine {
    bodies: HashMap<String, String>,
    navigations: Arc<AtomicU32>,
}

impl ScriptedEngine {
    fn new(bodies: HashMap<String, String>) -> Self {
        Self {
            bodies,
            navigations: Arc::new(AtomicU32::new(0)),
        }
    }
}

struct ScriptedPage {
    bodies: HashMap<String, String>,
    navigations: Arc<AtomicU32>,
    current: Option<Url>,
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn navigate(&mut self, url: &Url) -> Result<(), EngineError> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        if url.host_str() == Some("down.example") {
            return Err(EngineError::Navigation("connection refused".into()));
        }
        self.current = Some(url.clone());
        Ok(())
    }

    async fn current_url(&self) -> Result<Url, EngineError> {
        self.current.clone().ok_or(EngineError::Closed)
    }

    async fn content(&self) -> Result<String, EngineError> {
        let host = self
            .current
            .as_ref()
            .and_then(|url| url.host_str())
            .unwrap_or_default();
        Ok(self
            .bodies
            .get(host)
            .cloned()
            .unwrap_or_else(|| FIXTURE_PAGE.to_string()))
    }

    async fn cookie(&self, _name: &str) -> Result<Option<String>, EngineError> {
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.current = None;
        Ok(())
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    async fn create_context(
        &self,
        init_script: &str,
        _proxy: Option<&Url>,
    ) -> Result<Box<dyn PageHandle>, EngineError> {
        assert!(init_script.contains("webdriver"), "stealth script missing");
        Ok(Box::new(ScriptedPage {
            bodies: self.bodies.clone(),
            navigations: self.navigations.clone(),
            current: None,
        }))
    }
}

fn core_with(bodies: HashMap<String, String>) -> IngestCore {
    let config = CoreConfig::builder()
        .with_pool(PoolConfig {
            max_contexts: 2,
            ..Default::default()
        })
        .build();
    IngestCore::builder()
        .with_config(config)
        .with_engine(Arc::new(ScriptedEngine::new(bodies)))
        .build()
        .expect("core builds")
}

fn plain_core() -> IngestCore {
    core_with(HashMap::new())
}

#[tokio::test(start_paused = true)]
async fn navigate_returns_page_and_records_success() {
    let core = plain_core();
    let mut lease = core.acquire_page().await.unwrap();
    let url = Url::parse("https://flashscore.com/football").unwrap();

    let page = core.navigate(&mut lease, &url).await.unwrap();
    assert!(page.body.contains("Premier League fixtures"));
    drop(lease);

    let stats = core.stats();
    assert_eq!(stats.pool.created_total, 1);
    assert_eq!(stats.metrics.global.navigations, 1);
    assert_eq!(stats.metrics.global.successes, 1);
    assert_eq!(stats.sessions.total_requests, 1);
    assert_eq!(stats.rate_limits.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn block_page_surfaces_block_error_and_counters() {
    let bodies = HashMap::from([("flashscore.com".to_string(), DENIED_PAGE.to_string())]);
    let core = core_with(bodies);
    let mut lease = core.acquire_page().await.unwrap();
    let url = Url::parse("https://flashscore.com/football").unwrap();

    let err = core.navigate(&mut lease, &url).await.unwrap_err();
    match err {
        CoreError::BlockDetected { challenge, .. } => {
            assert_eq!(challenge, "access_denied");
        }
        other => panic!("expected block, got {other:?}"),
    }
    drop(lease);

    let stats = core.stats();
    assert_eq!(stats.metrics.global.blocks, 1);
    assert_eq!(stats.sessions.total_challenges, 1);
    // The 403-style block backed off the domain delay from its 3s start.
    let domain = &stats.rate_limits[0];
    assert!(domain.suggested_delay > Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn cloudflare_block_without_clearance_rotates_session() {
    let body = r#"<html><head><title>Just a moment...</title></head>
        <body><div class="cf-browser-verification"></div></body></html>"#;
    let bodies = HashMap::from([("flashscore.com".to_string(), body.to_string())]);
    let core = core_with(bodies);
    let mut lease = core.acquire_page().await.unwrap();
    let url = Url::parse("https://flashscore.com/football").unwrap();

    let err = core.navigate(&mut lease, &url).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::BlockDetected {
            challenge: "cloudflare_challenge",
            ..
        }
    ));
    drop(lease);

    let stats = core.stats();
    assert_eq!(stats.sessions.total_challenges, 1);
    assert_eq!(stats.metrics.global.blocks, 1);
}

#[tokio::test(start_paused = true)]
async fn navigation_failure_is_recorded_before_propagating() {
    let core = plain_core();
    let mut lease = core.acquire_page().await.unwrap();
    let url = Url::parse("https://down.example/feed").unwrap();

    let err = core.navigate(&mut lease, &url).await.unwrap_err();
    assert!(matches!(err, CoreError::Engine(_)));
    drop(lease);

    let stats = core.stats();
    assert_eq!(stats.metrics.global.failures, 1);
    let domain = stats
        .rate_limits
        .iter()
        .find(|d| d.domain == "down.example")
        .unwrap();
    assert_eq!(domain.consecutive_failures, 1);
}

#[tokio::test]
async fn odds_flow_rejects_critical_and_flags_reviewable() {
    let core = plain_core();

    let sane = OddsUpdate {
        home: 2.1,
        draw: Some(3.4),
        away: 3.6,
        source: "oddschecker".into(),
    };
    let outcome = core.validate_and_process_odds("ev-1", &sane).unwrap();
    assert!(outcome.valid);
    assert!(!outcome.flagged);

    // Arbitrage-shaped garbage: implied sum 0.375.
    let corrupt = OddsUpdate {
        home: 8.0,
        draw: Some(8.0),
        away: 8.0,
        source: "oddschecker".into(),
    };
    let outcome = core.validate_and_process_odds("ev-1", &corrupt).unwrap();
    assert!(!outcome.valid);
    assert!(outcome.flagged);

    // The rejected row must not have become the comparison baseline: a
    // normal follow-up against the sane snapshot passes clean.
    let follow_up = OddsUpdate {
        home: 2.2,
        draw: Some(3.3),
        away: 3.5,
        source: "oddschecker".into(),
    };
    let outcome = core.validate_and_process_odds("ev-1", &follow_up).unwrap();
    assert!(outcome.valid);
    assert!(!outcome.flagged);
}

#[tokio::test]
async fn score_flow_rejects_decrease_and_tracks_stability() {
    let core = plain_core();

    let outcome = core
        .validate_and_process_score("ev-9", "football", Some(1), Some(1), None, Some(60), "flashscore")
        .unwrap();
    assert!(outcome.valid);

    // Rollback: invalid for football, but still written to the audit trail.
    let outcome = core
        .validate_and_process_score("ev-9", "football", Some(0), Some(1), None, Some(61), "flashscore")
        .unwrap();
    assert!(!outcome.valid);
    assert!(outcome.flagged);

    // The invalid row counts as a transition in history, so the event is
    // not yet stable...
    assert!(!core.is_score_stable("ev-9", Duration::from_secs(600)).unwrap());

    // ...but a decrease in tennis is a legitimate set reset.
    let outcome = core
        .validate_and_process_score("ev-10", "tennis", Some(0), Some(0), Some("set 2"), None, "flashscore")
        .unwrap();
    assert!(outcome.valid);
    assert!(core.is_score_stable("ev-10", Duration::from_secs(600)).unwrap());
}

#[tokio::test]
async fn team_resolution_is_stable_across_sources() {
    let core = plain_core();
    let a = core.find_or_create_team("Arsenal FC", "flashscore").unwrap();
    let b = core.find_or_create_team("Arsenal", "oddschecker").unwrap();
    assert_eq!(a, b);

    let map = core
        .bulk_find_or_create_teams(&["Arsenal", "Chelsea"], "sofascore")
        .unwrap();
    assert_eq!(map["Arsenal"], a);
    assert_ne!(map["Chelsea"], a);
}

#[tokio::test(start_paused = true)]
async fn reset_clears_learned_state() {
    let core = plain_core();
    let mut lease = core.acquire_page().await.unwrap();
    let url = Url::parse("https://flashscore.com/football").unwrap();
    core.navigate(&mut lease, &url).await.unwrap();
    drop(lease);

    core.reset();
    let stats = core.stats();
    assert!(stats.rate_limits.is_empty());
    assert_eq!(stats.sessions.active_sessions, 0);
    assert_eq!(stats.metrics.global.navigations, 0);
    assert_eq!(stats.pool.idle, 0);
}
