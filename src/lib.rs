//! # matchwire
//!
//! Scrape-resilience and data-integrity core for sports fixture, odds, and
//! live-score ingestion from hostile, anti-bot-protected sources.
//!
//! The crate keeps ingestion *undetected* (bounded browser-context pool with
//! stealth fingerprints, identity rotation, subnet-diverse proxy selection,
//! per-domain adaptive backoff) and *trustworthy* (odds anomaly detection,
//! score validation against physical limits, team-name entity resolution)
//! before any scraped value may influence money-bearing predictions.
//!
//! ## Example
//!
//! ```rust,ignore
//! use matchwire::{CoreConfig, IngestCore, OddsUpdate};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let core = IngestCore::builder()
//!         .with_config(CoreConfig::from_json_file("matchwire.json")?)
//!         .with_engine(my_browser_engine())
//!         .build()?;
//!
//!     let mut lease = core.acquire_page().await?;
//!     let page = core
//!         .navigate(&mut lease, &Url::parse("https://example-scores.com/live")?)
//!         .await?;
//!     // ... parse fixtures, then:
//!     let team = core.find_or_create_team("Arsenal FC", "example-scores")?;
//!     let outcome = core.validate_and_process_odds(
//!         "ev-123",
//!         &OddsUpdate { home: 2.1, draw: Some(3.4), away: 3.6, source: "example-scores".into() },
//!     )?;
//!     assert!(outcome.valid);
//!     Ok(())
//! }
//! ```

mod core;

pub mod browser;
pub mod challenges;
pub mod config;
pub mod modules;
pub mod resolver;
pub mod storage;
pub mod validation;

pub use crate::core::{
    CoreError,
    CoreResult,
    CoreStats,
    FetchedPage,
    IngestCore,
    IngestCoreBuilder,
    OddsOutcome,
    ScoreOutcome,
};

pub use crate::browser::{
    BrowserEngine,
    EngineError,
    PageHandle,
    StealthProfile,
};

pub use crate::challenges::{
    ChallengeKind,
    ChallengeSignal,
    CloudflareHandler,
    detect_challenge,
};

pub use crate::config::{ConfigError, CoreConfig, CoreConfigBuilder};

pub use crate::modules::{
    BrowserPool,
    CoreEvent,
    DomainRateSnapshot,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    PageLease,
    PoolConfig,
    PoolStats,
    ProxyProfile,
    ProxyRotator,
    ProxyStatsEntry,
    RateLimitCheck,
    RateLimitConfig,
    RateLimitDetector,
    RotatorConfig,
    SessionManager,
    SessionManagerStats,
    SessionMetadata,
    SessionPolicy,
};

pub use crate::resolver::{
    ResolverConfig,
    ResolverStats,
    TeamResolver,
    name_similarity,
    normalize,
};

pub use crate::storage::{
    EventDataStore,
    EventFlag,
    MemoryStore,
    OddsRecord,
    RedbStore,
    ScoreRecord,
    StoreError,
    StoreResult,
    TeamAlias,
    TeamEntity,
    TeamId,
    TeamStore,
};

pub use crate::validation::{
    AnomalyResult,
    OddsAnomalyDetector,
    OddsCheckConfig,
    OddsUpdate,
    ScoreValidation,
    ScoreValidator,
    Severity,
    SportLimits,
    limits_for,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
