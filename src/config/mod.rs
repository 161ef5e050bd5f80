//! Unified configuration for the ingestion core.
//!
//! Provides defaults for every subsystem, a fluent builder, and JSON file
//! loading for deployment-specific overrides (proxy credentials, store
//! path, pool sizing).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::modules::pool::PoolConfig;
use crate::modules::proxy::RotatorConfig;
use crate::modules::rate_limit::RateLimitConfig;
use crate::modules::session::SessionPolicy;
use crate::resolver::ResolverConfig;
use crate::validation::odds::OddsCheckConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Complete configuration of the ingestion core.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub pool: PoolConfig,
    pub session: SessionPolicy,
    pub rate_limit: RateLimitConfig,
    pub rotator: RotatorConfig,
    pub odds: OddsCheckConfig,
    pub resolver: ResolverConfig,
    /// Egress endpoints including credentials, straight from deployment
    /// config; never echoed in stats output.
    pub proxies: Vec<Url>,
    /// Embedded store location; `None` keeps everything in memory.
    pub store_path: Option<PathBuf>,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Load overrides from a JSON file on top of the defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let file: CoreConfigFile = serde_json::from_str(raw)?;
        file.into_config()
    }
}

/// Fluent builder over [`CoreConfig`].
#[derive(Debug, Clone, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    pub fn with_max_contexts(mut self, max_contexts: usize) -> Self {
        self.config.pool.max_contexts = max_contexts.max(1);
        self
    }

    pub fn with_session_policy(mut self, policy: SessionPolicy) -> Self {
        self.config.session = policy;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn with_rotator(mut self, rotator: RotatorConfig) -> Self {
        self.config.rotator = rotator;
        self
    }

    pub fn with_odds_checks(mut self, odds: OddsCheckConfig) -> Self {
        self.config.odds = odds;
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.config.resolver = resolver;
        self
    }

    pub fn with_proxies<I>(mut self, proxies: I) -> Self
    where
        I: IntoIterator<Item = Url>,
    {
        self.config.proxies = proxies.into_iter().collect();
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = Some(path.into());
        self
    }

    pub fn build(self) -> CoreConfig {
        self.config
    }
}

/// File-facing shape: flat, optional, duration fields in plain units.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CoreConfigFile {
    max_contexts: Option<usize>,
    max_context_age_secs: Option<u64>,
    max_context_uses: Option<u32>,
    session_max_requests: Option<u32>,
    session_max_challenges: Option<u32>,
    session_max_age_secs: Option<u64>,
    rate_initial_delay_ms: Option<u64>,
    rate_max_delay_ms: Option<u64>,
    proxy_cooldown_secs: Option<u64>,
    probe_url: Option<String>,
    proxies: Vec<String>,
    fuzzy_threshold: Option<f64>,
    store_path: Option<PathBuf>,
}

impl CoreConfigFile {
    fn into_config(self) -> Result<CoreConfig, ConfigError> {
        let mut config = CoreConfig::default();

        if let Some(value) = self.max_contexts {
            config.pool.max_contexts = value.max(1);
        }
        if let Some(value) = self.max_context_age_secs {
            config.pool.max_context_age = Duration::from_secs(value);
        }
        if let Some(value) = self.max_context_uses {
            config.pool.max_context_uses = value.max(1);
        }
        if let Some(value) = self.session_max_requests {
            config.session.max_requests = value;
        }
        if let Some(value) = self.session_max_challenges {
            config.session.max_challenges = value;
        }
        if let Some(value) = self.session_max_age_secs {
            config.session.max_age = Duration::from_secs(value);
        }
        if let Some(value) = self.rate_initial_delay_ms {
            config.rate_limit.initial_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.rate_max_delay_ms {
            config.rate_limit.max_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.proxy_cooldown_secs {
            config.rotator.cooldown = Duration::from_secs(value);
        }
        if let Some(value) = self.probe_url {
            config.rotator.probe_url = value;
        }
        if let Some(value) = self.fuzzy_threshold {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "fuzzy_threshold {value} outside 0..=1"
                )));
            }
            config.resolver.fuzzy_threshold = value;
        }
        config.store_path = self.store_path;

        config.proxies = self
            .proxies
            .iter()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|err| ConfigError::Invalid(format!("proxy `{raw}`: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(config)
    }
}
