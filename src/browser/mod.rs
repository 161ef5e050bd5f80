//! Seam to the headless-browser automation engine.
//!
//! The engine itself (context/page creation, navigation, cookie access,
//! script injection) is an external collaborator; the pool only needs this
//! narrow interface. Implementations wrap whatever automation stack the
//! binary links in.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub mod stealth;

pub use stealth::StealthProfile;

/// Failure surfaced by an engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("browser context already closed")]
    Closed,
    #[error("engine failure: {0}")]
    Other(String),
}

/// Creates isolated browser execution contexts.
///
/// `init_script` is installed before any page script runs; `proxy` routes
/// the context's traffic when set.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn create_context(
        &self,
        init_script: &str,
        proxy: Option<&Url>,
    ) -> Result<Box<dyn PageHandle>, EngineError>;
}

/// One page inside a context, owned exclusively by the holder.
#[async_trait]
pub trait PageHandle: Send {
    async fn navigate(&mut self, url: &Url) -> Result<(), EngineError>;
    async fn current_url(&self) -> Result<Url, EngineError>;
    /// Full page HTML after the last navigation.
    async fn content(&self) -> Result<String, EngineError>;
    /// Value of a named cookie in the context's jar, if present.
    async fn cookie(&self, name: &str) -> Result<Option<String>, EngineError>;
    async fn close(&mut self) -> Result<(), EngineError>;
}
