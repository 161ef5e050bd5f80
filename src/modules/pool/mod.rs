//! Bounded pool of automated-browser execution contexts.
//!
//! A semaphore bounds how many contexts exist at once; callers past the
//! bound queue cooperatively. Idle contexts are reused when their egress
//! proxy matches, and retired once age, use count, or the session rotation
//! policy say so. Retirement closes the engine context in the background.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::browser::{BrowserEngine, EngineError, PageHandle, StealthProfile};
use crate::modules::session::SessionManager;

/// Pool sizing and recycling thresholds.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_contexts: usize,
    pub max_context_age: Duration,
    pub max_context_uses: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_contexts: 4,
            max_context_age: Duration::from_secs(10 * 60),
            max_context_uses: 40,
        }
    }
}

struct PooledContext {
    id: u64,
    session_id: String,
    page: Box<dyn PageHandle>,
    proxy: Option<Url>,
    created_at: Instant,
    use_count: u32,
    last_used_at: Instant,
}

/// Observability snapshot of the pool.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub max_contexts: usize,
    pub in_use: usize,
    pub idle: usize,
    pub created_total: u64,
    pub reused_total: u64,
    pub recycled_total: u64,
}

struct PoolShared {
    config: PoolConfig,
    engine: Arc<dyn BrowserEngine>,
    sessions: Arc<SessionManager>,
    idle: Mutex<VecDeque<PooledContext>>,
    next_id: AtomicU64,
    created: AtomicU64,
    reused: AtomicU64,
    recycled: AtomicU64,
}

impl PoolShared {
    fn release(&self, ctx: PooledContext) {
        let expired = ctx.created_at.elapsed() > self.config.max_context_age
            || ctx.use_count >= self.config.max_context_uses
            || self.sessions.should_rotate(&ctx.session_id);
        if expired {
            self.retire(ctx);
        } else {
            let mut idle = self.idle.lock().expect("pool idle lock poisoned");
            idle.push_back(ctx);
        }
    }

    fn retire(&self, ctx: PooledContext) {
        log::debug!(
            "retiring browser context {} after {} uses",
            ctx.id,
            ctx.use_count
        );
        self.sessions.retire_session(&ctx.session_id);
        self.recycled.fetch_add(1, Ordering::Relaxed);
        let mut page = ctx.page;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

/// Bounded browser-context pool.
pub struct BrowserPool {
    shared: Arc<PoolShared>,
    semaphore: Arc<Semaphore>,
}

impl BrowserPool {
    pub fn new(
        engine: Arc<dyn BrowserEngine>,
        sessions: Arc<SessionManager>,
        config: PoolConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_contexts.max(1)));
        Self {
            shared: Arc::new(PoolShared {
                config,
                engine,
                sessions,
                idle: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(0),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                recycled: AtomicU64::new(0),
            }),
            semaphore,
        }
    }

    /// Check out a context without a specific egress proxy.
    pub async fn acquire(&self) -> Result<PageLease, EngineError> {
        self.acquire_with_proxy(None).await
    }

    /// Check out a context routed through `proxy`, waiting for a slot if the
    /// pool is at capacity.
    pub async fn acquire_with_proxy(
        &self,
        proxy: Option<&Url>,
    ) -> Result<PageLease, EngineError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore closed");

        if let Some(mut ctx) = self.take_idle(proxy) {
            ctx.use_count += 1;
            ctx.last_used_at = Instant::now();
            self.shared.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(PageLease {
                ctx: Some(ctx),
                shared: self.shared.clone(),
                _permit: permit,
            });
        }

        let profile = StealthProfile::randomize();
        let script = profile.build_script();
        let page = self.shared.engine.create_context(&script, proxy).await?;
        let session_id = self.shared.sessions.create_session();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.created.fetch_add(1, Ordering::Relaxed);
        log::debug!("created browser context {id} (session {session_id})");

        Ok(PageLease {
            ctx: Some(PooledContext {
                id,
                session_id,
                page,
                proxy: proxy.cloned(),
                created_at: Instant::now(),
                use_count: 1,
                last_used_at: Instant::now(),
            }),
            shared: self.shared.clone(),
            _permit: permit,
        })
    }

    /// Pop a reusable idle context for the requested proxy, retiring stale
    /// ones encountered along the way.
    fn take_idle(&self, proxy: Option<&Url>) -> Option<PooledContext> {
        let mut idle = self.shared.idle.lock().expect("pool idle lock poisoned");
        while let Some(pos) = idle
            .iter()
            .position(|ctx| ctx.proxy.as_ref() == proxy)
        {
            let ctx = idle.remove(pos)?;
            let stale = ctx.created_at.elapsed() > self.shared.config.max_context_age
                || self.shared.sessions.should_rotate(&ctx.session_id);
            if stale {
                self.shared.retire(ctx);
                continue;
            }
            return Some(ctx);
        }
        None
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.shared.idle.lock().expect("pool idle lock poisoned");
        PoolStats {
            max_contexts: self.shared.config.max_contexts,
            in_use: self
                .shared
                .config
                .max_contexts
                .saturating_sub(self.semaphore.available_permits()),
            idle: idle.len(),
            created_total: self.shared.created.load(Ordering::Relaxed),
            reused_total: self.shared.reused.load(Ordering::Relaxed),
            recycled_total: self.shared.recycled.load(Ordering::Relaxed),
        }
    }

    /// Retire every idle context. Test/teardown entry point.
    pub fn reset(&self) {
        let drained: Vec<PooledContext> = {
            let mut idle = self.shared.idle.lock().expect("pool idle lock poisoned");
            idle.drain(..).collect()
        };
        for ctx in drained {
            self.shared.retire(ctx);
        }
    }
}

/// Exclusive checkout of one pooled context.
///
/// Dropping the lease returns the context to the idle set or retires it per
/// the recycling thresholds; the pool slot frees either way.
pub struct PageLease {
    ctx: Option<PooledContext>,
    shared: Arc<PoolShared>,
    _permit: OwnedSemaphorePermit,
}

impl PageLease {
    pub fn page(&mut self) -> &mut dyn PageHandle {
        self.ctx
            .as_mut()
            .expect("lease already released")
            .page
            .as_mut()
    }

    pub fn session_id(&self) -> &str {
        &self.ctx.as_ref().expect("lease already released").session_id
    }

    pub fn proxy(&self) -> Option<&Url> {
        self.ctx
            .as_ref()
            .expect("lease already released")
            .proxy
            .as_ref()
    }

    pub fn context_id(&self) -> u64 {
        self.ctx.as_ref().expect("lease already released").id
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.shared.release(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::session::SessionPolicy;
    use async_trait::async_trait;

    struct StubPage;

    #[async_trait]
    impl PageHandle for StubPage {
        async fn navigate(&mut self, _url: &Url) -> Result<(), EngineError> {
            Ok(())
        }

        async fn current_url(&self) -> Result<Url, EngineError> {
            Ok(Url::parse("https://example.com/").unwrap())
        }

        async fn content(&self) -> Result<String, EngineError> {
            Ok(String::new())
        }

        async fn cookie(&self, _name: &str) -> Result<Option<String>, EngineError> {
            Ok(None)
        }

        async fn close(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct StubEngine;

    #[async_trait]
    impl BrowserEngine for StubEngine {
        async fn create_context(
            &self,
            init_script: &str,
            _proxy: Option<&Url>,
        ) -> Result<Box<dyn PageHandle>, EngineError> {
            assert!(init_script.contains("webdriver"));
            Ok(Box::new(StubPage))
        }
    }

    fn pool(config: PoolConfig) -> BrowserPool {
        BrowserPool::new(
            Arc::new(StubEngine),
            Arc::new(SessionManager::new(SessionPolicy::default())),
            config,
        )
    }

    #[tokio::test]
    async fn reuses_idle_contexts() {
        let pool = pool(PoolConfig::default());
        let lease = pool.acquire().await.unwrap();
        let first_id = lease.context_id();
        drop(lease);

        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.context_id(), first_id);

        let stats = pool.stats();
        assert_eq!(stats.created_total, 1);
        assert_eq!(stats.reused_total, 1);
    }

    #[tokio::test]
    async fn blocks_at_capacity_until_release() {
        let pool = pool(PoolConfig {
            max_contexts: 1,
            ..Default::default()
        });
        let lease = pool.acquire().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(waited.is_err(), "second acquire should queue");

        drop(lease);
        let lease = tokio::time::timeout(Duration::from_millis(50), pool.acquire())
            .await
            .expect("slot freed")
            .unwrap();
        assert_eq!(lease.context_id(), 0);
    }

    #[tokio::test]
    async fn recycles_after_max_uses() {
        let pool = pool(PoolConfig {
            max_context_uses: 1,
            ..Default::default()
        });
        let lease = pool.acquire().await.unwrap();
        let first_id = lease.context_id();
        drop(lease);

        let lease = pool.acquire().await.unwrap();
        assert_ne!(lease.context_id(), first_id);
        drop(lease);

        let stats = pool.stats();
        assert_eq!(stats.created_total, 2);
        assert_eq!(stats.recycled_total, 2);
    }

    #[tokio::test]
    async fn proxyless_context_not_handed_to_proxy_caller() {
        let pool = pool(PoolConfig::default());
        drop(pool.acquire().await.unwrap());

        let proxy = Url::parse("http://10.0.0.1:3128").unwrap();
        let lease = pool.acquire_with_proxy(Some(&proxy)).await.unwrap();
        assert_eq!(lease.proxy(), Some(&proxy));
        assert_eq!(pool.stats().created_total, 2);
    }
}
