//! Cloudflare clearance wait.
//!
//! The browser itself runs the interstitial; this handler just waits for
//! navigation to settle under a bounded timeout and confirms success through
//! the clearance cookie.

use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::browser::{EngineError, PageHandle};
use crate::challenges::{ChallengeKind, detect_challenge};

const CLEARANCE_COOKIE: &str = "cf_clearance";

/// Bounded wait-and-confirm for Cloudflare interstitials.
#[derive(Debug, Clone)]
pub struct CloudflareHandler {
    pub clearance_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CloudflareHandler {
    fn default() -> Self {
        Self {
            clearance_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl CloudflareHandler {
    pub fn new(clearance_timeout: Duration) -> Self {
        Self {
            clearance_timeout,
            ..Self::default()
        }
    }

    /// Poll until the clearance cookie appears or the timeout elapses.
    ///
    /// Returns `Ok(true)` once cleared; `Ok(false)` means the challenge was
    /// not resolved in time and the session should be rotated.
    pub async fn wait_for_clearance(
        &self,
        page: &mut dyn PageHandle,
    ) -> Result<bool, EngineError> {
        let deadline = Instant::now() + self.clearance_timeout;

        loop {
            if page.cookie(CLEARANCE_COOKIE).await?.is_some() {
                // Cookie set; make sure the interstitial actually navigated
                // away before declaring victory.
                let url = page.current_url().await?;
                let body = page.content().await?;
                let still_challenged = detect_challenge(&url, &body)
                    .is_some_and(|signal| signal.kind == ChallengeKind::Cloudflare);
                if !still_challenged {
                    log::debug!("cloudflare clearance obtained for {}", url);
                    return Ok(true);
                }
            }

            if Instant::now() >= deadline {
                log::warn!(
                    "cloudflare clearance not obtained within {:.0}s",
                    self.clearance_timeout.as_secs_f64()
                );
                return Ok(false);
            }

            sleep(self.poll_interval).await;
        }
    }
}
