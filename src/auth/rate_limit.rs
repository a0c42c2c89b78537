//! Fixed-window request rate limiting over the cache protocol.
//!
//! Counters are `{prefix}:{identifier}` keys incremented atomically by the
//! cache; the first hit of a window attaches a TTL equal to the window
//! length. The limiter is advisory: it fails open on any cache error and is
//! a complete no-op when no cache is configured, trading strict quota
//! enforcement for availability.
//!
//! Fixed windows admit bursts of up to roughly twice the configured maximum
//! across a window boundary. That is a known property of the algorithm and
//! is retained deliberately.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::Cache;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Key namespace, e.g. `rl:login`. Distinct prefixes count independently.
    pub prefix: String,
    pub window: Duration,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            prefix: "rl".to_string(),
            window: Duration::from_secs(60),
            max_requests: 10,
        }
    }
}

pub struct RateLimiter {
    cache: Option<Arc<dyn Cache>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: Option<Arc<dyn Cache>>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    /// Count one hit for `identifier` (the caller picks the identity: peer
    /// address by default, user id on post-login routes). Returns
    /// `Err(RateLimited)` only on a genuine quota breach.
    pub async fn check(&self, identifier: &str) -> Result<(), AppError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };

        let key = format!("{}:{}", self.config.prefix, identifier);
        let window_secs = self.config.window.as_secs();

        let count = match cache.incr(&key).await {
            Ok(count) => count,
            Err(err) => {
                warn!("rate limiter unavailable, allowing request: {}", err);
                return Ok(());
            }
        };

        if count == 1 {
            if let Err(err) = cache.expire(&key, window_secs as i64).await {
                warn!("failed to set rate limit window on {}: {}", key, err);
                // Without a TTL the counter would never reset; drop it
                // rather than leave an unbounded key behind.
                if let Err(err) = cache.del(&key).await {
                    warn!("failed to delete orphaned rate limit key {}: {}", key, err);
                }
                return Ok(());
            }
        }

        if count > i64::from(self.config.max_requests) {
            return Err(AppError::RateLimited { retry_after: window_secs });
        }

        Ok(())
    }
}
