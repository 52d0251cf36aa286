//! Token-bucket rate limiting.
//!
//! Buckets refill lazily on every call, so no background timer is needed.
//! Waiting re-checks at most every 100ms, which lets concurrent waiters see
//! each other's acquisitions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Longest single sleep while waiting for a token.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Keeps rounding error from turning the wait into a busy loop.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    max_tokens: f64,
    window_ms: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_refill).as_secs_f64() * 1000.0;
        self.tokens =
            (self.tokens + elapsed_ms * self.max_tokens / self.window_ms).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Take a token, or say how long until one is available.
    fn try_consume(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            let wait_ms = deficit * self.window_ms / self.max_tokens;
            Some(Duration::from_secs_f64(wait_ms / 1000.0))
        }
    }
}

/// `max_tokens` permits per `window`, refilled continuously.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Start full. `max_tokens` is at least 1 and `window` at least 1ms.
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        let max_tokens = f64::from(max_tokens.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                max_tokens,
                window_ms: (window.as_secs_f64() * 1000.0).max(1.0),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn per_minute(max_tokens: u32) -> Self {
        Self::new(max_tokens, Duration::from_secs(60))
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.bucket.lock().try_consume().is_none()
    }

    /// Wait until a token can be taken, then take it.
    pub async fn wait_for_available_token(&self) {
        loop {
            let wait = self.bucket.lock().try_consume();
            match wait {
                None => return,
                Some(d) => {
                    tokio::time::sleep(d.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)).await
                }
            }
        }
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill();
        bucket.tokens
    }

    pub fn max_tokens(&self) -> f64 {
        self.bucket.lock().max_tokens
    }
}

/// Several independent quotas that must all grant a token.
#[derive(Debug, Clone, Default)]
pub struct CompositeLimiter {
    parts: Vec<Arc<RateLimiter>>,
}

impl CompositeLimiter {
    pub fn new(parts: Vec<Arc<RateLimiter>>) -> Self {
        Self { parts }
    }

    /// Acquire from every part concurrently.
    pub async fn wait_for_available_token(&self) {
        join_all(self.parts.iter().map(|p| p.wait_for_available_token())).await;
    }
}

/// Navigation quotas. Zero disables a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationLimits {
    pub per_minute: u32,
    pub per_host_per_minute: u32,
}

impl Default for NavigationLimits {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_host_per_minute: 20,
        }
    }
}

/// A global navigation bucket plus one bucket per host, created on first use
/// and dropped again once it has refilled.
#[derive(Debug)]
pub struct NavigationLimiter {
    limits: NavigationLimits,
    global: Option<Arc<RateLimiter>>,
    hosts: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl NavigationLimiter {
    pub fn new(limits: NavigationLimits) -> Self {
        Self {
            limits,
            global: (limits.per_minute > 0)
                .then(|| Arc::new(RateLimiter::per_minute(limits.per_minute))),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(NavigationLimits {
            per_minute: 0,
            per_host_per_minute: 0,
        })
    }

    pub fn limits(&self) -> NavigationLimits {
        self.limits
    }

    /// Wait for permission to navigate to `url`.
    pub async fn acquire(&self, url: &str) {
        let mut parts: Vec<Arc<RateLimiter>> = self.global.iter().cloned().collect();
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase));
        let per_host = self.limits.per_host_per_minute;
        if let Some(host) = host.as_ref().filter(|_| per_host > 0) {
            let limiter = {
                let mut hosts = self.hosts.lock();
                // A full bucket nobody holds is the same as a fresh one.
                hosts.retain(|h, l| {
                    h == host || Arc::strong_count(l) > 1 || l.available() < l.max_tokens()
                });
                hosts
                    .entry(host.clone())
                    .or_insert_with(|| {
                        debug!(%host, "creating per-host navigation limiter");
                        Arc::new(RateLimiter::per_minute(per_host))
                    })
                    .clone()
            };
            parts.push(limiter);
        }
        if parts.is_empty() {
            return;
        }

        let started = Instant::now();
        CompositeLimiter::new(parts).wait_for_available_token().await;
        let waited = started.elapsed();
        if waited >= MAX_POLL_INTERVAL {
            info!(
                host = host.as_deref().unwrap_or("-"),
                waited_ms = waited.as_millis() as u64,
                "navigation delayed by rate limit"
            );
        }
    }
}
