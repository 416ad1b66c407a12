//! Per-client fixed-window rate limiting and client address extraction.
//!
//! The hub keeps one [`RateLimiter`] per route class in [`RateLimits`]:
//! device notifications and public reads are keyed by client address,
//! authenticated reads and writes by user id.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use tokio::sync::Mutex;

use crate::app_state::AppState;
use crate::config::HubConfig;
use crate::error::HubError;

/// Number of tracked clients above which expired windows are pruned.
const PRUNE_THRESHOLD: usize = 1024;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Time until the current window resets, when refused.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: usize,
}

/// Allows at most `limit` requests per key in each fixed window.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    states: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` hits per `window`.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Records a hit for `key` and decides whether it is allowed.
    pub async fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now()).await
    }

    /// Records a hit for `key`, refusing it once the window is used up.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RateLimited`] with the time left in the window.
    pub async fn enforce(&self, scope: &str, key: &str) -> Result<(), HubError> {
        let decision = self.check(key).await;
        if decision.allowed {
            return Ok(());
        }
        let retry_after_ms = decision
            .retry_after
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        tracing::warn!(scope, key, retry_after_ms, "rate limited");
        Err(HubError::RateLimited { retry_after_ms })
    }

    async fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut states = self.states.lock().await;
        if states.len() > PRUNE_THRESHOLD {
            states.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        }
        let window = states.entry(key.to_string()).or_insert(Window {
            started: now,
            hits: 0,
        });
        if now.saturating_duration_since(window.started) >= self.window {
            *window = Window {
                started: now,
                hits: 0,
            };
        }
        if window.hits < self.limit {
            window.hits += 1;
            return RateDecision {
                allowed: true,
                retry_after: None,
            };
        }
        let elapsed = now.saturating_duration_since(window.started);
        RateDecision {
            allowed: false,
            retry_after: Some(self.window.saturating_sub(elapsed)),
        }
    }
}

/// The limiters applied by the REST handlers.
#[derive(Debug)]
pub struct RateLimits {
    /// `POST /api/push/notify`, per client address.
    pub notify: RateLimiter,
    /// Unauthenticated reads, per client address.
    pub public_read: RateLimiter,
    /// Authenticated reads, per user.
    pub user_read: RateLimiter,
    /// Authenticated writes, per user.
    pub user_write: RateLimiter,
}

impl RateLimits {
    /// Builds the limiters from the configured limits and windows.
    #[must_use]
    pub fn from_config(config: &HubConfig) -> Self {
        let api_window = Duration::from_secs(config.api_rate_window_secs);
        Self {
            notify: RateLimiter::new(
                config.notify_rate_limit,
                Duration::from_secs(config.notify_rate_window_secs),
            ),
            public_read: RateLimiter::new(config.read_rate_limit, api_window),
            user_read: RateLimiter::new(config.read_rate_limit, api_window),
            user_write: RateLimiter::new(config.write_rate_limit, api_window),
        }
    }
}

/// Client address used as a rate limit key.
///
/// This is the peer address of the connection. The first
/// `X-Forwarded-For` entry is used instead only when
/// [`HubConfig::trust_proxy`] is set. Without either the key is
/// `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    /// Resolves the client address from request parts.
    #[must_use]
    pub fn resolve(parts: &Parts, trust_proxy: bool) -> Self {
        let forwarded = trust_proxy
            .then(|| parts.headers.get("x-forwarded-for"))
            .flatten()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let ip = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        Self(ip)
    }
}

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::resolve(parts, state.config.trust_proxy))
    }
}
