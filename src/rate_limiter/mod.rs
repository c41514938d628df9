/*!
 * # Rate Limiting Module
 *
 * Fixed-window, per-key rate limiter consulted by the fulfillment pipeline
 * before an order is claimed. Each check is a single atomic
 * check-and-increment: the in-memory store holds the shard lock of the
 * `DashMap` entry, the Redis store relies on `INCR`.
 *
 * A Redis outage degrades to the in-memory fallback rather than blocking
 * submissions.
 */
use dashmap::DashMap;
use redis::AsyncCommands;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitEntry {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn roll_window(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn time_until_reset(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.duration_since(self.window_start))
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 5,
            window_duration: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Default)]
pub enum RateLimitBackend {
    #[default]
    InMemory,
    Redis {
        client: Arc<redis::Client>,
        namespace: String,
    },
}

#[derive(Clone)]
enum RateLimitStore {
    InMemory {
        entries: Arc<DashMap<String, RateLimitEntry>>,
    },
    Redis {
        client: Arc<redis::Client>,
        namespace: String,
        fallback: Arc<DashMap<String, RateLimitEntry>>,
    },
}

/// Outcome of a single check-and-increment.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window resets
    pub reset_time: Duration,
}

impl RateLimitResult {
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_time.as_secs().max(1)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: RateLimitStore,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, backend: RateLimitBackend) -> Result<Self, RateLimitError> {
        if config.requests_per_window == 0 {
            return Err(RateLimitError::InvalidConfig(
                "requests_per_window must be positive".into(),
            ));
        }
        if config.window_duration.is_zero() {
            return Err(RateLimitError::InvalidConfig(
                "window_duration must be positive".into(),
            ));
        }

        let store = match backend {
            RateLimitBackend::InMemory => RateLimitStore::InMemory {
                entries: Arc::new(DashMap::new()),
            },
            RateLimitBackend::Redis { client, namespace } => RateLimitStore::Redis {
                client,
                namespace,
                fallback: Arc::new(DashMap::new()),
            },
        };

        Ok(Self { store, config })
    }

    pub fn in_memory(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        Self::new(config, RateLimitBackend::InMemory)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one attempt against `key` and reports whether it is allowed.
    pub async fn check_rate_limit(&self, key: &str) -> Result<RateLimitResult, RateLimitError> {
        match &self.store {
            RateLimitStore::InMemory { entries } => {
                Ok(Self::check_in_memory(entries, key, &self.config))
            }
            RateLimitStore::Redis {
                client,
                namespace,
                fallback,
            } => match client.get_async_connection().await {
                Ok(mut conn) => {
                    match Self::check_with_redis(&mut conn, namespace, key, &self.config).await {
                        Ok(result) => Ok(result),
                        Err(err) => {
                            warn!("Redis rate limit error: {}", err);
                            Ok(Self::check_in_memory(fallback, key, &self.config))
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "Failed to connect to Redis for rate limiting, using fallback: {}",
                        err
                    );
                    Ok(Self::check_in_memory(fallback, key, &self.config))
                }
            },
        }
    }

    fn check_in_memory(
        entries: &DashMap<String, RateLimitEntry>,
        key: &str,
        config: &RateLimitConfig,
    ) -> RateLimitResult {
        let now = Instant::now();
        let mut entry = entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::new(now));

        entry.roll_window(now, config.window_duration);
        let reset_time = entry.time_until_reset(now, config.window_duration);

        if entry.count >= config.requests_per_window {
            debug!(key, count = entry.count, "Rate limit exceeded");
            return RateLimitResult {
                allowed: false,
                limit: config.requests_per_window,
                remaining: 0,
                reset_time,
            };
        }

        entry.count += 1;
        RateLimitResult {
            allowed: true,
            limit: config.requests_per_window,
            remaining: config.requests_per_window - entry.count,
            reset_time,
        }
    }

    async fn check_with_redis<C>(
        conn: &mut C,
        namespace: &str,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, redis::RedisError>
    where
        C: redis::aio::ConnectionLike + Send,
    {
        let redis_key = format!("{}:{}", namespace, key);
        let limit = i64::from(config.requests_per_window);
        let window_secs = config.window_duration.as_secs().max(1);

        let count: i64 = conn.incr(&redis_key, 1).await?;
        let ttl: i64 = conn.ttl(&redis_key).await.unwrap_or(-1);
        if count == 1 || ttl < 0 {
            let _: Result<(), _> = conn.expire(&redis_key, window_secs as usize).await;
        }

        let ttl_secs = if ttl > 0 { ttl as u64 } else { window_secs };
        let allowed = count <= limit;
        let remaining = if allowed {
            config
                .requests_per_window
                .saturating_sub(u32::try_from(count.max(0)).unwrap_or(u32::MAX))
        } else {
            0
        };

        Ok(RateLimitResult {
            allowed,
            limit: config.requests_per_window,
            remaining,
            reset_time: Duration::from_secs(ttl_secs),
        })
    }

    pub async fn reset(&self, key: &str) {
        match &self.store {
            RateLimitStore::InMemory { entries } => {
                entries.remove(key);
            }
            RateLimitStore::Redis {
                client,
                namespace,
                fallback,
            } => {
                let redis_key = format!("{}:{}", namespace, key);
                match client.get_async_connection().await {
                    Ok(mut conn) => {
                        let _: Result<(), _> = conn.del(&redis_key).await;
                    }
                    Err(err) => {
                        warn!("Failed to reset Redis quota for {}: {}", key, err);
                    }
                }
                fallback.remove(key);
            }
        }
    }

    /// Drops in-memory windows that have fully elapsed.
    pub fn cleanup_expired(&self) {
        let window = self.config.window_duration;
        let now = Instant::now();
        let entries = match &self.store {
            RateLimitStore::InMemory { entries } => entries,
            RateLimitStore::Redis { fallback, .. } => fallback,
        };
        entries.retain(|_, entry| now.duration_since(entry.window_start) < window);
    }
}
