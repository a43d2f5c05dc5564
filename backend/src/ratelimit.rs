use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    /// Lock shards in the per-user map, rounded up to a power of two.
    pub shards: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Rate limit exceeded, retry after {}s", retry_after.as_secs_f64().ceil())]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// Per-user request counter over a fixed window that opens with the user's
/// first counted request.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let windows = DashMap::with_shard_amount(config.shards.max(2).next_power_of_two());
        Self { config, windows }
    }

    /// Counts one request for `user_id`. Rejected requests are not counted.
    /// Returns how many requests remain in the current window.
    pub fn check(&self, user_id: &str) -> Result<u32, RateLimitExceeded> {
        let now = Instant::now();
        let max = self.config.max_requests;
        let window_len = self.config.window;

        // The entry guard holds the shard lock until the count is updated.
        let mut window = self.windows.entry(user_id.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(window.started) >= window_len {
            *window = Window {
                count: 0,
                started: now,
            };
        }

        if window.count >= max {
            let retry_after = (window.started + window_len).saturating_duration_since(now);
            return Err(RateLimitExceeded { retry_after });
        }

        window.count += 1;
        Ok(max - window.count)
    }

    /// Drops windows that have fully elapsed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let window_len = self.config.window;
        let mut removed = 0;
        self.windows.retain(|_, w| {
            let live = now.duration_since(w.started) < window_len;
            if !live {
                removed += 1;
            }
            live
        });
        if removed > 0 {
            log::debug!("Purged {} expired rate-limit windows", removed);
        }
        removed
    }

    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }
}
