//! Local rate limit: a fixed-window counter.
//!
//! Allows `count` accesses per `interval`; further callers are told how
//! long to wait until the window rolls over.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use weir_sdk::RateLimit;
use weir_types::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct LocalRateLimitConfig {
    /// Accesses allowed per window.
    #[serde(default = "default_count")]
    pub count: u64,
    /// Window length, e.g. `"1s"`.
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_count() -> u64 {
    1000
}

fn default_interval() -> String {
    "1s".to_string()
}

struct Window {
    started: Instant,
    used: u64,
}

pub struct LocalRateLimit {
    count: u64,
    interval: Duration,
    window: Mutex<Window>,
}

impl LocalRateLimit {
    /// Build from config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a malformed interval or a zero count.
    pub fn new(conf: &LocalRateLimitConfig) -> Result<Self, Error> {
        if conf.count == 0 {
            return Err(Error::Config("rate limit count must be at least 1".into()));
        }
        Ok(Self {
            count: conf.count,
            interval: crate::config::parse_duration(&conf.interval)?,
            window: Mutex::new(Window {
                started: Instant::now(),
                used: 0,
            }),
        })
    }
}

#[async_trait]
impl RateLimit for LocalRateLimit {
    async fn access(&self) -> Result<Duration, Error> {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        if now.duration_since(window.started) >= self.interval {
            window.started = now;
            window.used = 0;
        }
        if window.used < self.count {
            window.used += 1;
            return Ok(Duration::ZERO);
        }
        Ok(self.interval.saturating_sub(now.duration_since(window.started)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(count: u64, interval: &str) -> LocalRateLimit {
        LocalRateLimit::new(&LocalRateLimitConfig {
            count,
            interval: interval.to_string(),
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn allows_count_per_window() {
        let rl = limit(2, "1s");
        assert_eq!(rl.access().await.unwrap(), Duration::ZERO);
        assert_eq!(rl.access().await.unwrap(), Duration::ZERO);
        assert!(rl.access().await.unwrap() > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn window_rolls_over() {
        let rl = limit(1, "1s");
        assert_eq!(rl.access().await.unwrap(), Duration::ZERO);
        assert!(rl.access().await.unwrap() > Duration::ZERO);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(rl.access().await.unwrap(), Duration::ZERO);
    }

    #[test]
    fn zero_count_rejected() {
        assert!(LocalRateLimit::new(&LocalRateLimitConfig {
            count: 0,
            interval: "1s".into(),
        })
        .is_err());
    }
}
