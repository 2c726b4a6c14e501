use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::config::RateLimiterConfig;
use crate::error::{PromptPagesError, Result};

/// Outcome of a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Granted,
    MustWait(Duration),
}

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    count: u32,
}

/// Call budget for one external provider.
///
/// The window resets wholesale once `interval` has elapsed since it opened,
/// so a burst of up to `2 * limit` calls can straddle a boundary. One limiter
/// is shared (via `Arc`) by every request for the lifetime of the process.
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<RateWindow>,
    limit: u32,
    interval: Duration,
    backoff: Duration,
    max_retries: u32,
}

impl RateLimiter {
    pub fn new(limit: u32, interval: Duration, backoff: Duration, max_retries: u32) -> Self {
        Self {
            window: Mutex::new(RateWindow {
                window_start: Instant::now(),
                count: 0,
            }),
            limit,
            interval,
            backoff,
            max_retries,
        }
    }

    pub fn from_config(cfg: &RateLimiterConfig) -> Self {
        Self::new(cfg.max_requests, cfg.interval(), cfg.backoff(), cfg.max_retries)
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Takes one slot if the current window has room.
    pub async fn try_acquire(&self) -> Permit {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        if now.duration_since(window.window_start) > self.interval {
            window.window_start = now;
            window.count = 0;
        }

        if window.count < self.limit {
            window.count += 1;
            Permit::Granted
        } else {
            Permit::MustWait(self.backoff)
        }
    }

    /// Waits for a slot, sleeping the fixed backoff between attempts, and
    /// gives up after `max_retries` waits.
    pub async fn acquire(&self) -> Result<()> {
        let mut waits = 0;
        loop {
            match self.try_acquire().await {
                Permit::Granted => return Ok(()),
                Permit::MustWait(delay) => {
                    if waits >= self.max_retries {
                        return Err(PromptPagesError::RateLimitExhausted {
                            attempts: waits + 1,
                        });
                    }
                    waits += 1;
                    tracing::warn!(
                        wait_ms = delay.as_millis() as u64,
                        attempt = waits,
                        "rate limit reached, backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_limit_within_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), Duration::from_secs(61), 0);
        assert_eq!(limiter.try_acquire().await, Permit::Granted);
        assert_eq!(limiter.try_acquire().await, Permit::Granted);
        assert_eq!(
            limiter.try_acquire().await,
            Permit::MustWait(Duration::from_secs(61))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_interval() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), Duration::from_secs(61), 0);
        assert_eq!(limiter.try_acquire().await, Permit::Granted);
        assert!(matches!(limiter.try_acquire().await, Permit::MustWait(_)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.try_acquire().await, Permit::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_next_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), Duration::from_secs(61), 3);
        limiter.acquire().await.unwrap();

        let start = Instant::now();
        limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_gives_up_after_max_retries() {
        // Backoff shorter than the window, so retries never reach a fresh window.
        let limiter = RateLimiter::new(1, Duration::from_secs(600), Duration::from_secs(1), 2);
        limiter.acquire().await.unwrap();

        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            PromptPagesError::RateLimitExhausted { attempts: 3 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(
            3,
            Duration::from_secs(60),
            Duration::from_secs(61),
            0,
        ));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.try_acquire().await }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() == Permit::Granted {
                granted += 1;
            }
        }
        assert_eq!(granted, 3);
    }
}
