//! Clock abstraction so the sampling loop and outcome polling can run on fake time

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Wall-clock Unix time in milliseconds
    fn now_ms(&self) -> i64;

    async fn sleep(&self, duration: Duration);

    /// Wall-clock Unix time in seconds
    fn now(&self) -> i64 {
        self.now_ms().div_euclid(1000)
    }
}

/// Real time via chrono + tokio
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock: `sleep` advances time instantly
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn at_secs(secs: i64) -> Self {
        Self { now_ms: AtomicI64::new(secs * 1000) }
    }

    pub fn advance(&self, duration: Duration) {
        self.now_ms.fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::at_secs(100);
        assert_eq!(clock.now(), 100);
        clock.sleep(Duration::from_millis(1500)).await;
        assert_eq!(clock.now_ms(), 101_500);
        assert_eq!(clock.now(), 101);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2024-01-01
        assert!(SystemClock.now() > 1_704_067_200);
    }
}
