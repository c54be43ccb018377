//! Trailing-window rate limiter shared by every worker of a sweep.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Blocks callers until fewer than `max_in_window` grants have happened in the
/// trailing window. Only delays, never rejects; request content is never
/// inspected. Waiters queue on the internal mutex, so grants stay fair across
/// workers.
#[derive(Debug)]
pub struct RateLimiter {
    max_in_window: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_in_window: usize, window: Duration) -> Self {
        Self {
            max_in_window: max_in_window.max(1),
            window,
            grants: Mutex::new(VecDeque::new()),
        }
    }

    /// The study's default budget against hosted APIs.
    pub fn per_minute(max_in_window: usize) -> Self {
        Self::new(max_in_window, Duration::from_secs(60))
    }

    /// Wait until a request slot is free in the trailing window, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                while grants
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.window)
                {
                    grants.pop_front();
                }
                if grants.len() < self.max_in_window {
                    grants.push_back(now);
                    return;
                }
                // Oldest grant decides when the next slot opens.
                match grants.front() {
                    Some(&oldest) => self.window - now.duration_since(oldest),
                    None => return,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn grants_within_budget_do_not_block() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeding_the_window_waits_a_full_window() {
        let window = Duration::from_secs(60);
        let limiter = RateLimiter::new(5, window);
        let start = Instant::now();
        // 2N requests with a limit of N: the (N+1)th cannot complete before
        // one window has passed.
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= window);
    }

    #[tokio::test(start_paused = true)]
    async fn slots_free_up_as_the_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(6)).await;
        limiter.acquire().await;

        // One slot frees at t=10, the other at t=16.
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquirers_all_get_through() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(1)));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
