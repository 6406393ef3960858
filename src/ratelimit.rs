//! Sliding-window request throttling for quota-limited services.
//!
//! Each remote service (OCR, embedding) gets its own limiter sized to that
//! service's quota. This is a blocking throttle, not a
//! queue: callers pay the wait cost inline, and the limiter is the single
//! serialization point shared by concurrent embedding workers.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

struct WindowState {
    count: usize,
    window_start: Instant,
}

/// Sliding one-minute window request governor.
pub struct RateLimiter {
    limit: usize,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// Create a limiter permitting `limit` acquisitions per minute.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Acquire one request slot, sleeping until the window rolls over when
    /// the quota is exhausted. Safe to call from concurrent tasks.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(state.window_start) >= WINDOW {
                    state.count = 0;
                    state.window_start = now;
                }
                if state.count < self.limit {
                    state.count += 1;
                    return;
                }
                WINDOW.saturating_sub(now.duration_since(state.window_start))
            };
            tracing::info!(wait_secs = wait.as_secs_f64(), "Rate limit hit; waiting for window reset");
            tokio::time::sleep(wait).await;
        }
    }
}
