//! Fixed-window rate limiter for provider calls
//!
//! Every outbound provider request goes through [`RateLimiter::acquire`].
//! Within a window the first `cap` callers pass straight through; the next
//! caller sleeps until the window ends and opens a fresh one.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::info;

use super::config::IngestConfig;

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Shared limiter, one per provider
#[derive(Debug)]
pub struct RateLimiter {
    cap: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(cap: u32, window: Duration) -> Self {
        Self {
            cap: cap.max(1),
            window,
            state: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.rate_limit, config.rate_window())
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Wait until a call is allowed in the current window, then count it.
    ///
    /// The lock is held while waiting, so callers queue in order and the
    /// check-and-increment can never interleave.
    pub async fn acquire(&self) {
        let mut window = self.state.lock().await;

        let now = Instant::now();
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count < self.cap {
            window.count += 1;
            return;
        }

        let resume_at = window.started + self.window;
        info!(
            cap = self.cap,
            wait_ms = resume_at.saturating_duration_since(now).as_millis() as u64,
            "Rate limit reached, waiting for the next window"
        );
        sleep_until(resume_at).await;

        window.started = Instant::now();
        window.count = 1;
    }

    /// Calls counted in the current window
    pub async fn used(&self) -> u32 {
        let window = self.state.lock().await;
        if window.started.elapsed() >= self.window {
            0
        } else {
            window.count
        }
    }
}
