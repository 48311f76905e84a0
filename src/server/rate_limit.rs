use crate::errors::AppError;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use portable_atomic::Ordering;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Client key used when the peer address is unknown.
const GLOBAL_KEY: &str = "global";

/// Stale windows are swept once the table grows past this.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    count: u32,
}

/// Fixed-window counter per client key.
pub struct RateLimiter {
    window: Duration,
    max: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request for `key` at `now`. False once the count in the
    /// current window exceeds `max`.
    pub fn check(&self, key: &str, now: Instant) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            // A poisoned table only ever fails open.
            return true;
        };

        if windows.len() > SWEEP_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.start) < window);
        }

        let entry = windows
            .entry(key.to_string())
            .or_insert(Window { start: now, count: 0 });
        if now.saturating_duration_since(entry.start) >= self.window {
            *entry = Window { start: now, count: 0 };
        }
        entry.count = entry.count.saturating_add(1);
        entry.count <= self.max
    }
}

/// axum middleware: per-IP limit, counted in `PerfCounters`.
pub async fn limit_requests(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| GLOBAL_KEY.to_string());

    if !state.limiter.check(&key, Instant::now()) {
        state.counters.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(client = %key, "rate limit exceeded");
        return AppError::RateLimited.into_response();
    }

    state.counters.requests_served.fetch_add(1, Ordering::Relaxed);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let t0 = Instant::now();
        assert!(limiter.check("1.2.3.4", t0));
        assert!(limiter.check("1.2.3.4", t0 + Duration::from_secs(1)));
        assert!(!limiter.check("1.2.3.4", t0 + Duration::from_secs(2)));
        // other clients have their own window
        assert!(limiter.check("5.6.7.8", t0 + Duration::from_secs(2)));
        // window boundary is inclusive
        assert!(limiter.check("1.2.3.4", t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_rejections_still_count() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 1);
        let t0 = Instant::now();
        assert!(limiter.check("k", t0));
        for i in 1..5 {
            assert!(!limiter.check("k", t0 + Duration::from_secs(i)));
        }
        assert!(limiter.check("k", t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_sweep_drops_stale_windows() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 5);
        let t0 = Instant::now();
        for i in 0..=SWEEP_THRESHOLD {
            limiter.check(&format!("c{i}"), t0);
        }
        limiter.check("late", t0 + Duration::from_secs(5));
        let len = limiter.windows.lock().unwrap().len();
        assert_eq!(len, 1);
    }
}
