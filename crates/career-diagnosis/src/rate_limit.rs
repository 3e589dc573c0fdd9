use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

use crate::error::AppError;

/// Process-wide token bucket in front of the model-backed endpoints.
#[derive(Clone)]
pub struct RateLimiter {
    rps: u32,
    state: Arc<Mutex<State>>,
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            rps,
            state: Arc::new(Mutex::new(State {
                tokens: rps as f64,
                last: Instant::now(),
            })),
        }
    }

    /// `None` unless `RATE_LIMIT_RPS` is a positive integer.
    pub fn from_env() -> Option<Self> {
        let rps = std::env::var("RATE_LIMIT_RPS")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|&n| n > 0)?;
        Some(Self::new(rps))
    }

    pub fn rps(&self) -> u32 {
        self.rps
    }

    pub async fn check(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last);
        state.last = now;

        let burst = self.rps as f64;
        let refill = (elapsed.as_secs_f64() * burst).min(burst);
        state.tokens = (state.tokens + refill).min(burst);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let wait = Duration::from_secs_f64((1.0 - state.tokens) / burst);
        let retry_after_ms = wait.as_millis() as u64;
        warn!(rps = self.rps, retry_after_ms, "rate limit exceeded");
        Err(AppError::RateLimited { retry_after_ms })
    }
}
