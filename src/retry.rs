use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Bounded, jittered exponential backoff for outbound gateway calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration, jitter_pct: f64) -> Self {
        let base_delay = base_delay.max(Duration::from_millis(1));
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    pub fn for_gateway(max_attempts: usize) -> Self {
        Self::new(
            max_attempts,
            Duration::from_millis(250),
            Duration::from_secs(2),
            0.2,
        )
    }

    fn delay_for(&self, retry: usize) -> Duration {
        let factor = 2_u32.saturating_pow(retry as u32);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter_pct == 0.0 {
            return delay;
        }

        let spread = delay.as_millis() as f64 * self.jitter_pct;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((delay.as_millis() as f64 + offset).max(0.0) as u64)
    }

    /// Run `op` until it succeeds or `max_attempts` is spent; the last error
    /// is returned. `op` receives the zero-based attempt number.
    pub async fn retry_async<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt - 1);
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying gateway call"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_gateway(3)
    }
}
