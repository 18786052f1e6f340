use crate::error::DiscoveryError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule for transport-level failures (rate limits, timeouts, 5xx)
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// No waiting at all, for tests
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            exponential_base: 1.0,
            jitter: false,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let jitter = if self.jitter {
            1.0 + rand::thread_rng().gen::<f64>()
        } else {
            1.0
        };
        delay.mul_f64(self.exponential_base * jitter)
    }
}

/// Whether an error returned by a provider is worth retrying
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(e) = err.downcast_ref::<DiscoveryError>() {
        return e.is_transient();
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        return e.is_timeout() || e.is_connect();
    }
    false
}

/// Retry an async operation with exponential backoff while its error is transient
pub async fn retry_with_backoff<F, Fut, T>(policy: BackoffPolicy, mut operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut retries = 0;
    let mut delay = policy.initial_delay;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && retries < policy.max_retries => {
                retries += 1;
                delay = policy.next_delay(delay);
                warn!("Retrying in {:.1}s ({}/{}) for {}", delay.as_secs_f64(), retries, policy.max_retries, e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
