use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use ollama_client::OllamaError;

/// Bounded retry with exponential backoff, shared by every stage that
/// talks to the reasoner. Delay is `base * 2^attempt` capped at
/// `max_delay`, plus 0-500ms random jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = Duration::from_millis(rand::rng().random_range(0..500));
        exp + jitter
    }
}

/// Run `op` until it succeeds or the attempt budget is spent. Only
/// transient transport failures are retried; anything else returns
/// immediately. The final error is returned after exhaustion; callers
/// degrade it in-band rather than propagating it past their stage.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, OllamaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OllamaError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(e);
                }
                let backoff = policy.backoff(attempt - 1);
                warn!(
                    label,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Reasoner call failed, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
