use std::time::Duration;

use crate::error::StoreError;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(300),
            jitter_max: Some(Duration::from_millis(30)),
        }
    }
}

impl RetryConfig {
    /// Used for inserts whose ids are generated client-side, so a replay
    /// after an ambiguous failure cannot create a second row.
    pub fn idempotent_write() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }

    fn backoff_for(&self, backoff: Duration) -> Duration {
        match self.jitter_max {
            Some(jitter_max) => {
                let jitter_ms = jitter_max.as_millis() as u64;
                let extra = if jitter_ms == 0 {
                    0
                } else {
                    rand::random::<u64>() % (jitter_ms + 1)
                };
                backoff + Duration::from_millis(extra)
            }
            None => backoff,
        }
    }
}

/// Retries `f` while `should_retry` accepts the error and attempts remain.
pub async fn retry_async_when<F, Fut, T, E, P>(
    config: RetryConfig,
    mut f: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempts_left = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts_left -= 1;
                if attempts_left == 0 || !should_retry(&e) {
                    return Err(e);
                }

                tokio::time::sleep(config.backoff_for(backoff)).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}

/// Store operations are retried on backend faults only; constraint
/// violations are final.
pub async fn retry_store<F, Fut, T>(config: RetryConfig, f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    retry_async_when(config, f, |e| matches!(e, StoreError::Backend(_))).await
}
