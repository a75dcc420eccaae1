// Bounded, rate-limited access to a slow registry backend.
// Every call, rate-limit wait included, gets a timeout and one retry with backoff; persistent
// failure comes back as RegistryError::Unavailable so callers can tell the
// user to try again later instead of hanging.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use super::{RecordField, Registry, RegistryError, UserId, UserRecord};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the retry; doubles for every further attempt.
    pub backoff: Duration,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            max_attempts: 2,
            backoff: Duration::from_millis(500),
            requests_per_second: 1,
            burst: 10,
        }
    }
}

pub struct ResilientRegistry<R> {
    inner: R,
    config: RetryConfig,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl<R: Registry> ResilientRegistry<R> {
    pub fn new(inner: R, config: RetryConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(per_second);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst)));
        Self {
            inner,
            config,
            limiter,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.backoff;
        let mut last_error = None;

        for attempt_no in 1..=max_attempts {
            // The rate-limit wait counts against the attempt's budget.
            let bounded = async {
                self.limiter.until_ready().await;
                attempt().await
            };
            let outcome = match timeout(self.config.attempt_timeout, bounded).await {
                Ok(result) => result,
                Err(_) => Err(RegistryError::Timeout {
                    operation,
                    after_ms: self.config.attempt_timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(value) => {
                    if attempt_no > 1 {
                        debug!(operation, attempt = attempt_no, "Registry call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempt_no < max_attempts {
                        warn!(operation, attempt = attempt_no, error = %e, "Registry call failed, retrying");
                        sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        error!(operation, attempts = max_attempts, %reason, "Registry unavailable");
        Err(RegistryError::Unavailable { operation, reason })
    }
}

#[async_trait]
impl<R: Registry> Registry for ResilientRegistry<R> {
    async fn find(&self, user_id: UserId) -> Result<Option<UserRecord>, RegistryError> {
        self.call("find", || self.inner.find(user_id)).await
    }

    async fn upsert(&self, record: &UserRecord) -> Result<(), RegistryError> {
        self.call("upsert", || self.inner.upsert(record)).await
    }

    async fn update_field(
        &self,
        user_id: UserId,
        field: RecordField,
        value: &str,
    ) -> Result<(), RegistryError> {
        self.call("update_field", || self.inner.update_field(user_id, field, value))
            .await
    }
}
