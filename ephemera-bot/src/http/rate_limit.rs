use std::time::Duration;

use http::{StatusCode, header::RETRY_AFTER};
use metrics::counter;
use serde::Deserialize;
use shared::config::RateLimitConfig;
use tracing::warn;

use super::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::error::{BotError, BotResult};

const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Bounds on the per-call 429 retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed to come back rate limited before giving up; zero
    /// never gives up.
    pub max_attempts: u32,
    /// Clamp applied to each server supplied delay.
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// Wraps a transport so callers never observe a 429.
///
/// Each call owns its backoff; concurrent calls wait independently.
#[derive(Debug, Clone)]
pub struct RateLimitedClient<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: HttpTransport> RateLimitedClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `request`, re-issuing it after every rate-limited response.
    ///
    /// # Errors
    /// Transport failures are returned as-is; [`BotError::RetriesExhausted`]
    /// is returned once the policy's attempt budget is spent.
    pub async fn send(&self, request: &ApiRequest) -> BotResult<ApiResponse> {
        let mut attempts = 0_u32;

        loop {
            let response = self.transport.execute(request).await?;
            if response.status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            attempts = attempts.saturating_add(1);
            if self.policy.exhausted(attempts) {
                return Err(BotError::RetriesExhausted {
                    method: request.method.clone(),
                    path: request.path.clone(),
                    attempts,
                });
            }

            let delay = retry_after(&response).min(self.policy.max_retry_after);
            counter!("ephemera_rate_limit_retries_total").increment(1);
            warn!(
                method = %request.method,
                path = %request.path,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "rate limited; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Delay requested by a 429: the `Retry-After` header, then the JSON body's
/// `retry_after`, then one second.
pub fn retry_after(response: &ApiResponse) -> Duration {
    let from_header = response
        .headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok());

    let from_body = || {
        response
            .json::<RateLimitBody>()
            .ok()
            .map(|body| body.retry_after)
    };

    from_header
        .or_else(from_body)
        .and_then(seconds_to_duration)
        .unwrap_or(FALLBACK_RETRY_AFTER)
}

/// Negative and NaN values are rejected; values too large for a
/// [`Duration`] saturate so the policy clamp still applies.
fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    if seconds.is_nan() || seconds < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
}
