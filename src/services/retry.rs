//! Bounded retry with exponential backoff and jitter.
//!
//! Only failures classified transient consume retry budget; permanent
//! failures propagate immediately. The delay before attempt k (k ≥ 1,
//! after the first failure) is `base_delay · 2^(k-1)` plus a uniform
//! [0,1) base-delay jitter, bounding synchronized retry storms.

use std::time::Duration;

use rand::Rng;

use crate::config::Settings;

use super::ServiceError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.retry_max_attempts,
            base_delay: Duration::from_secs_f64(settings.retry_base_delay_secs),
        }
    }

    fn delay_before_attempt(&self, next_attempt: u32) -> Duration {
        let exponent = next_attempt.saturating_sub(2).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        let jitter = self.base_delay.mul_f64(rand::thread_rng().gen_range(0.0..1.0));
        backoff + jitter
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Run `call`, retrying transient failures up to the policy's budget.
///
/// Fails with [`ServiceError::ExhaustedRetries`] only after `max_attempts`
/// consecutive transient failures; anything else propagates untouched.
pub fn with_retry<T, F>(policy: &RetryPolicy, label: &str, mut call: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Result<T, ServiceError>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call() {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() => {
                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        %label,
                        attempts = attempt,
                        last_error = %error,
                        "Retry budget exhausted"
                    );
                    return Err(ServiceError::ExhaustedRetries {
                        attempts: attempt,
                        last: error.to_string(),
                    });
                }
                let delay = policy.delay_before_attempt(attempt + 1);
                tracing::debug!(
                    %label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure — backing off"
                );
                std::thread::sleep(delay);
            }
            Err(error) => return Err(error),
        }
    }
}
