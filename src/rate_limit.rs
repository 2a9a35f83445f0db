/// Attempt limiting for credential endpoints
///
/// Login and reset-confirm attempts are limited per username so that a
/// single account cannot be brute-forced regardless of where the requests
/// come from.
use crate::{
    config::RateLimitConfig,
    error::{AuthError, AuthResult},
    metrics,
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

/// Keyed attempt limiter
#[derive(Clone)]
pub struct AttemptLimiter {
    enabled: bool,
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
    clock: DefaultClock,
}

impl AttemptLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(config.attempts_per_minute).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN));

        Self {
            enabled: config.enabled,
            limiter: Arc::new(GovernorLimiter::keyed(quota)),
            clock: DefaultClock::default(),
        }
    }

    /// Count one `action` attempt against `key`
    pub fn check(&self, action: &str, key: &str) -> AuthResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let bucket = format!("{}:{}", action, key.to_lowercase());
        match self.limiter.check_key(&bucket) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                metrics::record_rate_limited(action);
                tracing::warn!("Rate limit hit for {} on {}", action, key);
                Err(AuthError::RateLimitExceeded {
                    retry_after: not_until.wait_time_from(self.clock.now()),
                })
            }
        }
    }

    /// Forget keys whose buckets have fully refilled
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}
