/// Time source for expiry decisions
///
/// Every validity window (one-time codes, temporary passwords, sessions) is
/// computed from a `Clock` so expiry can be exercised without sleeping.
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

pub trait Clock: Send + Sync {
    /// Current absolute instant in UTC
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Instant `ttl` after `now`, rejecting lifetimes past the representable range
pub fn expires_after(now: DateTime<Utc>, ttl: Duration) -> AuthResult<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Validation(format!("Lifetime {} is out of range", ttl)))
}
