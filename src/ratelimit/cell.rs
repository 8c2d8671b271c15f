//! Install-once handle for a limiter shared across call sites.

use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use super::limiter::{Admission, RateLimiter};
use crate::config::{ConfigProvider, LimiterConfig};
use crate::error::{Result, WindowGuardError};

/// Holds at most one [`RateLimiter`], installed by the first successful
/// [`LimiterCell::initialize`].
///
/// Build one cell at startup and pass it (or an `Arc` of it) to every call
/// site that must share the same limits.
#[derive(Debug, Default)]
pub struct LimiterCell {
    limiter: OnceLock<Arc<RateLimiter>>,
}

impl LimiterCell {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a limiter built from `provider`.
    ///
    /// Returns `Ok(true)` if this call installed it and `Ok(false)` if a
    /// limiter was already installed. Safe to race: exactly one caller wins.
    /// A provider with invalid values only yields an error while the cell is
    /// still empty; once another caller has won, the answer is `Ok(false)`.
    pub fn initialize<P: ConfigProvider + ?Sized>(&self, provider: &P) -> Result<bool> {
        if self.is_initialized() {
            return Ok(false);
        }
        match RateLimiter::from_provider(provider) {
            Ok(limiter) => self.install(limiter),
            Err(_) if self.is_initialized() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Install an already built limiter, with the same semantics as
    /// [`LimiterCell::initialize`].
    pub fn install(&self, limiter: RateLimiter) -> Result<bool> {
        let config: LimiterConfig = limiter.config().clone();
        match self.limiter.set(Arc::new(limiter)) {
            Ok(()) => {
                info!(
                    limit = config.limit,
                    period_secs = config.period_secs,
                    read_wait_tolerance_ms = config.read_wait_tolerance_ms,
                    write_wait_tolerance_ms = config.write_wait_tolerance_ms,
                    "Rate limiter installed"
                );
                Ok(true)
            }
            Err(_) => {
                debug!("Rate limiter already installed");
                Ok(false)
            }
        }
    }

    /// The installed limiter.
    pub fn instance(&self) -> Result<Arc<RateLimiter>> {
        self.limiter
            .get()
            .cloned()
            .ok_or(WindowGuardError::NotInitialized)
    }

    /// Whether a limiter has been installed.
    pub fn is_initialized(&self) -> bool {
        self.limiter.get().is_some()
    }

    /// Admission check against the installed limiter as a flat outcome.
    pub fn check(&self, identity: &str) -> Admission {
        match self.limiter.get() {
            Some(limiter) => limiter.check(identity),
            None => Admission::NotInitialized,
        }
    }
}
