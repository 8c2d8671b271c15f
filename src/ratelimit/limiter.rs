//! Core rate limiter implementation.

use std::sync::Arc;

use tracing::trace;

use super::clock::{Clock, SystemClock};
use super::interrupt::Interrupt;
use super::store::WindowStore;
use crate::config::{ConfigProvider, LimiterConfig};
use crate::error::{Result, WindowGuardError};

/// Outcome of one admission check, with the failure paths flattened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Within the limit for the current window
    Allowed,
    /// Over the limit for the current window
    Denied,
    /// A lock wait ran past its tolerance
    Overloaded,
    /// The caller was interrupted while waiting on a lock
    Interrupted,
    /// No shared limiter has been installed
    NotInitialized,
    /// Any other failure; not a contention signal, so not worth retrying
    Failed,
}

impl Admission {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

impl From<Result<bool>> for Admission {
    fn from(result: Result<bool>) -> Self {
        match result {
            Ok(true) => Admission::Allowed,
            Ok(false) => Admission::Denied,
            Err(WindowGuardError::Overload { .. }) => Admission::Overloaded,
            Err(WindowGuardError::InterruptedWait { .. }) => Admission::Interrupted,
            Err(WindowGuardError::NotInitialized) => Admission::NotInitialized,
            Err(WindowGuardError::Config(_) | WindowGuardError::Io(_)) => Admission::Failed,
        }
    }
}

/// Per-identity fixed-window rate limiter.
///
/// This struct is thread-safe; share one instance (usually behind an `Arc`)
/// between every caller that must observe the same limits.
#[derive(Debug)]
pub struct RateLimiter {
    /// Configuration snapshot taken at construction
    config: LimiterConfig,
    /// Active window and rotation state
    store: WindowStore,
}

impl RateLimiter {
    /// Create a rate limiter reading the system clock.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a rate limiter from any configuration provider.
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        Self::new(LimiterConfig::from_provider(provider))
    }

    /// Create a rate limiter with an explicit time source.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let store = WindowStore::new(&config, clock);
        Ok(Self { config, store })
    }

    /// Count one request for `identity` and decide whether it is admitted.
    ///
    /// Returns `Ok(false)` once the identity has used up its limit in the
    /// current window. Errors only when a lock wait runs out.
    pub fn is_allowed(&self, identity: &str) -> Result<bool> {
        self.admit(identity, None)
    }

    /// Like [`RateLimiter::is_allowed`], but gives up with
    /// [`WindowGuardError::InterruptedWait`] once `interrupt` is raised.
    pub fn is_allowed_interruptible(&self, identity: &str, interrupt: &Interrupt) -> Result<bool> {
        self.admit(identity, Some(interrupt))
    }

    /// Admission check reported as a flat outcome.
    pub fn check(&self, identity: &str) -> Admission {
        self.is_allowed(identity).into()
    }

    fn admit(&self, identity: &str, interrupt: Option<&Interrupt>) -> Result<bool> {
        let window = self.store.current_window(interrupt)?;
        let count = window.increment(identity);
        let allowed = count <= self.config.limit;

        trace!(
            identity = %identity,
            count,
            limit = self.config.limit,
            generation = window.generation(),
            allowed,
            "Admission check"
        );

        Ok(allowed)
    }

    /// Admissions allowed per identity per period.
    pub fn limit(&self) -> u64 {
        self.config.limit
    }

    /// Period length in seconds.
    pub fn period(&self) -> u64 {
        self.config.period_secs
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Requests counted for `identity` in the stored window, zero if none.
    ///
    /// Does not rotate, so after a boundary this still reports the old window
    /// until the next admission check.
    pub fn count(&self, identity: &str) -> Result<u64> {
        Ok(self.store.peek()?.count(identity).unwrap_or(0))
    }

    /// Creation time of the stored window in milliseconds since the Unix epoch.
    pub fn window_created_at(&self) -> Result<u64> {
        Ok(self.store.peek()?.created_at_ms())
    }

    /// Number of window rotations performed so far.
    pub fn rotations(&self) -> u64 {
        self.store.rotations()
    }

    /// The underlying window store.
    pub fn store(&self) -> &WindowStore {
        &self.store
    }
}

impl super::backend::Admitter for RateLimiter {
    fn is_allowed(&self, identity: &str) -> Result<bool> {
        RateLimiter::is_allowed(self, identity)
    }

    fn period(&self) -> u64 {
        RateLimiter::period(self)
    }

    fn limit(&self) -> u64 {
        RateLimiter::limit(self)
    }
}
