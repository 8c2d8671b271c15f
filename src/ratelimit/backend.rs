//! Admission trait for abstracting limiter implementations.

use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// Call sites that only need a decision can hold a `dyn Admitter` instead of
/// a concrete [`RateLimiter`](super::RateLimiter).
pub trait Admitter: Send + Sync {
    /// Count one request for `identity` and decide whether it is admitted.
    fn is_allowed(&self, identity: &str) -> Result<bool>;

    /// Period length in seconds.
    fn period(&self) -> u64;

    /// Admissions allowed per identity per period.
    fn limit(&self) -> u64;
}
