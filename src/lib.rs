//! Windowguard - in-process fixed-window rate limiting
//!
//! This crate decides, per identity, whether a request fits within `limit`
//! admissions for the current `period`-second time block. Counters live in a
//! shared window that is swapped out at block boundaries; lock waits are
//! bounded and report overload instead of blocking indefinitely.

pub mod config;
pub mod driver;
pub mod error;
pub mod ratelimit;

pub use config::{ConfigProvider, LimiterConfig};
pub use error::{LockStage, Result, WindowGuardError};
pub use ratelimit::{Admission, Admitter, Interrupt, LimiterCell, RateLimiter};
