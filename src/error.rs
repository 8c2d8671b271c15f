//! Error types for windowguard.

use std::fmt;

use thiserror::Error;

/// The lock acquisition a failed wait belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStage {
    /// Shared acquisition used to read the active window.
    Read,
    /// Exclusive acquisition used to rotate a stale window.
    Rotate,
}

impl fmt::Display for LockStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStage::Read => f.write_str("read"),
            LockStage::Rotate => f.write_str("rotate"),
        }
    }
}

/// Main error type for windowguard operations.
///
/// A plain allow/deny decision is never an error; these variants only
/// describe why no decision could be made.
#[derive(Error, Debug)]
pub enum WindowGuardError {
    /// A bounded lock wait ran past its tolerance.
    #[error("Overloaded: {stage} lock not acquired within {tolerance_ms}ms")]
    Overload { stage: LockStage, tolerance_ms: u64 },

    /// The caller was interrupted while waiting on a lock.
    #[error("Interrupted while waiting for the {stage} lock")]
    InterruptedWait { stage: LockStage },

    /// The shared limiter was requested before it was installed.
    #[error("Rate limiter was not initialized")]
    NotInitialized,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WindowGuardError {
    /// Whether this error reports lock contention past a tolerance.
    pub fn is_overload(&self) -> bool {
        matches!(self, WindowGuardError::Overload { .. })
    }
}

impl From<::config::ConfigError> for WindowGuardError {
    fn from(err: ::config::ConfigError) -> Self {
        WindowGuardError::Config(err.to_string())
    }
}

/// Result type alias for windowguard operations.
pub type Result<T> = std::result::Result<T, WindowGuardError>;
