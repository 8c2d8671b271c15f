//! Cancellation flag for callers blocked on a window lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable flag another thread can raise to abandon a pending lock wait.
///
/// All clones share the same flag. Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    raised: Arc<AtomicBool>,
}

impl Interrupt {
    /// Create a flag that is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag, waking any waiter at its next check.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Whether the flag has been raised.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
