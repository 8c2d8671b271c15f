//! Active window storage and rotation.
//!
//! The store owns the single slot pointing at the active [`Window`]. Readers
//! share the slot under a read lock; a caller that finds the window stale
//! drops its read lock, takes the write lock, re-checks, and only then
//! publishes a new window. Both acquisitions are bounded by the configured
//! tolerances and report [`WindowGuardError::Overload`] when they run out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::clock::Clock;
use super::interrupt::Interrupt;
use super::window::{time_block, Window};
use crate::config::LimiterConfig;
use crate::error::{LockStage, Result, WindowGuardError};

/// Longest single wait between interrupt checks.
const WAIT_SLICE: Duration = Duration::from_millis(1);

/// Holds the active window and rotates it at period boundaries.
#[derive(Debug)]
pub struct WindowStore {
    /// The active window
    active: RwLock<Arc<Window>>,
    /// Time source for staleness checks
    clock: Arc<dyn Clock>,
    /// Period length in milliseconds
    period_ms: u64,
    /// Shared lock wait tolerance
    read_tolerance: Duration,
    /// Exclusive lock wait tolerance
    write_tolerance: Duration,
    /// Rotations performed since creation
    rotations: AtomicU64,
}

impl WindowStore {
    /// Create a store whose first window starts now.
    pub fn new(config: &LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let created_at = clock.now_millis();
        Self {
            active: RwLock::new(Arc::new(Window::new(0, created_at))),
            clock,
            period_ms: config.period_ms(),
            read_tolerance: config.read_wait_tolerance(),
            write_tolerance: config.write_wait_tolerance(),
            rotations: AtomicU64::new(0),
        }
    }

    /// Return the window that is current at the time of the call.
    ///
    /// Rotates the active window if its time block has passed. At most one
    /// caller rotates per boundary.
    pub fn current_window(&self, interrupt: Option<&Interrupt>) -> Result<Arc<Window>> {
        {
            let active = acquire(LockStage::Read, self.read_tolerance, interrupt, |wait| {
                self.active.try_read_for(wait)
            })?;
            if !active.is_stale(self.clock.now_millis(), self.period_ms) {
                return Ok(Arc::clone(&active));
            }
        }

        // The read guard is gone; never wait for the write lock while holding it.
        let mut active = acquire(LockStage::Rotate, self.write_tolerance, interrupt, |wait| {
            self.active.try_write_for(wait)
        })?;

        let now = self.clock.now_millis();
        if !active.is_stale(now, self.period_ms) {
            return Ok(Arc::clone(&active));
        }

        let next = Arc::new(Window::new(active.generation() + 1, now));
        debug!(
            previous_created_at = active.created_at_ms(),
            created_at = now,
            generation = next.generation(),
            block = time_block(now, self.period_ms),
            stale_identities = active.identity_count(),
            "Window rotated"
        );
        *active = Arc::clone(&next);
        self.rotations.fetch_add(1, Ordering::Relaxed);

        Ok(next)
    }

    /// The active window as stored, without a staleness check.
    pub fn peek(&self) -> Result<Arc<Window>> {
        let active = acquire(LockStage::Read, self.read_tolerance, None, |wait| {
            self.active.try_read_for(wait)
        })?;
        Ok(Arc::clone(&active))
    }

    /// Number of rotations performed since the store was created.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Period length in milliseconds.
    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Hold the write lock, starving every other caller until the guard drops.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn hold_exclusive(&self) -> parking_lot::RwLockWriteGuard<'_, Arc<Window>> {
        self.active.write()
    }

    /// Hold a read lock, blocking rotation until the guard drops.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn hold_shared(&self) -> parking_lot::RwLockReadGuard<'_, Arc<Window>> {
        self.active.read()
    }
}

/// Run a timed lock attempt within `tolerance`.
///
/// Without an interrupt this is a single timed attempt. With one, the wait is
/// split into short slices so a raised flag is noticed promptly.
fn acquire<G>(
    stage: LockStage,
    tolerance: Duration,
    interrupt: Option<&Interrupt>,
    mut try_for: impl FnMut(Duration) -> Option<G>,
) -> Result<G> {
    let Some(interrupt) = interrupt else {
        return try_for(tolerance).ok_or_else(|| overloaded(stage, tolerance));
    };

    let deadline = Instant::now() + tolerance;
    loop {
        if interrupt.is_raised() {
            debug!(stage = %stage, "Lock wait interrupted");
            return Err(WindowGuardError::InterruptedWait { stage });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(guard) = try_for(remaining.min(WAIT_SLICE)) {
            return Ok(guard);
        }

        if Instant::now() >= deadline {
            return Err(overloaded(stage, tolerance));
        }
    }
}

fn overloaded(stage: LockStage, tolerance: Duration) -> WindowGuardError {
    let tolerance_ms = tolerance.as_millis() as u64;
    warn!(stage = %stage, tolerance_ms, "Lock wait exceeded tolerance");
    WindowGuardError::Overload { stage, tolerance_ms }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::MockClock;

    const START: u64 = 1_000_000;

    fn store_with(config: LimiterConfig) -> (WindowStore, MockClock) {
        let clock = MockClock::new(START);
        let store = WindowStore::new(&config, Arc::new(clock.clone()));
        (store, clock)
    }

    #[test]
    fn test_fresh_window_is_reused() {
        let (store, clock) = store_with(LimiterConfig::new(10, 2));

        let first = store.current_window(None).unwrap();
        clock.advance(Duration::from_millis(1_999));
        let second = store.current_window(None).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.rotations(), 0);
    }

    #[test]
    fn test_stale_window_is_replaced() {
        let (store, clock) = store_with(LimiterConfig::new(10, 2));

        let first = store.current_window(None).unwrap();
        first.increment("s1");
        clock.advance(Duration::from_millis(2_000));
        let second = store.current_window(None).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(second.created_at_ms(), START + 2_000);
        assert_eq!(second.count("s1"), None);
        assert_eq!(store.rotations(), 1);
    }

    #[test]
    fn test_superseded_window_keeps_counting() {
        let (store, clock) = store_with(LimiterConfig::new(10, 1));

        let old = store.current_window(None).unwrap();
        old.increment("late");
        clock.advance(Duration::from_secs(1));
        let _ = store.current_window(None).unwrap();

        // A late holder still sees its own counts, untouched by rotation.
        assert_eq!(old.increment("late"), 2);
        assert_eq!(store.peek().unwrap().count("late"), None);
    }

    #[test]
    fn test_read_overload_when_exclusively_held() {
        let (store, _clock) = store_with(LimiterConfig::new(10, 2).with_tolerances(5, 5));

        let _held = store.hold_exclusive();
        let err = store.current_window(None).unwrap_err();

        assert!(matches!(
            err,
            WindowGuardError::Overload { stage: LockStage::Read, tolerance_ms: 5 }
        ));
    }

    #[test]
    fn test_rotate_overload_when_shared_lock_is_held() {
        let (store, clock) = store_with(LimiterConfig::new(10, 2).with_tolerances(50, 5));
        clock.advance(Duration::from_secs(2));

        let _held = store.hold_shared();
        let err = store.current_window(None).unwrap_err();

        assert!(matches!(
            err,
            WindowGuardError::Overload { stage: LockStage::Rotate, .. }
        ));
        assert_eq!(store.rotations(), 0);
    }

    #[test]
    fn test_raised_interrupt_fails_without_waiting() {
        let (store, _clock) = store_with(LimiterConfig::new(10, 2));
        let interrupt = Interrupt::new();
        interrupt.raise();

        let err = store.current_window(Some(&interrupt)).unwrap_err();
        assert!(matches!(
            err,
            WindowGuardError::InterruptedWait { stage: LockStage::Read }
        ));
    }

    #[test]
    fn test_interrupt_unblocks_pending_wait() {
        let (store, _clock) =
            store_with(LimiterConfig::new(10, 2).with_tolerances(10_000, 10_000));
        let interrupt = Interrupt::new();

        let held = store.hold_exclusive();
        let started = Instant::now();
        let result = std::thread::scope(|s| {
            let waiter = s.spawn(|| store.current_window(Some(&interrupt)));
            std::thread::sleep(Duration::from_millis(20));
            interrupt.raise();
            waiter.join().unwrap()
        });
        drop(held);

        assert!(matches!(
            result,
            Err(WindowGuardError::InterruptedWait { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_interrupt_during_rotation_wait() {
        let (store, clock) =
            store_with(LimiterConfig::new(10, 2).with_tolerances(10_000, 10_000));
        let interrupt = Interrupt::new();
        clock.advance(Duration::from_secs(2));

        // A held read lock lets the caller see the stale window but not replace it.
        let held = store.hold_shared();
        let result = std::thread::scope(|s| {
            let waiter = s.spawn(|| store.current_window(Some(&interrupt)));
            std::thread::sleep(Duration::from_millis(50));
            interrupt.raise();
            waiter.join().unwrap()
        });
        drop(held);

        assert!(matches!(
            result,
            Err(WindowGuardError::InterruptedWait { stage: LockStage::Rotate })
        ));
        assert_eq!(store.rotations(), 0);
        assert_eq!(store.peek().unwrap().generation(), 0);
    }

    #[test]
    fn test_interruptible_wait_without_contention() {
        let (store, _clock) = store_with(LimiterConfig::new(10, 2));
        let interrupt = Interrupt::new();

        assert!(store.current_window(Some(&interrupt)).is_ok());
    }

    #[test]
    fn test_single_rotation_under_race() {
        let (store, clock) = store_with(LimiterConfig::new(10, 2).with_tolerances(1_000, 1_000));
        clock.advance(Duration::from_secs(2));

        let generations: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..32)
                .map(|_| s.spawn(|| store.current_window(None).unwrap().generation()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(generations.iter().all(|g| *g == 1));
        assert_eq!(store.rotations(), 1);
    }
}
