//! Load generation against a shared limiter.
//!
//! Spawns a fixed number of callers per session identity, each issuing a run
//! of admission checks, and folds the results into per-session statistics.
//! Used by the `windowguard` binary and by the concurrency tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ratelimit::{time_block, Admitter, Clock, SystemClock};

/// Shape of one load run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPlan {
    /// Distinct identities, named `"0"`, `"1"`, ...
    pub sessions: usize,
    /// Concurrent callers sharing each identity
    pub threads_per_session: usize,
    /// Admission checks issued by each caller
    pub requests_per_thread: usize,
}

impl LoadPlan {
    /// Total admission checks issued by the plan.
    pub fn total_requests(&self) -> usize {
        self.sessions * self.threads_per_session * self.requests_per_thread
    }
}

/// Outcome counts for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// The identity the checks were issued for
    pub identity: String,
    /// Checks that were admitted
    pub allowed: u64,
    /// Checks that were denied by the limit
    pub denied: u64,
    /// Checks that failed with overload or interruption
    pub failed: u64,
    /// Wall-clock time of the first check, in ms since the Unix epoch
    pub first_call_ms: u64,
    /// Wall-clock time of the last check, in ms since the Unix epoch
    pub last_call_ms: u64,
}

impl SessionStats {
    /// Number of period-aligned time blocks the checks spanned.
    ///
    /// The wall clock can step backwards mid-run, so the span is taken in
    /// either direction.
    pub fn blocks(&self, period_ms: u64) -> u64 {
        time_block(self.last_call_ms, period_ms)
            .abs_diff(time_block(self.first_call_ms, period_ms))
            .saturating_add(1)
    }

    /// Whether admissions stayed within `limit` for every block spanned.
    pub fn respects_limit(&self, limit: u64, period_ms: u64) -> bool {
        self.allowed <= limit.saturating_mul(self.blocks(period_ms))
    }

    /// Fold another caller's stats for the same identity into this one.
    pub fn merge(&mut self, other: &SessionStats) {
        self.allowed += other.allowed;
        self.denied += other.denied;
        self.failed += other.failed;
        self.first_call_ms = self.first_call_ms.min(other.first_call_ms);
        self.last_call_ms = self.last_call_ms.max(other.last_call_ms);
    }
}

/// Issue `requests` admission checks for `identity` from the current thread.
pub fn run_session(
    admitter: &dyn Admitter,
    clock: &dyn Clock,
    identity: &str,
    requests: usize,
) -> SessionStats {
    let first_call_ms = clock.now_millis();
    let mut stats = SessionStats {
        identity: identity.to_string(),
        allowed: 0,
        denied: 0,
        failed: 0,
        first_call_ms,
        last_call_ms: first_call_ms,
    };

    for _ in 0..requests {
        match admitter.is_allowed(identity) {
            Ok(true) => stats.allowed += 1,
            Ok(false) => stats.denied += 1,
            Err(_) => stats.failed += 1,
        }
    }

    stats.last_call_ms = clock.now_millis();
    stats
}

/// Results of a load run, one entry per identity.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Per-identity statistics, ordered by identity
    pub sessions: Vec<SessionStats>,
    /// Wall time the run took
    pub elapsed: Duration,
}

impl LoadReport {
    /// Admission checks issued per second.
    pub fn throughput(&self) -> f64 {
        let total: u64 = self
            .sessions
            .iter()
            .map(|s| s.allowed + s.denied + s.failed)
            .sum();
        total as f64 / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }

    /// Sessions whose checks spilled over more than one time block.
    pub fn slow_sessions(&self, period_ms: u64) -> impl Iterator<Item = &SessionStats> {
        self.sessions.iter().filter(move |s| s.blocks(period_ms) > 1)
    }
}

/// Run `plan` against `admitter`, one blocking task per caller.
pub async fn run_load(admitter: Arc<dyn Admitter>, plan: LoadPlan) -> Result<LoadReport> {
    let started = Instant::now();

    let handles: Vec<_> = (0..plan.sessions)
        .flat_map(|session| (0..plan.threads_per_session).map(move |_| session))
        .map(|session| {
            let admitter = Arc::clone(&admitter);
            tokio::task::spawn_blocking(move || {
                run_session(
                    admitter.as_ref(),
                    &SystemClock::new(),
                    &session.to_string(),
                    plan.requests_per_thread,
                )
            })
        })
        .collect();

    let mut merged: BTreeMap<String, SessionStats> = BTreeMap::new();
    for result in futures::future::join_all(handles).await {
        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Load worker failed");
                continue;
            }
        };
        match merged.get_mut(&stats.identity) {
            Some(existing) => existing.merge(&stats),
            None => {
                merged.insert(stats.identity.clone(), stats);
            }
        }
    }

    let report = LoadReport {
        sessions: merged.into_values().collect(),
        elapsed: started.elapsed(),
    };
    debug!(
        sessions = report.sessions.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Load run finished"
    );
    Ok(report)
}

/// Sleep until the start of the next `period_secs`-aligned time block.
pub async fn align_to_period(period_secs: u64) {
    let period_ms = period_secs.saturating_mul(1000).max(1);
    let now = SystemClock::new().now_millis();
    let wait = period_ms - now % period_ms;
    info!(wait_ms = wait, "Waiting for the next period boundary");
    tokio::time::sleep(Duration::from_millis(wait)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use crate::ratelimit::{MockClock, RateLimiter};

    fn stats(allowed: u64, first: u64, last: u64) -> SessionStats {
        SessionStats {
            identity: "s".to_string(),
            allowed,
            denied: 0,
            failed: 0,
            first_call_ms: first,
            last_call_ms: last,
        }
    }

    #[test]
    fn test_blocks_spanned() {
        assert_eq!(stats(0, 2_000, 3_999).blocks(2_000), 1);
        assert_eq!(stats(0, 3_999, 4_000).blocks(2_000), 2);
        assert_eq!(stats(0, 1_000, 9_000).blocks(2_000), 5);
    }

    #[test]
    fn test_blocks_when_clock_steps_back() {
        let session = stats(5, 4_000, 3_999);
        assert_eq!(session.blocks(2_000), 2);
        assert!(session.respects_limit(5, 2_000));
        assert_eq!(stats(0, 0, u64::MAX).blocks(1), u64::MAX);
        assert!(stats(1, 0, u64::MAX).respects_limit(u64::MAX, 1));
    }

    #[test]
    fn test_respects_limit_scales_with_blocks() {
        assert!(stats(10, 0, 100).respects_limit(10, 1_000));
        assert!(!stats(11, 0, 100).respects_limit(10, 1_000));
        assert!(stats(20, 0, 1_500).respects_limit(10, 1_000));
    }

    #[test]
    fn test_merge() {
        let mut a = stats(3, 100, 200);
        a.denied = 1;
        let mut b = stats(2, 50, 150);
        b.failed = 4;

        a.merge(&b);
        assert_eq!(a.allowed, 5);
        assert_eq!(a.denied, 1);
        assert_eq!(a.failed, 4);
        assert_eq!(a.first_call_ms, 50);
        assert_eq!(a.last_call_ms, 200);
    }

    #[test]
    fn test_run_session_counts_outcomes() {
        let clock = MockClock::new(0);
        let limiter =
            RateLimiter::with_clock(LimiterConfig::new(4, 1), Arc::new(clock.clone())).unwrap();

        let result = run_session(&limiter, &clock, "s1", 10);
        assert_eq!(result.allowed, 4);
        assert_eq!(result.denied, 6);
        assert_eq!(result.failed, 0);
    }

    #[test]
    fn test_plan_totals() {
        let plan = LoadPlan {
            sessions: 3,
            threads_per_session: 4,
            requests_per_thread: 5,
        };
        assert_eq!(plan.total_requests(), 60);
    }

    #[tokio::test]
    async fn test_run_load_merges_sessions() {
        let clock = MockClock::new(0);
        let limiter: Arc<dyn Admitter> = Arc::new(
            RateLimiter::with_clock(LimiterConfig::new(5, 60), Arc::new(clock)).unwrap(),
        );
        let plan = LoadPlan {
            sessions: 4,
            threads_per_session: 3,
            requests_per_thread: 10,
        };

        let report = tokio_test::assert_ok!(run_load(limiter, plan).await);

        assert_eq!(report.sessions.len(), 4);
        for session in &report.sessions {
            assert_eq!(session.allowed, 5);
            assert_eq!(session.denied, 25);
        }
        assert!(report.throughput() > 0.0);
    }
}
