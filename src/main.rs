use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use windowguard::driver::{align_to_period, run_load, LoadPlan};
use windowguard::{Admitter, LimiterCell, LimiterConfig};

/// Drive a windowguard limiter with concurrent sessions and report how
/// admissions were distributed across time blocks.
#[derive(Debug, Parser)]
#[command(name = "windowguard", version, about)]
struct Args {
    /// YAML configuration file; WINDOWGUARD_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of distinct session identities
    #[arg(long, default_value_t = 50)]
    sessions: usize,

    /// Concurrent callers per session
    #[arg(long, default_value_t = 10)]
    threads_per_session: usize,

    /// Requests per caller, as a multiple of the configured limit
    #[arg(long, default_value_t = 5)]
    multiplier: usize,

    /// Number of runs, each started on a period boundary
    #[arg(long, default_value_t = 3)]
    runs: usize,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting windowguard load driver");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = LimiterConfig::load(args.config.as_deref())?;
    info!(
        limit = config.limit,
        period_secs = config.period_secs,
        "Configuration loaded"
    );

    let cell = LimiterCell::new();
    cell.initialize(&config)?;
    let limiter = cell.instance()?;
    let admitter: Arc<dyn Admitter> = limiter.clone();

    let plan = LoadPlan {
        sessions: args.sessions,
        threads_per_session: args.threads_per_session,
        requests_per_thread: requests_per_thread(config.limit, args.multiplier)?,
    };
    info!(
        sessions = plan.sessions,
        threads_per_session = plan.threads_per_session,
        requests_per_thread = plan.requests_per_thread,
        "Load plan"
    );

    let period_ms = config.period_ms();
    let mut violations = 0usize;

    for run in 0..args.runs {
        align_to_period(config.period_secs).await;
        info!(run, "Run started");

        let report = run_load(Arc::clone(&admitter), plan).await?;

        for session in report.slow_sessions(period_ms) {
            info!(
                identity = %session.identity,
                blocks = session.blocks(period_ms),
                allowed = session.allowed,
                denied = session.denied,
                "Session spanned several time blocks"
            );
        }

        for session in &report.sessions {
            if !session.respects_limit(config.limit, period_ms) {
                violations += 1;
                warn!(
                    identity = %session.identity,
                    allowed = session.allowed,
                    blocks = session.blocks(period_ms),
                    limit = config.limit,
                    "Session exceeded its limit"
                );
            }
            if session.failed > 0 {
                warn!(
                    identity = %session.identity,
                    failed = session.failed,
                    "Session saw overloaded checks"
                );
            }
        }

        info!(
            run,
            elapsed_ms = report.elapsed.as_millis() as u64,
            throughput = report.throughput() as u64,
            slow_sessions = report.slow_sessions(period_ms).count(),
            rotations = limiter.rotations(),
            "Run complete"
        );
    }

    if violations > 0 {
        anyhow::bail!("{} session(s) exceeded the configured limit", violations);
    }

    info!("windowguard load driver finished");
    Ok(())
}

/// Requests each caller issues: the configured limit times the multiplier.
fn requests_per_thread(limit: u64, multiplier: usize) -> anyhow::Result<usize> {
    usize::try_from(limit)
        .context("limit does not fit in usize on this platform")?
        .checked_mul(multiplier)
        .with_context(|| format!("limit {} times multiplier {} overflows", limit, multiplier))
}
