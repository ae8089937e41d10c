use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratekeeper::config::RatekeeperConfig;
use ratekeeper::ratelimit::{RateLimitInfo, RateLimiter};
use ratekeeper::{CancellationToken, RatekeeperError};

/// Drive a configured limiter with simulated concurrent load.
#[derive(Debug, Parser)]
#[command(name = "ratekeeper", version, about)]
struct Args {
    /// Limiter configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Name of the limiter to exercise; optional when only one is configured
    #[arg(short, long)]
    limiter: Option<String>,

    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// How long to run, in milliseconds
    #[arg(short, long, default_value_t = 5_000)]
    duration_ms: u64,

    /// Per-request acquisition timeout, in milliseconds
    #[arg(short, long, default_value_t = 100)]
    timeout_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Default)]
struct Tally {
    granted: AtomicU64,
    denied: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    limiter: &'a str,
    algorithm: &'a str,
    workers: usize,
    elapsed_ms: u64,
    granted: u64,
    denied: u64,
    cancelled: u64,
    info: RateLimitInfo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!("Starting Ratekeeper load driver");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = RatekeeperConfig::from_file(&args.config)?;
    let (name, spec) = config.limiter(args.limiter.as_deref())?;
    let limiter = spec.build()?;
    info!(
        limiter = name,
        algorithm = spec.algorithm(),
        limit = limiter.limit(),
        "Limiter initialized"
    );

    let cancel = CancellationToken::new();
    let tally = Arc::new(Tally::default());
    let timeout = Duration::from_millis(args.timeout_ms);
    let start = Instant::now();

    let mut handles = Vec::with_capacity(args.workers);
    for worker in 0..args.workers {
        let limiter = Arc::clone(&limiter);
        let cancel = cancel.clone();
        let tally = Arc::clone(&tally);
        handles.push(tokio::task::spawn_blocking(move || {
            run_worker(worker, limiter.as_ref(), timeout, &cancel, &tally)
        }));
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(args.duration_ms)) => {
            info!("Run duration elapsed");
        }
        _ = shutdown_signal() => {}
    }
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Worker task failed");
        }
    }

    let report = Report {
        limiter: name,
        algorithm: spec.algorithm(),
        workers: args.workers,
        elapsed_ms: start.elapsed().as_millis() as u64,
        granted: tally.granted.load(Ordering::Relaxed),
        denied: tally.denied.load(Ordering::Relaxed),
        cancelled: tally.cancelled.load(Ordering::Relaxed),
        info: limiter.info(),
    };
    print_report(&report, args.json)?;

    info!("Ratekeeper load driver stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Acquire one permit at a time until cancelled.
fn run_worker(
    worker: usize,
    limiter: &dyn RateLimiter,
    timeout: Duration,
    cancel: &CancellationToken,
    tally: &Tally,
) {
    let mut rng = rand::thread_rng();
    loop {
        match limiter.try_acquire_for(1, timeout, cancel) {
            Ok(true) => {
                tally.granted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                tally.denied.fetch_add(1, Ordering::Relaxed);
            }
            Err(RatekeeperError::Cancelled) => {
                tally.cancelled.fetch_add(1, Ordering::Relaxed);
                break;
            }
            Err(e) => {
                warn!(worker = worker, error = %e, "Worker stopped");
                break;
            }
        }

        // Simulated work between requests
        let jitter = Duration::from_micros(rng.gen_range(0..2_000));
        if cancel.sleep(jitter) {
            break;
        }
    }
}

fn print_report(report: &Report<'_>, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("limiter:    {} ({})", report.limiter, report.algorithm);
    println!("workers:    {}", report.workers);
    println!("elapsed:    {} ms", report.elapsed_ms);
    println!("granted:    {}", report.granted);
    println!("denied:     {}", report.denied);
    println!("cancelled:  {}", report.cancelled);
    println!(
        "remaining:  {}/{} (resets in {} ms)",
        report.info.remaining,
        report.info.limit,
        report.info.time_until_reset(Instant::now()).as_millis()
    );
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping workers");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping workers");
        }
    }
}
