//! rewire-daemon - expectation verifier daemon.
//!
//! Hosts the three long-lived pieces: the SQLite store, the HTTP surface
//! that receives observations and admin commands, and the checker loop that
//! reconciles the violation ledger against the rule evaluator.
//!
//! Shutdown is cooperative. SIGINT/SIGTERM flip a watch flag; the HTTP
//! server stops accepting, the checker finishes the expectation it is on,
//! and the process exits 0. Fatal init failures (unreadable store, invalid
//! flags) exit 1 before anything is served.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rewire_core::SystemClock;
use rewire_daemon::checker::CheckerLoop;
use rewire_daemon::config::{build_notifier_stack, Args, DaemonConfig};
use rewire_daemon::http::{self, ApiContext};
use rewire_daemon::invariants;
use rewire_daemon::reconciler::{Reconciler, ReconcilerConfig};
use rewire_daemon::store::Store;
use rewire_daemon::trials::TrialManager;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = DaemonConfig::from_args(&args).context("invalid configuration")?;

    let clock = Arc::new(SystemClock);
    let store = Store::open(&config.db_path, clock.clone())
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;

    if args.verify_invariants {
        return run_invariant_audit(&store);
    }

    let notifier = Arc::new(build_notifier_stack(&args)?);
    let trials = TrialManager::new(store.clone(), &config.base_url);
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        trials.clone(),
        notifier,
        clock,
        ReconcilerConfig {
            renotify_after_s: config.renotify_after_s,
            delivery_deadline: config.delivery_deadline(),
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let checker = CheckerLoop::new(
        store.clone(),
        reconciler,
        config.check_every,
        shutdown_rx.clone(),
    );
    let checker_handle = tokio::spawn(checker.run());

    let ctx = Arc::new(ApiContext {
        store,
        trials,
        admin_token: config.admin_token,
        base_url: config.base_url.clone(),
    });
    let app = http::router(ctx);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, base_url = %config.base_url, "rewire listening");

    let mut signal_rx = shutdown_rx;
    tokio::spawn(handle_signals(shutdown_tx));

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // Wait for the shutdown flag to flip.
            while !*signal_rx.borrow() {
                if signal_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("http server failed")?;

    // The server has drained; wait for the checker to finish its current
    // expectation.
    if let Err(e) = checker_handle.await {
        error!(error = %e, "checker task panicked");
    }

    info!("clean shutdown");
    Ok(())
}

/// Flip the shutdown flag on SIGINT or SIGTERM.
async fn handle_signals(shutdown_tx: watch::Sender<bool>) {
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
    }
    let _ = shutdown_tx.send(true);
}

/// Run the ledger audit and exit 0/1 on pass/fail.
fn run_invariant_audit(store: &Store) -> Result<()> {
    let reports = invariants::audit(store, &SystemClock)?;
    let (passed, failed) = invariants::tally(&reports);

    println!("Invariant check: {passed} passed, {failed} failed");
    for report in &reports {
        if !report.passed {
            println!("  [FAIL] {}: {}", report.name, report.message);
            if let Some(evidence) = &report.evidence {
                println!("         evidence: {evidence}");
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
