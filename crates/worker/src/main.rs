//! `skystack-worker` -- calibration and master stacking driver.
//!
//! ```text
//! skystack-worker calibrate     # calibrate lights against master pools
//! skystack-worker stack-flats   # build master flats from raw flats
//! skystack-worker stack-darks   # build master darks from raw darks
//! ```
//!
//! Configuration comes from the environment (and `.env`); see
//! [`WorkerConfig::from_env`] for the variables. Ctrl-C or SIGTERM cancels the
//! current external run and stops the worker.

use skystack_core::ledger::{ledger_path, CalibrationLedger};
use skystack_core::metadata::MetadataExtractor;
use skystack_core::naming::MasterKind;
use skystack_pipeline::{CalibrationOrchestrator, CalibrationReport, MasterStacker};
use skystack_pixinsight::PixInsightCli;
use skystack_worker::command::Command;
use skystack_worker::config::WorkerConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "skystack_worker=info,skystack_pipeline=info,skystack_pixinsight=info,skystack_core=warn"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command: Command = std::env::args()
        .nth(1)
        .unwrap_or_else(|| {
            tracing::error!("{}", Command::USAGE);
            std::process::exit(1);
        })
        .parse()
        .unwrap_or_else(|e: String| {
            tracing::error!("{e}");
            std::process::exit(1);
        });

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });
    if let Err(e) = config.validate_dirs(command) {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    tracing::info!(%command, "Starting skystack-worker");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::warn!("Shutdown signal received, cancelling");
            cancel.cancel();
        }
    });

    let runner = PixInsightCli::new(config.runner.clone());
    if config.launch_pixinsight {
        if let Err(e) = runner.launch(&cancel).await {
            tracing::error!(error = %e, "Failed to launch PixInsight");
            std::process::exit(1);
        }
    }

    let extractor = MetadataExtractor::new(&config.header_keys, config.matching.date_source);

    let result = match command {
        Command::Calibrate => {
            let orchestrator =
                CalibrationOrchestrator::new(runner, extractor, config.matching.clone());
            orchestrator
                .run(&config.calibration_dirs(), &cancel)
                .await
                .map(|report| log_ledger_summaries(&report))
        }
        Command::StackFlats | Command::StackDarks => {
            let (kind, raw_dir, master_dir) = match command {
                Command::StackDarks => (MasterKind::Dark, &config.dirs.dark, &config.dirs.dark_master),
                _ => (MasterKind::Flat, &config.dirs.flat, &config.dirs.flat_master),
            };
            let stacker = MasterStacker::new(runner, extractor, config.stacking.clone());
            stacker
                .run(kind, raw_dir, master_dir, &cancel)
                .await
                .map(|report| {
                    tracing::info!(
                        created = report.created.len(),
                        failed = report.failed.len(),
                        consumed = report.consumed,
                        "Stacking finished",
                    );
                })
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, %command, "Run aborted");
        std::process::exit(1);
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Log the integration totals of every ledger the run touched.
fn log_ledger_summaries(report: &CalibrationReport) {
    for target in &report.targets {
        match CalibrationLedger::load(&ledger_path(target)) {
            Ok(ledger) => {
                let summary = ledger.summary();
                for (filter, seconds) in &summary.integration_seconds_by_filter {
                    tracing::info!(
                        target_name = %ledger.target_name,
                        filter = %filter,
                        hours = seconds / 3600.0,
                        "Integration time",
                    );
                }
                tracing::info!(
                    target_name = %ledger.target_name,
                    hours = summary.total_integration_hours(),
                    calibrated = summary.calibrated,
                    failed = summary.failed,
                    "Target totals",
                );
            }
            Err(e) => tracing::warn!(error = %e, "Failed to read ledger"),
        }
    }
}
