//! Process entry point: load configuration, wire the pipeline, run
//! until a termination signal.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use solsniper::{Config, Orchestrator};

fn init_logging(config: &Config) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()))
    };

    let registry = tracing_subscriber::registry();
    let console_layer = config.log.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter())
    });

    let mut guard = None;
    let file_layer = match &config.log.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open LOG_FILE {path}"))?;
            let (writer, g) = tracing_appender::non_blocking(file);
            guard = Some(g);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    registry.with(console_layer).with(file_layer).init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Line-by-line listing of every configuration problem.
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config)?;
    info!(
        dry_run = config.dry_run,
        devnet = config.use_devnet,
        dexes = ?config.enabled_dexes,
        "starting solsniper"
    );

    let orchestrator = Arc::new(Orchestrator::new(config)?);

    // SIGINT/SIGTERM drive a graceful stop: ingestion halts, timers
    // cancel, in-flight work drains.
    {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("termination signal received");
            orchestrator.stop();
        });
    }

    if let Err(e) = orchestrator.run().await {
        error!(error = %e, "pipeline error");
        return Err(e);
    }

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
