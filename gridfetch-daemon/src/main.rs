//! Command-line entry point for the gridfetch download orchestrator.
//!
//! Explicitly out of scope for `gridfetch-core` (PURPOSE & SCOPE): this
//! binary's only job is to parse configuration, wire up logging, and install
//! the signal handlers the engine's two shutdown disciplines depend on
//! (§6, "Signals / lifecycle"). All download-engine behavior lives in
//! `gridfetch-core`.

use std::path::PathBuf;

use clap::Parser;
use gridfetch_core::{EngineConfig, FileCredentialProvider, Orchestrator};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI overrides for the handful of knobs an operator most often wants to
/// change at launch time. Everything else in `EngineConfig` is read straight
/// from the environment (see `gridfetch_core::config::EngineConfig::from_env`),
/// matching the teacher's `Config::from_env` plus CLI-override shape.
#[derive(Parser, Debug)]
#[command(name = "gridfetch", about = "Resumable multi-host download orchestrator")]
struct CliArgs {
    /// Catalog database file. Overrides GRIDFETCH_DATABASE_FILE.
    #[arg(long, env = "GRIDFETCH_DATABASE_FILE")]
    database_file: Option<PathBuf>,

    /// Base directory local_image paths are resolved against. Overrides
    /// GRIDFETCH_BASE_PATH.
    #[arg(long, env = "GRIDFETCH_BASE_PATH")]
    base_path: Option<PathBuf>,

    /// Client certificate PEM used to authenticate host sessions. Overrides
    /// GRIDFETCH_CREDENTIALS.
    #[arg(long, env = "GRIDFETCH_CREDENTIALS")]
    credentials: Option<PathBuf>,
}

impl CliArgs {
    fn apply(self, mut config: EngineConfig) -> EngineConfig {
        if let Some(database_file) = self.database_file {
            config.database_file = database_file;
        }
        if let Some(base_path) = self.base_path {
            config.base_path = base_path;
        }
        if let Some(credentials) = self.credentials {
            config.credentials_path = credentials;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridfetch_core=info,gridfetch_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.apply(EngineConfig::from_env()?);
    info!(
        database_file = %config.database_file.display(),
        base_path = %config.base_path.display(),
        max_total_threads = config.max_total_threads,
        "starting gridfetch orchestrator"
    );

    tokio::fs::create_dir_all(&config.base_path).await?;

    let credentials = FileCredentialProvider::new(config.credentials_path.clone());
    let orchestrator = Orchestrator::new(config, &credentials).await?;
    let control = orchestrator.control();

    // Both a termination signal and a keyboard interrupt trigger the
    // immediate-shutdown discipline (§6, "Signals / lifecycle"): abort every
    // live worker now rather than waiting for in-flight transfers to finish.
    let shutdown_control = control.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        warn!("shutdown signal received, aborting in-flight transfers");
        shutdown_control.request_immediate_shutdown();
    });

    orchestrator.run().await?;

    info!("gridfetch orchestrator stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
