#![forbid(unsafe_code)]

//! `project-factory`: supervisor for unattended coding-agent runs.
//!
//! Bootstraps configuration and the run store, reattaches to runs left
//! behind by a previous process, and serves the IPC channel for
//! `project-factory-ctl` until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use project_factory::config::FactoryConfig;
use project_factory::ipc::server::spawn_ipc_server;
use project_factory::observer::{
    EventObserver, FanoutObserver, JournalObserver, TracingObserver, WebhookObserver,
};
use project_factory::orchestrator::factory::{Factory, FactoryOptions};
use project_factory::persistence::db;
use project_factory::persistence::project_repo::ProjectRepo;
use project_factory::session::tmux::TmuxMultiplexer;
use project_factory::session::WorkspaceLayout;
use project_factory::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "project-factory", about = "Coding-agent session supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("project-factory bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = FactoryConfig::load_from_path(&args.config)?;
    info!(
        factory_root = %config.factory_root.display(),
        state_dir = %config.state_dir.display(),
        "configuration loaded"
    );

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    let repo = ProjectRepo::new(db);
    info!("database connected");

    // ── Build the factory ───────────────────────────────
    let observer = build_observer(&config)?;
    let mux = Arc::new(
        TmuxMultiplexer::new(config.command_timeout()).with_socket(config.tmux.socket_name.clone()),
    );
    let factory = Arc::new(Factory::new(
        WorkspaceLayout::new(config.factory_root.clone()),
        mux,
        repo,
        observer,
        FactoryOptions::from_config(&config),
    ));

    // ── Reattach to runs from a previous process ────────
    match factory.recover().await {
        Ok(report) => info!(
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            "startup recovery finished"
        ),
        Err(err) => error!(%err, "startup recovery failed"),
    }

    // ── Start IPC server ────────────────────────────────
    let ct = CancellationToken::new();
    let ipc_handle = spawn_ipc_server(
        &config.ipc_name,
        Arc::clone(&factory),
        config.ipc_auth_token.clone(),
        ct.clone(),
    )?;
    info!("project-factory ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    factory.shutdown().await;
    if let Err(err) = ipc_handle.await {
        warn!(%err, "ipc server task ended abnormally");
    }
    info!("project-factory shut down");

    Ok(())
}

fn build_observer(config: &FactoryConfig) -> Result<Arc<dyn EventObserver>> {
    let journal = JournalObserver::new(config.journal_dir())?;
    let mut fanout = FanoutObserver::new()
        .with(Arc::new(TracingObserver))
        .with(Arc::new(journal));

    if let Some(ref url) = config.notifications.webhook_url {
        let webhook = WebhookObserver::new(
            url.clone(),
            config.notifications.events.iter().copied(),
            std::time::Duration::from_secs(config.notifications.webhook_timeout_seconds),
        )?;
        fanout = fanout.with(Arc::new(webhook));
        info!("webhook notifications enabled");
    }

    Ok(Arc::new(fanout))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
