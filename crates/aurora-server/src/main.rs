//! aurora-server: forward panel daemon.
//!
//! Persists forwarding rules, keeps one engine process running per enabled
//! rule, and serves the HTTP API the panel front-end drives. On startup the
//! full rule set is reconciled before the API accepts traffic; on shutdown
//! every engine process is stopped.

mod api;
mod config;
mod hooks;
mod launcher;
mod store;
mod supervisor;

use clap::Parser;
use config::ServerConfig;
use hooks::LifecycleHooks;
use launcher::GostLauncher;
use std::path::Path;
use std::sync::Arc;
use store::{JsonStore, RuleStore};
use supervisor::Supervisor;
use tracing::{error, info, warn};

/// aurora-server — forward panel daemon
#[derive(Parser, Debug)]
#[command(name = "aurora-server", version, about = "Aurora forward panel daemon")]
struct Cli {
    /// HTTP listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.aurora/config.toml")]
    config: String,

    /// Forwarding engine binary
    #[arg(long)]
    engine: Option<String>,

    /// Rule database file
    #[arg(long)]
    data_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting aurora-server");

    let config = match ServerConfig::load(
        Some(Path::new(&cli.config)),
        cli.port,
        cli.engine.as_deref(),
        cli.data_file.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn RuleStore> = match JsonStore::open(&config.data_file) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, path = %config.data_file.display(), "failed to open rule store");
            std::process::exit(1);
        }
    };

    let launcher = Arc::new(GostLauncher::new(&config.engine_binary, config.stop_grace));
    let supervisor = Arc::new(Supervisor::new(launcher));
    let hooks = Arc::new(LifecycleHooks::new(store.clone(), supervisor.clone()));

    // Converge to the persisted rule set before serving traffic.
    match hooks.startup().await {
        Ok(failed) if failed.is_empty() => {}
        Ok(failed) => {
            for (id, e) in &failed {
                warn!(rule_id = *id, error = %e, "rule did not start");
            }
        }
        Err(e) => {
            error!(error = %e, "startup reconciliation failed");
            std::process::exit(1);
        }
    }

    let app = api::router(api::ApiState {
        hooks,
        store,
        supervisor: supervisor.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = %addr, "failed to bind API listener");
            supervisor.shutdown().await;
            std::process::exit(1);
        }
    };

    info!(
        addr = %addr,
        engine = %config.engine_binary.display(),
        "aurora-server ready"
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    // Stop every engine process before the daemon exits.
    supervisor.shutdown().await;
    info!("aurora-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
