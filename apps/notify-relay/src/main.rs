use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use notify_relay::{
    cli::{self, Cli},
    config::AppConfig,
    directory::build_directory,
    routes,
    state::AppState,
    store::build_store,
    telemetry,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Some(command) => {
            telemetry::init_tracing(&std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()));
            cli::run(command).await
        }
        None => serve().await,
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "notify-relay exited with error");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    telemetry::init_tracing(&config.log_filter);

    let store = build_store(
        &config.store_backend,
        config.redis_url.as_deref(),
        config.pending_ttl_secs,
    );
    let directory = build_directory(config.known_users.as_deref());
    let state = AppState::new(store, directory, config.heartbeat);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(
        addr = %config.bind_addr,
        store = config.store_backend.as_str(),
        liveness_secs = config.heartbeat.liveness_window().as_secs(),
        probe_secs = config.heartbeat.probe_period().as_secs(),
        "notify-relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("notify-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
