use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use xian_backend::bridge::BridgeConnector;
use xian_backend::config::Config;
use xian_backend::supervisor::{Bot, BotHandle, BotSettings};
use xian_backend::{AppState, HttpLimits, ServerInfo, create_app};
use xian_store::persistence::{snapshot, snapshot_loop};
use xian_store::{Capacities, DataDir, Stores, history};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging, RUST_LOG overrides the level
    #[cfg(debug_assertions)]
    let default_level = "debug";
    #[cfg(not(debug_assertions))]
    let default_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting xian bot...");

    let config = Config::from_env();
    tracing::info!(
        "Configuration: server={}:{}, version={}, target={}, command={:?}, delay={}ms, web_port={}, data_dir={}",
        config.mc_host,
        config.mc_port,
        config.mc_version,
        config.target_player,
        config.command(),
        config.command_delay_ms,
        config.web_port,
        config.data_dir,
    );
    tracing::info!(
        "Limits: body_limit={}KB, timeout={}s, rate_limit=1/{}ms (burst {})",
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
        config.rate_limit_replenish_ms,
        config.rate_limit_burst,
    );

    let data_dir = DataDir::open(&config.data_dir).context("failed to open data directory")?;
    match data_dir.listing() {
        Ok(entries) => {
            for entry in entries {
                if entry.is_dir {
                    tracing::info!("  {}/", entry.name);
                } else {
                    tracing::info!("  {} ({:.1} KB)", entry.name, entry.size as f64 / 1024.0);
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not list data directory"),
    }

    let capacities = Capacities::default();
    let (history, report) = history::load_activity(&data_dir, capacities.activity);
    tracing::info!(
        loaded = report.loaded,
        skipped = report.skipped_lines,
        legacy = report.legacy,
        "activity history loaded"
    );
    let stores = Arc::new(Stores::with_activity(capacities, history.into_vec()));

    let (bot, bot_rx) = BotHandle::channel();
    let state = Arc::new(AppState::new(
        stores.clone(),
        data_dir.clone(),
        bot.clone(),
        ServerInfo::from_config(&config),
    ));

    let snapshots = tokio::spawn(snapshot_loop(
        stores.clone(),
        data_dir.clone(),
        config.snapshot_interval,
    ));

    let connector = BridgeConnector::from_config(&config, &data_dir.auth_cache())
        .context("invalid BRIDGE_COMMAND")?;
    let bot_task = tokio::spawn(
        Bot::new(
            state.clone(),
            BotSettings::from_config(&config),
            connector,
            bot_rx,
        )
        .run(),
    );

    let app = create_app(
        state,
        HttpLimits::from_config(&config),
        Some(PathBuf::from(&config.static_dir)),
    );
    let addr = format!("0.0.0.0:{}", config.web_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Dashboard listening on http://localhost:{}", config.web_port);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    bot.shutdown().await;
    let _ = bot_task.await;
    snapshots.abort();
    let report = snapshot(&stores, &data_dir).await;
    tracing::info!(written = ?report.written, failed = ?report.failed, "final snapshot saved");
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
    tracing::info!("Shutting down...");
}
