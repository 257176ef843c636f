pub mod bridge;
pub mod client;
pub mod config;
mod error;
pub mod helpers;
pub mod realtime;
mod routes;
pub mod scheduler;
pub mod supervisor;
pub mod tracking;
mod validation;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use xian_store::{DataDir, Stores};

use crate::client::WorldView;
use crate::config::Config;
use crate::realtime::Hub;
use crate::supervisor::BotHandle;

/// Static settings echoed by `/api/server-info`.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub target_player: String,
    /// Base command delay in milliseconds
    pub command_delay: u64,
    pub web_port: u16,
}

impl ServerInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.mc_host.clone(),
            port: config.mc_port,
            target_player: config.target_player.clone(),
            command_delay: config.command_delay_ms,
            web_port: config.web_port,
        }
    }
}

/// Everything shared between the bot loop, the snapshot task, HTTP handlers
/// and dashboard sockets.
pub struct AppState {
    pub stores: Arc<Stores>,
    pub data_dir: DataDir,
    pub hub: Hub,
    /// Latest view of the world, replaced by the bot loop on every sample
    pub world: watch::Sender<WorldView>,
    pub bot: BotHandle,
    pub info: ServerInfo,
}

impl AppState {
    pub fn new(stores: Arc<Stores>, data_dir: DataDir, bot: BotHandle, info: ServerInfo) -> Self {
        let (world, _) = watch::channel(WorldView::default());
        Self {
            stores,
            data_dir,
            hub: Hub::new(),
            world,
            bot,
            info,
        }
    }
}

/// Rate limiting configuration for `/api/*`
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Milliseconds to replenish one request slot
    pub replenish_ms: u64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            replenish_ms: 50,
            burst: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpLimits {
    pub body_limit: usize,
    pub timeout: Duration,
    pub rate_limit: RateLimitConfig,
}

impl HttpLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            body_limit: config.request_body_limit,
            timeout: config.request_timeout,
            rate_limit: RateLimitConfig {
                replenish_ms: config.rate_limit_replenish_ms,
                burst: config.rate_limit_burst,
            },
        }
    }
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            body_limit: 1024 * 1024,
            timeout: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Create the application router. Files under `static_dir` are served for
/// any path no route claims.
pub fn create_app(state: Arc<AppState>, limits: HttpLimits, static_dir: Option<PathBuf>) -> Router {
    let api_governor = GovernorConfigBuilder::default()
        .per_millisecond(limits.rate_limit.replenish_ms.max(1))
        .burst_size(limits.rate_limit.burst)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .unwrap();

    let api_routes = Router::new()
        .route("/api/trajectories", get(routes::trajectories))
        .route("/api/trajectories/{username}", get(routes::player_trajectory))
        .route("/api/heatmap", get(routes::heatmap))
        .route("/api/activity-log", get(routes::activity_log))
        .route("/api/server-info", get(routes::server_info))
        .route("/api/last-login", get(routes::last_login))
        .route("/api/radar", get(routes::radar))
        .route("/api/latest-data", get(routes::latest_data))
        .route("/api/clear-records", post(routes::clear_records))
        .layer(GovernorLayer::new(api_governor));

    let mut app = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ws", get(realtime::ws_handler))
        .merge(api_routes);

    if let Some(dir) = static_dir.filter(|dir| dir.is_dir()) {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        limits.timeout,
    ))
    .layer(RequestBodyLimitLayer::new(limits.body_limit))
    .with_state(state)
}
