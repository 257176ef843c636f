use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Minecraft server host
    /// Env: MC_SERVER (default: "localhost")
    pub mc_host: String,

    /// Minecraft server port
    /// Env: MC_PORT (default: 25565)
    pub mc_port: u16,

    /// Microsoft account used to log in
    /// Env: MC_EMAIL (optional, the protocol client prompts for a device code without it)
    pub mc_email: Option<String>,

    /// Protocol version the client should speak
    /// Env: MC_VERSION (default: "1.20.1")
    pub mc_version: String,

    /// Player the command targets
    /// Env: TARGET_PLAYER (default: "Steve")
    pub target_player: String,

    /// Base delay between commands in milliseconds, jitter is added on top
    /// Env: COMMAND_DELAY_MS (default: 50)
    pub command_delay_ms: u64,

    /// Command sent on every iteration, `{target}` is replaced by the target player
    /// Env: COMMAND_TEMPLATE (default: "/kiss {target}")
    pub command_template: String,

    /// Dashboard port
    /// Env: WEB_SERVER_PORT (default: 3000)
    pub web_port: u16,

    /// Directory for persisted JSON files and the auth cache
    /// Env: DATA_DIR (default: ".minecraft-bot")
    pub data_dir: String,

    /// Dashboard assets served at `/`
    /// Env: STATIC_DIR (default: "public")
    pub static_dir: String,

    /// Command line of the protocol client sidecar
    /// Env: BRIDGE_COMMAND (default: "node bridge.js")
    pub bridge_command: String,

    /// Seconds between store snapshots
    /// Env: SNAPSHOT_INTERVAL_SECS (default: 60)
    pub snapshot_interval: Duration,

    /// Milliseconds between position samples
    /// Env: TRACKING_INTERVAL_MS (default: 50)
    pub tracking_interval: Duration,

    /// Seconds between full trajectory/heatmap pushes to the dashboard
    /// Env: FULL_PUSH_INTERVAL_SECS (default: 10)
    pub full_push_interval: Duration,

    /// Base reconnect delay, doubled per attempt
    /// Env: RECONNECT_BASE_MS (default: 5000)
    pub reconnect_base: Duration,

    /// Upper bound on the reconnect delay
    /// Env: RECONNECT_MAX_MS (default: 60000)
    pub reconnect_max: Duration,

    /// Reconnect attempts before giving up
    /// Env: MAX_RECONNECT_ATTEMPTS (default: 10)
    pub max_reconnect_attempts: u32,

    /// Delay between spawning and starting the command loop
    /// Env: SPAWN_GRACE_MS (default: 3000)
    pub spawn_grace: Duration,

    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Milliseconds for one request of the /api quota to replenish
    /// Env: RATE_LIMIT_REPLENISH_MS (default: 50)
    pub rate_limit_replenish_ms: u64,

    /// Burst size for /api endpoints
    /// Env: RATE_LIMIT_BURST (default: 50)
    pub rate_limit_burst: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv();
        let defaults = Self::default();
        Self {
            mc_host: env_or_default_string("MC_SERVER", &defaults.mc_host),
            mc_port: env_or_default("MC_PORT", defaults.mc_port),
            mc_email: var("MC_EMAIL").ok().filter(|email| !email.is_empty()),
            mc_version: env_or_default_string("MC_VERSION", &defaults.mc_version),
            target_player: env_or_default_string("TARGET_PLAYER", &defaults.target_player),
            command_delay_ms: env_or_default("COMMAND_DELAY_MS", defaults.command_delay_ms),
            command_template: env_or_default_string(
                "COMMAND_TEMPLATE",
                &defaults.command_template,
            ),
            web_port: env_or_default("WEB_SERVER_PORT", defaults.web_port),
            data_dir: env_or_default_string("DATA_DIR", &defaults.data_dir),
            static_dir: env_or_default_string("STATIC_DIR", &defaults.static_dir),
            bridge_command: env_or_default_string("BRIDGE_COMMAND", &defaults.bridge_command),
            snapshot_interval: Duration::from_secs(env_or_default("SNAPSHOT_INTERVAL_SECS", 60)),
            tracking_interval: Duration::from_millis(env_or_default("TRACKING_INTERVAL_MS", 50)),
            full_push_interval: Duration::from_secs(env_or_default("FULL_PUSH_INTERVAL_SECS", 10)),
            reconnect_base: Duration::from_millis(env_or_default("RECONNECT_BASE_MS", 5000)),
            reconnect_max: Duration::from_millis(env_or_default("RECONNECT_MAX_MS", 60_000)),
            max_reconnect_attempts: env_or_default(
                "MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            spawn_grace: Duration::from_millis(env_or_default("SPAWN_GRACE_MS", 3000)),
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", defaults.request_body_limit),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            rate_limit_replenish_ms: env_or_default(
                "RATE_LIMIT_REPLENISH_MS",
                defaults.rate_limit_replenish_ms,
            ),
            rate_limit_burst: env_or_default("RATE_LIMIT_BURST", defaults.rate_limit_burst),
        }
    }

    /// The command with the target substituted in
    pub fn command(&self) -> String {
        crate::helpers::render_command(&self.command_template, &self.target_player)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mc_host: "localhost".to_string(),
            mc_port: 25565,
            mc_email: None,
            mc_version: "1.20.1".to_string(),
            target_player: "Steve".to_string(),
            command_delay_ms: 50,
            command_template: "/kiss {target}".to_string(),
            web_port: 3000,
            data_dir: ".minecraft-bot".to_string(),
            static_dir: "public".to_string(),
            bridge_command: "node bridge.js".to_string(),
            snapshot_interval: Duration::from_secs(60),
            tracking_interval: Duration::from_millis(50),
            full_push_interval: Duration::from_secs(10),
            reconnect_base: Duration::from_millis(5000),
            reconnect_max: Duration::from_millis(60_000),
            max_reconnect_attempts: 10,
            spawn_grace: Duration::from_millis(3000),
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            rate_limit_replenish_ms: 50,
            rate_limit_burst: 50,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mc_host, "localhost");
        assert_eq!(config.mc_port, 25565);
        assert_eq!(config.mc_version, "1.20.1");
        assert_eq!(config.target_player, "Steve");
        assert_eq!(config.command_delay_ms, 50);
        assert_eq!(config.web_port, 3000);
        assert_eq!(config.data_dir, ".minecraft-bot");
        assert_eq!(config.snapshot_interval, Duration::from_secs(60));
        assert_eq!(config.reconnect_base, Duration::from_millis(5000));
        assert_eq!(config.reconnect_max, Duration::from_millis(60_000));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.spawn_grace, Duration::from_millis(3000));
        assert_eq!(config.request_body_limit, 1024 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_command_renders_target() {
        let config = Config {
            target_player: "Alex".to_string(),
            ..Config::default()
        };
        assert_eq!(config.command(), "/kiss Alex");
    }
}
