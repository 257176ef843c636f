//! Connection lifecycle and the bot event loop.
//!
//! All bot-side state lives in [`Bot`] and is only touched from its own task.
//! Client events, timer fires, dashboard commands and shutdown arrive on one
//! queue and are handled one at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use xian_store::persistence::{
    COMMAND_STATS_FILE, DISCONNECT_LOG_FILE, KICK_LOG_FILE, LAST_LOGIN_FILE, LOGIN_INFO_FILE,
    SHUTDOWN_LOG_FILE,
};
use xian_store::time::{now_iso, now_ms, parse_ms, to_iso};
use xian_store::{
    ActivityEntry, ActivityEvent, DisconnectLog, KickLog, LastLogin, LoginInfo, ShutdownLog,
};

use crate::AppState;
use crate::client::{ClientEvent, Connector, EventSink, GameClient, WorldView};
use crate::config::Config;
use crate::helpers::truncate_chars;
use crate::realtime::{PresenceChange, ServerEvent};
use crate::scheduler::{CommandScheduler, Execution, STATS_EVERY};
use crate::tracking::Tracker;
use crate::validation::validate_console_command;

/// How often a spawned bot makes a small idle movement
pub const KEEP_ALIVE_EVERY: Duration = Duration::from_secs(1);

/// `min(base * 2^attempt, max)`, saturating instead of overflowing.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Whether a transport error is a known harmless packet decode failure.
pub fn is_benign_error(name: &str, message: &str) -> bool {
    message.contains("unknown chat format code")
        || message.contains("PartialReadError")
        || name == "PartialReadError"
}

/// Post `event` to the bot loop after `delay`.
pub fn schedule(
    tx: &mpsc::UnboundedSender<BotEvent>,
    delay: Duration,
    event: BotEvent,
) -> AbortHandle {
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(event);
    })
    .abort_handle()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Reconnects scheduled before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5000),
            max: Duration::from_millis(60_000),
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Spawned,
    Disconnected,
    Reconnecting,
    GaveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Reconnect { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Reconnect bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    policy: ReconnectPolicy,
    attempt_count: u32,
    active: bool,
    last_disconnect_reason: Option<String>,
    phase: Phase,
}

impl ConnectionState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt_count: 0,
            active: false,
            last_disconnect_reason: None,
            phase: Phase::Disconnected,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_disconnect_reason(&self) -> Option<&str> {
        self.last_disconnect_reason.as_deref()
    }

    pub fn on_connecting(&mut self) {
        self.phase = Phase::Connecting;
        self.active = true;
    }

    /// The only place the attempt count resets.
    pub fn on_spawn(&mut self) {
        self.attempt_count = 0;
        self.phase = Phase::Spawned;
    }

    pub fn on_disconnect(&mut self, reason: &str) -> DisconnectOutcome {
        self.active = false;
        self.phase = Phase::Disconnected;
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_disconnect_reason = Some(reason.to_string());

        if self.attempt_count <= self.policy.max_attempts {
            self.phase = Phase::Reconnecting;
            DisconnectOutcome::Reconnect {
                attempt: self.attempt_count,
                delay: reconnect_delay(self.attempt_count, self.policy.base, self.policy.max),
            }
        } else {
            self.phase = Phase::GaveUp;
            DisconnectOutcome::GiveUp {
                attempts: self.policy.max_attempts,
            }
        }
    }
}

/// Dashboard console commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Pause,
    /// Quit the current session (the supervisor then reconnects)
    Stop,
    Test,
    /// A validated `/command` typed by the operator
    Raw(String),
}

impl ControlCommand {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "start" => Some(Self::Start),
            "pause" => Some(Self::Pause),
            "stop" => Some(Self::Stop),
            "test" => Some(Self::Test),
            raw => match validate_console_command(raw) {
                Ok(()) => Some(Self::Raw(raw.to_string())),
                Err(e) => {
                    debug!(error = %e, "rejected console input");
                    None
                }
            },
        }
    }
}

/// Everything the bot loop reacts to.
#[derive(Debug)]
pub enum BotEvent {
    Client { session: u64, event: ClientEvent },
    Control(ControlCommand),
    ReconnectDue,
    GraceElapsed { session: u64 },
    CommandDue { generation: u64 },
    Shutdown { done: oneshot::Sender<()> },
}

/// Sending side of the bot loop's queue.
#[derive(Debug, Clone)]
pub struct BotHandle {
    tx: mpsc::UnboundedSender<BotEvent>,
}

impl BotHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a dashboard command. Returns false once the loop has exited.
    pub fn control(&self, command: ControlCommand) -> bool {
        self.tx.send(BotEvent::Control(command)).is_ok()
    }

    /// Ask the loop to record the shutdown and quit, and wait until it has.
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self.tx.send(BotEvent::Shutdown { done }).is_ok() {
            let _ = finished.await;
        }
    }

    fn sender(&self) -> mpsc::UnboundedSender<BotEvent> {
        self.tx.clone()
    }
}

/// The subset of [`Config`] the bot loop needs.
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub host: String,
    pub port: u16,
    pub version: String,
    pub target_player: String,
    pub command: String,
    pub command_delay: Duration,
    pub reconnect: ReconnectPolicy,
    pub spawn_grace: Duration,
    pub tracking_interval: Duration,
    pub full_push_interval: Duration,
}

impl BotSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.mc_host.clone(),
            port: config.mc_port,
            version: config.mc_version.clone(),
            target_player: config.target_player.clone(),
            command: config.command(),
            command_delay: Duration::from_millis(config.command_delay_ms),
            reconnect: ReconnectPolicy {
                base: config.reconnect_base,
                max: config.reconnect_max,
                max_attempts: config.max_reconnect_attempts,
            },
            spawn_grace: config.spawn_grace,
            tracking_interval: config.tracking_interval,
            full_push_interval: config.full_push_interval,
        }
    }

    fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct Bot<C: Connector> {
    state: Arc<AppState>,
    settings: BotSettings,
    connector: C,
    tx: mpsc::UnboundedSender<BotEvent>,
    rx: mpsc::UnboundedReceiver<BotEvent>,
    session: u64,
    client: Option<Box<dyn GameClient>>,
    conn: ConnectionState,
    scheduler: CommandScheduler,
    tracker: Tracker,
    reconnect_timer: Option<AbortHandle>,
    grace_timer: Option<AbortHandle>,
    started: Instant,
}

impl<C: Connector> Bot<C> {
    pub fn new(
        state: Arc<AppState>,
        settings: BotSettings,
        connector: C,
        rx: mpsc::UnboundedReceiver<BotEvent>,
    ) -> Self {
        let tx = state.bot.sender();
        let scheduler = CommandScheduler::new(
            settings.command.clone(),
            settings.target_player.clone(),
            settings.command_delay,
        );
        Self {
            conn: ConnectionState::new(settings.reconnect),
            tracker: Tracker::new(settings.full_push_interval),
            state,
            settings,
            connector,
            tx,
            rx,
            session: 0,
            client: None,
            scheduler,
            reconnect_timer: None,
            grace_timer: None,
            started: Instant::now(),
        }
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.conn
    }

    /// Connect, then process events until shutdown.
    pub async fn run(mut self) {
        self.connect();

        let mut tracking = tokio::time::interval(self.settings.tracking_interval);
        tracking.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut keep_alive = tokio::time::interval(KEEP_ALIVE_EVERY);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(BotEvent::Shutdown { done }) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = tracking.tick() => {
                    if let Some(client) = self.client.as_deref() {
                        self.tracker.sample(client, &self.state).await;
                    }
                }
                _ = keep_alive.tick() => self.keep_alive(),
            }
        }
        info!("bot loop finished");
    }

    pub async fn handle(&mut self, event: BotEvent) {
        match event {
            BotEvent::Client { session, event } => {
                if session != self.session {
                    debug!(session, current = self.session, "dropping event from an old session");
                    return;
                }
                self.on_client_event(event).await;
            }
            BotEvent::Control(command) => self.on_control(command),
            BotEvent::ReconnectDue => {
                self.reconnect_timer = None;
                if self.conn.phase() == Phase::Reconnecting {
                    info!(attempt = self.conn.attempt_count(), "reconnecting");
                    self.connect();
                }
            }
            BotEvent::GraceElapsed { session } => {
                self.grace_timer = None;
                if session == self.session && self.conn.phase() == Phase::Spawned {
                    self.start_commands();
                }
            }
            BotEvent::CommandDue { generation } => self.on_command_due(generation),
            BotEvent::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    fn connect(&mut self) {
        self.session += 1;
        self.conn.on_connecting();
        self.inspect_login_info();

        let server = self.settings.server();
        info!(%server, session = self.session, "connecting");
        self.state.hub.set_status(format!("Connecting to {}...", server));

        let sink = EventSink::new(self.session, self.tx.clone());
        match self.connector.connect(sink) {
            Ok(client) => self.client = Some(client),
            Err(e) => {
                error!(error = %e, "failed to start the game client");
                self.on_disconnect(&e.to_string());
            }
        }
    }

    /// Log whether a saved device-code login is still valid.
    fn inspect_login_info(&self) {
        match self.state.data_dir.read_json::<LoginInfo>(LOGIN_INFO_FILE) {
            Ok(Some(info)) => match parse_ms(&info.expires_at) {
                Some(expires) if expires > now_ms() => {
                    info!(expires_at = %info.expires_at, "saved login is still valid")
                }
                _ => warn!(expires_at = %info.expires_at, "saved login has expired, a new login is needed"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read saved login info"),
        }
    }

    async fn on_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::DeviceCode {
                user_code,
                verification_uri,
                expires_in,
            } => {
                warn!(%verification_uri, %user_code, "Microsoft login required");
                let requested = now_ms();
                let info = LoginInfo {
                    user_code: user_code.clone(),
                    verification_uri: verification_uri.clone(),
                    expires_at: to_iso(requested.saturating_add((expires_in as i64) * 1000)),
                    requested_at: to_iso(requested),
                };
                self.state.data_dir.record(LOGIN_INFO_FILE, &info);
                self.state.hub.set_status(format!(
                    "Login required: open {} and enter {}",
                    verification_uri, user_code
                ));
            }
            ClientEvent::Spawned { username } => self.on_spawn(username),
            ClientEvent::Chat { text } => {
                let text = text.trim();
                if !text.is_empty() {
                    info!(target: "chat", "{}", text);
                    self.state.hub.push_chat(text);
                }
            }
            ClientEvent::PlayerJoined { username } => {
                self.on_presence(username, ActivityEvent::Joined).await
            }
            ClientEvent::PlayerLeft { username } => {
                self.on_presence(username, ActivityEvent::Left).await
            }
            ClientEvent::Kicked { reason } => {
                warn!(%reason, "kicked from the server");
                self.state
                    .hub
                    .set_status(format!("Kicked: {}...", truncate_chars(&reason, 50)));
                self.state.data_dir.record(
                    KICK_LOG_FILE,
                    &KickLog {
                        time: now_iso(),
                        reason,
                    },
                );
            }
            ClientEvent::Error { name, message } => {
                if is_benign_error(&name, &message) {
                    warn!(%name, "ignored a malformed packet, bot keeps running");
                    return;
                }
                error!(%name, %message, "connection error");
                self.state.hub.set_status(format!("Error: {}", message));
            }
            ClientEvent::Ended { reason } => self.on_disconnect(&reason),
        }
    }

    fn on_spawn(&mut self, username: String) {
        info!(%username, "logged in and spawned into the world");
        self.conn.on_spawn();
        self.state.hub.set_status("Logged into game world");

        let login = LastLogin {
            last_login: now_iso(),
            server: self.settings.server(),
            username,
            version: self.settings.version.clone(),
        };
        self.state.data_dir.record(LAST_LOGIN_FILE, &login);

        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
        self.grace_timer = Some(schedule(
            &self.tx,
            self.settings.spawn_grace,
            BotEvent::GraceElapsed {
                session: self.session,
            },
        ));
        self.tracker.enable();
    }

    async fn on_presence(&mut self, username: String, event: ActivityEvent) {
        if self.conn.phase() != Phase::Spawned {
            return;
        }
        if username.is_empty() {
            debug!("ignoring presence change without a name");
            return;
        }
        let time = now_iso();
        let message = match event {
            ActivityEvent::Joined => format!("{} joined the game", username),
            ActivityEvent::Left => format!("{} left the game", username),
        };
        info!("{}", message);

        self.state
            .stores
            .record_activity(ActivityEntry {
                username: username.clone(),
                event,
                time: time.clone(),
                timestamp: now_ms(),
            })
            .await;
        self.state.hub.push_chat(format!("[system] {}", message));
        let change = PresenceChange { username, time };
        self.state.hub.publish(match event {
            ActivityEvent::Joined => ServerEvent::PlayerJoined(change),
            ActivityEvent::Left => ServerEvent::PlayerLeft(change),
        });
    }

    fn on_disconnect(&mut self, reason: &str) {
        warn!(%reason, "connection ended");
        self.stop_commands();
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
        self.tracker.disable();
        self.client = None;
        self.state.world.send_replace(WorldView::default());
        self.state.hub.set_status("Disconnected");

        let outcome = self.conn.on_disconnect(reason);
        let reconnect_in = match outcome {
            DisconnectOutcome::Reconnect { attempt, delay } => {
                warn!(
                    attempt,
                    max_attempts = self.settings.reconnect.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                if let Some(timer) = self.reconnect_timer.take() {
                    timer.abort();
                }
                self.reconnect_timer = Some(schedule(&self.tx, delay, BotEvent::ReconnectDue));
                format!("{}s", delay.as_secs_f64().round() as u64)
            }
            DisconnectOutcome::GiveUp { attempts } => {
                error!(attempts, "reached the reconnect limit, giving up");
                self.state.hub.set_status("Disconnected, stopped retrying");
                "stopped retrying".to_string()
            }
        };
        self.state.data_dir.record(
            DISCONNECT_LOG_FILE,
            &DisconnectLog {
                time: now_iso(),
                reason: reason.to_string(),
                reconnect_in,
            },
        );
    }

    // ========================================================================
    // Command loop
    // ========================================================================

    fn start_commands(&mut self) -> bool {
        let ready = self.client.as_deref().is_some_and(|c| c.is_ready());
        if !self.scheduler.start(ready, &self.tx) {
            return false;
        }
        self.state
            .hub
            .set_status(format!("Running {}", self.scheduler.command()));
        self.state.hub.set_active(true);
        true
    }

    fn stop_commands(&mut self) {
        if self.scheduler.stop() {
            self.state.hub.set_status("Command loop stopped");
        }
        self.state.hub.set_active(false);
    }

    fn on_command_due(&mut self, generation: u64) {
        match self
            .scheduler
            .on_due(generation, self.client.as_deref(), &self.tx)
        {
            Execution::Ignored => {}
            Execution::Sent { count, command } => {
                self.state
                    .hub
                    .push_chat(format!("[action] #{} {}", count, command));
                if count % STATS_EVERY == 0 {
                    self.state
                        .data_dir
                        .record(COMMAND_STATS_FILE, &self.scheduler.stats());
                }
            }
            Execution::Halted { reason } => {
                warn!(%reason, "command loop halted");
                self.state.hub.set_status("Command loop stopped");
                self.state.hub.set_active(false);
            }
        }
    }

    fn on_control(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Start => {
                // Refused starts still answer with the current state
                if !self.start_commands() {
                    self.state.hub.set_active(self.scheduler.is_active());
                }
            }
            ControlCommand::Pause => self.stop_commands(),
            ControlCommand::Stop => match self.client.as_deref() {
                Some(client) => client.quit("Stopped from the web console"),
                None => info!("stop requested with no active session"),
            },
            ControlCommand::Test => self.send_chat("[test] message from the web console"),
            ControlCommand::Raw(text) => self.send_chat(&text),
        }
    }

    fn keep_alive(&self) {
        if self.conn.phase() != Phase::Spawned {
            return;
        }
        if let Some(client) = self.client.as_deref() {
            client.keep_alive();
        }
    }

    fn send_chat(&self, text: &str) {
        let Some(client) = self.client.as_deref() else {
            info!("no active session, console input dropped");
            return;
        };
        if let Err(e) = client.chat(text) {
            warn!(error = %e, "failed to send console input");
        }
    }

    fn shutdown(&mut self) {
        info!("shutting down bot");
        self.stop_commands();
        for timer in [self.reconnect_timer.take(), self.grace_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
        self.tracker.disable();

        let log = ShutdownLog {
            time: now_iso(),
            reason: "operator interrupt".to_string(),
            uptime: self.started.elapsed().as_secs_f64(),
        };
        self.state.data_dir.record(SHUTDOWN_LOG_FILE, &log);

        if let Some(client) = self.client.take() {
            client.quit("console shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeConnector;
    use crate::test_support::test_state_with;
    use std::sync::atomic::Ordering;
    use xian_store::CommandStats;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn settings() -> BotSettings {
        BotSettings {
            host: "mc.example.com".to_string(),
            port: 25565,
            version: "1.20.1".to_string(),
            target_player: "Steve".to_string(),
            command: "/kiss Steve".to_string(),
            command_delay: ms(50),
            reconnect: ReconnectPolicy::default(),
            spawn_grace: ms(3000),
            tracking_interval: ms(50),
            full_push_interval: Duration::from_secs(10),
        }
    }

    fn bot(name: &str) -> (Bot<FakeConnector>, FakeConnector, std::path::PathBuf) {
        let (handle, rx) = BotHandle::channel();
        let (state, root) = test_state_with(name, handle);
        let connector = FakeConnector::default();
        (
            Bot::new(state, settings(), connector.clone(), rx),
            connector,
            root,
        )
    }

    fn client_event(bot: &Bot<FakeConnector>, event: ClientEvent) -> BotEvent {
        BotEvent::Client {
            session: bot.session,
            event,
        }
    }

    fn ended(bot: &Bot<FakeConnector>) -> BotEvent {
        client_event(
            bot,
            ClientEvent::Ended {
                reason: "socketClosed".to_string(),
            },
        )
    }

    fn spawned(bot: &Bot<FakeConnector>) -> BotEvent {
        client_event(
            bot,
            ClientEvent::Spawned {
                username: "Bot".to_string(),
            },
        )
    }

    #[test]
    fn test_backoff_delays() {
        let delays: Vec<u128> = (1..=10)
            .map(|n| reconnect_delay(n, ms(5000), ms(60_000)).as_millis())
            .collect();
        assert_eq!(
            delays,
            vec![
                10_000, 20_000, 40_000, 60_000, 60_000, 60_000, 60_000, 60_000, 60_000, 60_000
            ]
        );
    }

    #[test]
    fn test_backoff_never_overflows() {
        assert_eq!(reconnect_delay(0, ms(5000), ms(60_000)), ms(5000));
        assert_eq!(reconnect_delay(40, ms(5000), ms(60_000)), ms(60_000));
        assert_eq!(reconnect_delay(u32::MAX, ms(5000), ms(60_000)), ms(60_000));
    }

    #[test]
    fn test_benign_error_signatures() {
        assert!(is_benign_error("Error", "unknown chat format code: x"));
        assert!(is_benign_error("Error", "PartialReadError: Read error for undefined"));
        assert!(is_benign_error("PartialReadError", "whatever"));
        assert!(!is_benign_error("Error", "ECONNRESET"));
    }

    #[test]
    fn test_connection_state_gives_up_after_ceiling() {
        let mut conn = ConnectionState::new(ReconnectPolicy::default());
        for attempt in 1..=10 {
            conn.on_connecting();
            assert!(matches!(
                conn.on_disconnect("lost"),
                DisconnectOutcome::Reconnect { attempt: a, .. } if a == attempt
            ));
            assert_eq!(conn.phase(), Phase::Reconnecting);
        }
        conn.on_connecting();
        assert_eq!(
            conn.on_disconnect("lost"),
            DisconnectOutcome::GiveUp { attempts: 10 }
        );
        assert_eq!(conn.phase(), Phase::GaveUp);
        assert_eq!(conn.last_disconnect_reason(), Some("lost"));
    }

    #[test]
    fn test_spawn_resets_attempts() {
        let mut conn = ConnectionState::new(ReconnectPolicy::default());
        conn.on_connecting();
        conn.on_disconnect("a");
        conn.on_connecting();
        conn.on_disconnect("b");
        assert_eq!(conn.attempt_count(), 2);

        conn.on_connecting();
        conn.on_spawn();
        assert_eq!(conn.attempt_count(), 0);
        assert!(conn.is_active());
        assert!(matches!(
            conn.on_disconnect("c"),
            DisconnectOutcome::Reconnect { attempt: 1, delay } if delay == ms(10_000)
        ));
    }

    #[test]
    fn test_control_command_parse() {
        assert_eq!(ControlCommand::parse("start"), Some(ControlCommand::Start));
        assert_eq!(ControlCommand::parse("pause"), Some(ControlCommand::Pause));
        assert_eq!(ControlCommand::parse("stop"), Some(ControlCommand::Stop));
        assert_eq!(ControlCommand::parse("test"), Some(ControlCommand::Test));
        assert_eq!(
            ControlCommand::parse("/tp Steve 0 64 0"),
            Some(ControlCommand::Raw("/tp Steve 0 64 0".to_string()))
        );
        assert_eq!(ControlCommand::parse("hello"), None);
        assert_eq!(ControlCommand::parse(""), None);
    }

    #[tokio::test]
    async fn test_disconnect_schedules_reconnect_and_logs() {
        let (mut bot, connector, root) = bot("xian-supervisor-reconnect");
        bot.connect();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        bot.handle(ended(&bot)).await;

        assert_eq!(bot.connection().phase(), Phase::Reconnecting);
        assert!(bot.reconnect_timer.is_some());
        let log: DisconnectLog = bot
            .state
            .data_dir
            .read_json(DISCONNECT_LOG_FILE)
            .unwrap()
            .unwrap();
        assert_eq!(log.reason, "socketClosed");
        assert_eq!(log.reconnect_in, "10s");

        bot.handle(BotEvent::ReconnectDue).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(bot.connection().phase(), Phase::Connecting);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_supervisor_gives_up_after_ceiling() {
        let (mut bot, connector, root) = bot("xian-supervisor-give-up");
        bot.connect();

        for _ in 0..10 {
            bot.handle(ended(&bot)).await;
            assert_eq!(bot.connection().phase(), Phase::Reconnecting);
            bot.handle(BotEvent::ReconnectDue).await;
        }
        bot.handle(ended(&bot)).await;

        assert_eq!(bot.connection().phase(), Phase::GaveUp);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 11);
        let log: DisconnectLog = bot
            .state
            .data_dir
            .read_json(DISCONNECT_LOG_FILE)
            .unwrap()
            .unwrap();
        assert_eq!(log.reconnect_in, "stopped retrying");

        // A stray timer fire does nothing after giving up
        bot.handle(BotEvent::ReconnectDue).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 11);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_failed_connect_enters_backoff() {
        let (mut bot, connector, root) = bot("xian-supervisor-connect-fails");
        connector.fail.store(true, Ordering::SeqCst);

        bot.connect();

        assert_eq!(bot.connection().phase(), Phase::Reconnecting);
        assert_eq!(bot.connection().attempt_count(), 1);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_spawn_records_login_and_arms_grace_timer() {
        let (mut bot, connector, root) = bot("xian-supervisor-spawn");
        bot.connect();
        bot.handle(ended(&bot)).await;
        bot.handle(BotEvent::ReconnectDue).await;

        bot.handle(spawned(&bot)).await;

        assert_eq!(bot.connection().phase(), Phase::Spawned);
        assert_eq!(bot.connection().attempt_count(), 0);
        assert!(bot.grace_timer.is_some());
        assert!(bot.tracker.is_enabled());
        let login: LastLogin = bot
            .state
            .data_dir
            .read_json(LAST_LOGIN_FILE)
            .unwrap()
            .unwrap();
        assert_eq!(login.server, "mc.example.com:25565");
        assert_eq!(login.username, "Bot");
        assert_eq!(bot.state.hub.status(), "Logged into game world");
        assert!(connector.last_client().is_some());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_grace_elapsed_starts_command_loop() {
        let (mut bot, connector, root) = bot("xian-supervisor-grace");
        bot.connect();
        bot.handle(spawned(&bot)).await;
        let fake = connector.last_client().unwrap();
        fake.ready.store(true, Ordering::SeqCst);

        bot.handle(BotEvent::GraceElapsed {
            session: bot.session,
        })
        .await;

        assert!(bot.scheduler.is_active());
        assert!(bot.state.hub.is_active());
        assert_eq!(bot.state.hub.status(), "Running /kiss Steve");

        // The first execution is queued immediately
        let first = bot.rx.try_recv().unwrap();
        bot.handle(first).await;
        assert_eq!(fake.sent(), vec!["/kiss Steve"]);
        let history = bot.state.hub.chat_history();
        assert_eq!(history.last().unwrap().text, "[action] #1 /kiss Steve");
        bot.scheduler.stop();
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_grace_from_old_session_is_ignored() {
        let (mut bot, connector, root) = bot("xian-supervisor-stale-grace");
        bot.connect();
        bot.handle(spawned(&bot)).await;
        let old_session = bot.session;
        bot.handle(ended(&bot)).await;
        bot.handle(BotEvent::ReconnectDue).await;
        bot.handle(spawned(&bot)).await;
        connector
            .last_client()
            .unwrap()
            .ready
            .store(true, Ordering::SeqCst);

        bot.handle(BotEvent::GraceElapsed {
            session: old_session,
        })
        .await;

        assert!(!bot.scheduler.is_active());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_events_from_old_session_are_dropped() {
        let (mut bot, _connector, root) = bot("xian-supervisor-stale-event");
        bot.connect();
        let old = bot.session;
        bot.handle(ended(&bot)).await;
        bot.handle(BotEvent::ReconnectDue).await;

        bot.handle(BotEvent::Client {
            session: old,
            event: ClientEvent::Ended {
                reason: "late".to_string(),
            },
        })
        .await;

        assert_eq!(bot.connection().attempt_count(), 1);
        assert_eq!(bot.connection().phase(), Phase::Connecting);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_disconnect_stops_command_loop() {
        let (mut bot, connector, root) = bot("xian-supervisor-stop-on-end");
        bot.connect();
        bot.handle(spawned(&bot)).await;
        connector
            .last_client()
            .unwrap()
            .ready
            .store(true, Ordering::SeqCst);
        bot.on_control(ControlCommand::Start);
        assert!(bot.scheduler.is_active());

        bot.handle(ended(&bot)).await;

        assert!(!bot.scheduler.is_active());
        assert!(!bot.state.hub.is_active());
        assert!(!bot.tracker.is_enabled());
        assert!(bot.grace_timer.is_none());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_keep_alive_only_while_spawned() {
        let (mut bot, connector, root) = bot("xian-supervisor-keep-alive");
        bot.connect();
        let client = connector.last_client().unwrap();

        bot.keep_alive();
        assert_eq!(client.keep_alives.load(Ordering::SeqCst), 0);

        bot.handle(spawned(&bot)).await;
        bot.keep_alive();
        bot.keep_alive();
        assert_eq!(client.keep_alives.load(Ordering::SeqCst), 2);

        bot.handle(ended(&bot)).await;
        bot.keep_alive();
        assert_eq!(client.keep_alives.load(Ordering::SeqCst), 2);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_presence_recorded_only_while_spawned() {
        let (mut bot, _connector, root) = bot("xian-supervisor-presence");
        bot.connect();
        let joined = |bot: &Bot<FakeConnector>| {
            client_event(
                bot,
                ClientEvent::PlayerJoined {
                    username: "Alex".to_string(),
                },
            )
        };

        bot.handle(joined(&bot)).await;
        assert!(bot.state.stores.activity().await.is_empty());

        bot.handle(spawned(&bot)).await;
        bot.handle(joined(&bot)).await;
        bot.handle(client_event(
            &bot,
            ClientEvent::PlayerLeft {
                username: "Alex".to_string(),
            },
        ))
        .await;

        let activity = bot.state.stores.activity().await;
        let events: Vec<ActivityEvent> = activity.iter().map(|e| e.event).collect();
        assert_eq!(events, vec![ActivityEvent::Joined, ActivityEvent::Left]);
        assert_eq!(
            bot.state.hub.chat_history().last().unwrap().text,
            "[system] Alex left the game"
        );
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_presence_records_any_reported_name() {
        let (mut bot, _connector, root) = bot("xian-supervisor-any-name");
        bot.connect();
        bot.handle(spawned(&bot)).await;

        for name in ["Player-1", "ThisNameIsSeventeen", "Cool Guy", ""] {
            bot.handle(client_event(
                &bot,
                ClientEvent::PlayerJoined {
                    username: name.to_string(),
                },
            ))
            .await;
        }

        let names: Vec<String> = bot
            .state
            .stores
            .activity()
            .await
            .into_iter()
            .map(|entry| entry.username)
            .collect();
        assert_eq!(names, vec!["Player-1", "ThisNameIsSeventeen", "Cool Guy"]);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_kick_and_errors_update_status() {
        let (mut bot, _connector, root) = bot("xian-supervisor-kick");
        bot.connect();

        bot.handle(client_event(
            &bot,
            ClientEvent::Error {
                name: "PartialReadError".to_string(),
                message: "Unexpected buffer end".to_string(),
            },
        ))
        .await;
        assert!(bot.state.hub.status().starts_with("Connecting"));

        bot.handle(client_event(
            &bot,
            ClientEvent::Error {
                name: "Error".to_string(),
                message: "ECONNRESET".to_string(),
            },
        ))
        .await;
        assert_eq!(bot.state.hub.status(), "Error: ECONNRESET");

        let reason = "x".repeat(80);
        bot.handle(client_event(&bot, ClientEvent::Kicked { reason }))
            .await;
        assert_eq!(
            bot.state.hub.status(),
            format!("Kicked: {}...", "x".repeat(50))
        );
        let kick: KickLog = bot.state.data_dir.read_json(KICK_LOG_FILE).unwrap().unwrap();
        assert_eq!(kick.reason.len(), 80);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_device_code_writes_login_info() {
        let (mut bot, _connector, root) = bot("xian-supervisor-device-code");
        bot.connect();

        bot.handle(client_event(
            &bot,
            ClientEvent::DeviceCode {
                user_code: "ABCD-EFGH".to_string(),
                verification_uri: "https://www.microsoft.com/link".to_string(),
                expires_in: 900,
            },
        ))
        .await;

        let info: LoginInfo = bot
            .state
            .data_dir
            .read_json(LOGIN_INFO_FILE)
            .unwrap()
            .unwrap();
        assert_eq!(info.user_code, "ABCD-EFGH");
        let requested = parse_ms(&info.requested_at).unwrap();
        let expires = parse_ms(&info.expires_at).unwrap();
        assert_eq!(expires - requested, 900_000);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_console_commands_reach_client() {
        let (mut bot, connector, root) = bot("xian-supervisor-console");
        bot.connect();
        let fake = connector.last_client().unwrap();

        bot.on_control(ControlCommand::Test);
        bot.on_control(ControlCommand::Raw("/list".to_string()));
        bot.on_control(ControlCommand::Stop);

        assert_eq!(
            fake.sent(),
            vec!["[test] message from the web console", "/list"]
        );
        assert_eq!(fake.quits.lock().unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_every_tenth_command_writes_stats() {
        let (mut bot, connector, root) = bot("xian-supervisor-stats");
        bot.connect();
        bot.handle(spawned(&bot)).await;
        connector
            .last_client()
            .unwrap()
            .ready
            .store(true, Ordering::SeqCst);
        bot.start_commands();

        // The spawn grace timer can fire in between, only count executions
        while bot.scheduler.count() < 10 {
            if let BotEvent::CommandDue { generation } = bot.rx.recv().await.unwrap() {
                bot.on_command_due(generation);
            }
        }

        let stats: CommandStats = bot
            .state
            .data_dir
            .read_json(COMMAND_STATS_FILE)
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_commands, 10);
        assert_eq!(stats.target_player, "Steve");
        bot.scheduler.stop();
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_shutdown_writes_log_and_quits() {
        let (mut bot, connector, root) = bot("xian-supervisor-shutdown");
        bot.connect();
        let fake = connector.last_client().unwrap();
        let (done, finished) = oneshot::channel();

        bot.handle(BotEvent::Shutdown { done }).await;

        assert!(finished.await.is_ok());
        let log: ShutdownLog = bot
            .state
            .data_dir
            .read_json(SHUTDOWN_LOG_FILE)
            .unwrap()
            .unwrap();
        assert!(log.uptime >= 0.0);
        assert_eq!(fake.quits.lock().unwrap().as_slice(), ["console shutdown"]);
        let _ = std::fs::remove_dir_all(root);
    }
}
