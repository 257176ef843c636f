//! Live dashboard feed over a web socket.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`. The bot loop
//! publishes through the [`Hub`]; each socket task forwards the broadcast
//! and queues inbound `command` frames back into the bot loop.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use xian_store::time::local_clock;
use xian_store::{BoundedSeries, ChatItem, HeatmapPoint, TrajectoryPoint};

use crate::AppState;
use crate::supervisor::ControlCommand;

/// Chat lines replayed to a newly connected dashboard
pub const CHAT_HISTORY: usize = 200;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceChange {
    pub username: String,
    pub time: String,
}

/// Server to dashboard events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Status(String),
    Chat(ChatItem),
    ChatHistory(Vec<ChatItem>),
    ControlState {
        #[serde(rename = "isActive")]
        is_active: bool,
    },
    PlayerJoined(PresenceChange),
    PlayerLeft(PresenceChange),
    PlayerPosition {
        username: String,
        position: TrajectoryPoint,
    },
    PlayerTrajectories(BTreeMap<String, Vec<TrajectoryPoint>>),
    HeatmapData(Vec<HeatmapPoint>),
}

/// Dashboard to server messages.
#[derive(Debug, Deserialize)]
struct Inbound {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Fan-out point for dashboard events plus the state a new socket needs.
pub struct Hub {
    tx: broadcast::Sender<Arc<ServerEvent>>,
    status: Mutex<String>,
    chat: Mutex<BoundedSeries<ChatItem>>,
    active: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            status: Mutex::new("Initializing...".to_string()),
            chat: Mutex::new(BoundedSeries::new(CHAT_HISTORY)),
            active: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServerEvent>> {
        self.tx.subscribe()
    }

    pub fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    /// Broadcast to every connected dashboard. Nobody listening is fine.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        *lock(&self.status) = status.clone();
        self.publish(ServerEvent::Status(status));
    }

    pub fn status(&self) -> String {
        lock(&self.status).clone()
    }

    /// Add a line to the chat feed, stamped with the local time.
    pub fn push_chat(&self, text: impl Into<String>) {
        let item = ChatItem {
            time: local_clock(),
            text: text.into(),
        };
        lock(&self.chat).append(item.clone());
        self.publish(ServerEvent::Chat(item));
    }

    pub fn chat_history(&self) -> Vec<ChatItem> {
        lock(&self.chat).snapshot()
    }

    /// Record the command loop state and push `control-state`.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
        self.publish(ServerEvent::ControlState { is_active: active });
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Frames sent to a socket right after it connects.
    pub fn greeting(&self) -> Vec<ServerEvent> {
        vec![
            ServerEvent::Status(self.status()),
            ServerEvent::ChatHistory(self.chat_history()),
            ServerEvent::ControlState {
                is_active: self.is_active(),
            },
        ]
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode an inbound frame into a bot command. Unknown events and rejected
/// console input give `None`.
pub fn parse_inbound(frame: &str) -> Option<ControlCommand> {
    let inbound: Inbound = match serde_json::from_str(frame) {
        Ok(inbound) => inbound,
        Err(e) => {
            debug!(error = %e, "ignoring unreadable dashboard frame");
            return None;
        }
    };
    if inbound.event != "command" {
        debug!(event = %inbound.event, "ignoring dashboard event");
        return None;
    }
    let text = inbound.data.as_str()?;
    ControlCommand::parse(text)
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!(error = %e, "failed to serialize dashboard event");
            None
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, peer: SocketAddr) {
    info!(%peer, "dashboard connected");
    let mut events = state.hub.subscribe();

    for event in state.hub.greeting() {
        let Some(message) = encode(&event) else {
            continue;
        };
        if let Err(e) = socket.send(message).await {
            warn!(%peer, error = %e, "failed to send initial state");
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(command) = parse_inbound(text.as_str()) {
                        info!(%peer, ?command, "dashboard command");
                        if !state.bot.control(command) {
                            warn!("bot loop is gone, dropping dashboard command");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(%peer, ?frame, "dashboard sent close");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%peer, error = %e, "dashboard socket error");
                    break;
                }
                None => break,
            },
            outgoing = events.recv() => match outgoing {
                Ok(event) => {
                    let Some(message) = encode(&event) else {
                        continue;
                    };
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%peer, skipped, "dashboard lagged behind, skipping events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    info!(%peer, "dashboard disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xian_store::{Equipment, Position};

    #[test]
    fn test_event_frames() {
        let frame = serde_json::to_value(ServerEvent::Status("Running".to_string())).unwrap();
        assert_eq!(frame, json!({"event": "status", "data": "Running"}));

        let frame = serde_json::to_value(ServerEvent::ControlState { is_active: true }).unwrap();
        assert_eq!(frame, json!({"event": "control-state", "data": {"isActive": true}}));

        let frame = serde_json::to_value(ServerEvent::PlayerLeft(PresenceChange {
            username: "Alex".to_string(),
            time: "2024-01-01T00:00:00.000Z".to_string(),
        }))
        .unwrap();
        assert_eq!(frame["event"], "player-left");
        assert_eq!(frame["data"]["username"], "Alex");
    }

    #[test]
    fn test_player_position_frame() {
        let point = TrajectoryPoint {
            username: "Alex".to_string(),
            position: Position { x: 1, y: 2, z: 3 },
            health: 20.0,
            food: 20.0,
            experience: 0.0,
            armor: 0.0,
            is_sneaking: true,
            is_sprinting: false,
            yaw: 0.0,
            pitch: 0.0,
            equipment: Equipment::default(),
            time: "2024-01-01T00:00:00.000Z".to_string(),
        };
        let frame = serde_json::to_value(ServerEvent::PlayerPosition {
            username: "Alex".to_string(),
            position: point,
        })
        .unwrap();
        assert_eq!(frame["event"], "player-position");
        assert_eq!(frame["data"]["position"]["isSneaking"], true);
        assert_eq!(frame["data"]["position"]["equipment"]["mainHand"], "none");
    }

    #[test]
    fn test_chat_history_is_capped() {
        let hub = Hub::new();
        for i in 0..(CHAT_HISTORY + 5) {
            hub.push_chat(format!("line {}", i));
        }
        let history = hub.chat_history();
        assert_eq!(history.len(), CHAT_HISTORY);
        assert_eq!(history[0].text, "line 5");
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let hub = Hub::new();
        let mut rx = hub.subscribe();

        hub.set_status("Logged into game world");
        hub.set_active(true);

        assert_eq!(
            *rx.recv().await.unwrap(),
            ServerEvent::Status("Logged into game world".to_string())
        );
        assert_eq!(
            *rx.recv().await.unwrap(),
            ServerEvent::ControlState { is_active: true }
        );
        assert_eq!(hub.status(), "Logged into game world");
        assert!(hub.is_active());
    }

    #[test]
    fn test_greeting_order() {
        let hub = Hub::new();
        hub.push_chat("hello");
        let greeting = hub.greeting();
        assert!(matches!(greeting[0], ServerEvent::Status(_)));
        assert!(matches!(&greeting[1], ServerEvent::ChatHistory(items) if items.len() == 1));
        assert_eq!(greeting[2], ServerEvent::ControlState { is_active: false });
    }

    #[test]
    fn test_parse_inbound() {
        assert_eq!(
            parse_inbound(r#"{"event":"command","data":"start"}"#),
            Some(ControlCommand::Start)
        );
        assert_eq!(
            parse_inbound(r#"{"event":"command","data":"/say hi"}"#),
            Some(ControlCommand::Raw("/say hi".to_string()))
        );
        assert_eq!(parse_inbound(r#"{"event":"command","data":"say hi"}"#), None);
        assert_eq!(parse_inbound(r#"{"event":"other","data":"start"}"#), None);
        assert_eq!(parse_inbound(r#"{"event":"command","data":5}"#), None);
        assert_eq!(parse_inbound("not json"), None);
    }
}
