//! The boundary between the bot loop and the Minecraft protocol client.
//!
//! The bot never talks to the network directly. A [`Connector`] produces a
//! [`GameClient`] for each session, and the client reports what happens in
//! the game as [`ClientEvent`]s through the [`EventSink`] it was given.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use xian_store::Equipment;

use crate::supervisor::BotEvent;

/// Something the game client observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Microsoft device-code login is waiting for the operator
    DeviceCode {
        user_code: String,
        verification_uri: String,
        /// Seconds until the code expires
        expires_in: u64,
    },
    Spawned {
        username: String,
    },
    Chat {
        text: String,
    },
    PlayerJoined {
        username: String,
    },
    PlayerLeft {
        username: String,
    },
    Kicked {
        reason: String,
    },
    Error {
        name: String,
        message: String,
    },
    /// The session is over. Exactly one per session.
    Ended {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A visible player entity as the client last saw it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub username: String,
    pub position: Vec3,
    #[serde(default)]
    pub health: f64,
    #[serde(default)]
    pub food: f64,
    #[serde(default)]
    pub experience: f64,
    #[serde(default)]
    pub armor: f64,
    #[serde(default)]
    pub is_sneaking: bool,
    #[serde(default)]
    pub is_sprinting: bool,
    #[serde(default)]
    pub yaw: f64,
    #[serde(default)]
    pub pitch: f64,
    /// Item names by slot: main hand, off hand, helmet, chestplate, leggings, boots
    #[serde(default)]
    pub equipment: Vec<Option<String>>,
}

impl PlayerSnapshot {
    pub fn equipment(&self) -> Equipment {
        let slot = |idx: usize| {
            self.equipment
                .get(idx)
                .cloned()
                .flatten()
                .unwrap_or_else(|| "none".to_string())
        };
        Equipment {
            main_hand: slot(0),
            off_hand: slot(1),
            helmet: slot(2),
            chestplate: slot(3),
            leggings: slot(4),
            boots: slot(5),
        }
    }
}

/// What the bot can currently see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldView {
    /// The bot's own name, once known
    pub username: Option<String>,
    /// The bot's own position, once spawned
    pub position: Option<Vec3>,
    /// Players with a loaded entity
    pub players: Vec<PlayerSnapshot>,
    /// Everyone in the tab list, visible or not
    pub player_count: usize,
}

impl WorldView {
    /// Visible players other than the bot itself.
    pub fn others(&self) -> impl Iterator<Item = &PlayerSnapshot> {
        self.players
            .iter()
            .filter(move |p| self.username.as_deref() != Some(p.username.as_str()))
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("client process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("client command line is empty")]
    EmptyCommand,

    #[error("client connection is closed")]
    Closed,
}

/// A live protocol session.
pub trait GameClient: Send + Sync {
    fn username(&self) -> Option<String>;

    fn is_connected(&self) -> bool;

    /// Connected and spawned into the world
    fn is_ready(&self) -> bool;

    fn chat(&self, text: &str) -> Result<(), ClientError>;

    fn quit(&self, reason: &str);

    /// Small idle movement so the server does not kick the bot as AFK
    fn keep_alive(&self);

    fn world(&self) -> WorldView;
}

/// Opens protocol sessions.
pub trait Connector: Send {
    fn connect(&mut self, sink: EventSink) -> Result<Box<dyn GameClient>, ClientError>;
}

/// Delivers a session's events to the bot loop, tagged with the session.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: u64,
    tx: UnboundedSender<BotEvent>,
}

impl EventSink {
    pub fn new(session: u64, tx: UnboundedSender<BotEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Returns false once the bot loop has gone away.
    pub fn emit(&self, event: ClientEvent) -> bool {
        self.tx
            .send(BotEvent::Client {
                session: self.session,
                event,
            })
            .is_ok()
    }
}
