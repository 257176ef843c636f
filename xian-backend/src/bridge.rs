//! [`Connector`] that drives a protocol client sidecar process.
//!
//! The sidecar gets its connection settings through its environment, prints
//! one JSON event per line on stdout and reads one JSON request per line on
//! stdin:
//!
//! ```text
//! <- {"type":"spawn","username":"Bot"}
//! <- {"type":"players","position":{..},"online":3,"players":[..]}
//! -> {"op":"chat","text":"/kiss Steve"}
//! -> {"op":"keepalive"}
//! <- {"type":"end","reason":"socketClosed"}
//! ```

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::client::{
    ClientError, ClientEvent, Connector, EventSink, GameClient, PlayerSnapshot, Vec3, WorldView,
};
use crate::config::Config;

/// Longest line accepted from the sidecar
const MAX_LINE: usize = 4 * 1024 * 1024;

/// View distance requested from the server
const VIEW_DISTANCE: &str = "16";

/// One line of sidecar output.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum BridgeMessage {
    DeviceCode {
        user_code: String,
        verification_uri: String,
        expires_in: u64,
    },
    Spawn {
        username: String,
    },
    Message {
        text: String,
    },
    PlayerJoined {
        username: String,
    },
    PlayerLeft {
        username: String,
    },
    /// Replaces the cached world view
    Players {
        #[serde(default)]
        position: Option<Vec3>,
        #[serde(default)]
        online: usize,
        #[serde(default)]
        players: Vec<PlayerSnapshot>,
    },
    Kicked {
        reason: String,
    },
    Error {
        #[serde(default)]
        name: String,
        message: String,
    },
    End {
        #[serde(default)]
        reason: String,
    },
}

/// One line of sidecar input.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum BridgeRequest {
    Chat { text: String },
    Quit { reason: String },
    /// Nudge the view, sometimes jump, re-send the view distance
    KeepAlive,
}

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    spawned: AtomicBool,
    world: Mutex<WorldView>,
}

impl Shared {
    fn world(&self) -> std::sync::MutexGuard<'_, WorldView> {
        self.world.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConnector {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl BridgeConnector {
    pub fn new(program: impl Into<String>, args: Vec<String>, env: Vec<(String, String)>) -> Self {
        Self {
            program: program.into(),
            args,
            env,
        }
    }

    /// Split `BRIDGE_COMMAND` on whitespace and pass the connection settings
    /// as environment variables.
    pub fn from_config(config: &Config, auth_cache: &Path) -> Result<Self, ClientError> {
        let mut words = config.bridge_command.split_whitespace().map(str::to_string);
        let program = words.next().ok_or(ClientError::EmptyCommand)?;
        let mut env = vec![
            ("MC_SERVER".to_string(), config.mc_host.clone()),
            ("MC_PORT".to_string(), config.mc_port.to_string()),
            ("MC_VERSION".to_string(), config.mc_version.clone()),
            (
                "MC_AUTH_CACHE".to_string(),
                auth_cache.to_string_lossy().into_owned(),
            ),
            ("MC_VIEW_DISTANCE".to_string(), VIEW_DISTANCE.to_string()),
        ];
        if let Some(email) = &config.mc_email {
            env.push(("MC_EMAIL".to_string(), email.clone()));
        }
        Ok(Self::new(program, words.collect(), env))
    }
}

impl Connector for BridgeConnector {
    fn connect(&mut self, sink: EventSink) -> Result<Box<dyn GameClient>, ClientError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClientError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(ClientError::MissingPipe("stdout"))?;
        let stdin = child.stdin.take().ok_or(ClientError::MissingPipe("stdin"))?;
        info!(program = %self.program, pid = ?child.id(), session = sink.session(), "started protocol client");

        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::SeqCst);

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();
        tokio::spawn(write_requests(stdin, requests_rx));
        tokio::spawn(read_events(stdout, child, shared.clone(), sink, closed_rx));

        Ok(Box::new(BridgeClient {
            shared,
            requests: requests_tx,
            _closed: closed_tx,
        }))
    }
}

struct BridgeClient {
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<BridgeRequest>,
    /// Dropping the client kills the sidecar
    _closed: oneshot::Sender<()>,
}

impl GameClient for BridgeClient {
    fn username(&self) -> Option<String> {
        self.shared.world().username.clone()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst) && !self.requests.is_closed()
    }

    fn is_ready(&self) -> bool {
        self.is_connected() && self.shared.spawned.load(Ordering::SeqCst)
    }

    fn chat(&self, text: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Closed);
        }
        self.requests
            .send(BridgeRequest::Chat {
                text: text.to_string(),
            })
            .map_err(|_| ClientError::Closed)
    }

    fn quit(&self, reason: &str) {
        let request = BridgeRequest::Quit {
            reason: reason.to_string(),
        };
        if self.requests.send(request).is_err() {
            debug!("quit requested after the protocol client closed");
        }
    }

    fn keep_alive(&self) {
        if self.is_ready() {
            let _ = self.requests.send(BridgeRequest::KeepAlive);
        }
    }

    fn world(&self) -> WorldView {
        self.shared.world().clone()
    }
}

async fn write_requests<W>(stdin: W, mut requests: mpsc::UnboundedReceiver<BridgeRequest>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = FramedWrite::new(stdin, LinesCodec::new());
    while let Some(request) = requests.recv().await {
        let line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode protocol client request");
                continue;
            }
        };
        if let Err(e) = writer.send(line).await {
            warn!(error = %e, "protocol client stdin closed");
            break;
        }
    }
}

async fn read_events<R>(
    stdout: R,
    mut child: Child,
    shared: Arc<Shared>,
    sink: EventSink,
    mut closed: oneshot::Receiver<()>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE));
    let mut ended = false;

    loop {
        tokio::select! {
            _ = &mut closed => {
                debug!(session = sink.session(), "client dropped, stopping protocol client");
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "protocol client already gone");
                }
                ended = true;
                break;
            }
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    ended |= handle_line(&line, &shared, &sink);
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    sink.emit(ClientEvent::Error {
                        name: "PartialReadError".to_string(),
                        message: format!("protocol client line longer than {} bytes", MAX_LINE),
                    });
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    warn!(error = %e, "failed to read from protocol client");
                    break;
                }
                None => break,
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.spawned.store(false, Ordering::SeqCst);

    let status = child.wait().await;
    debug!(session = sink.session(), ?status, "protocol client exited");
    if !ended {
        let reason = match status {
            Ok(status) => format!("protocol client exited ({})", status),
            Err(e) => format!("protocol client lost: {}", e),
        };
        sink.emit(ClientEvent::Ended { reason });
    }
}

/// Apply one line of output. Returns true when it ended the session.
fn handle_line(line: &str, shared: &Shared, sink: &EventSink) -> bool {
    let message = match serde_json::from_str::<BridgeMessage>(line) {
        Ok(message) => message,
        Err(e) => {
            sink.emit(ClientEvent::Error {
                name: "PartialReadError".to_string(),
                message: format!("unreadable protocol client line: {}", e),
            });
            return false;
        }
    };

    let event = match message {
        BridgeMessage::DeviceCode {
            user_code,
            verification_uri,
            expires_in,
        } => ClientEvent::DeviceCode {
            user_code,
            verification_uri,
            expires_in,
        },
        BridgeMessage::Spawn { username } => {
            shared.spawned.store(true, Ordering::SeqCst);
            shared.world().username = Some(username.clone());
            ClientEvent::Spawned { username }
        }
        BridgeMessage::Message { text } => ClientEvent::Chat { text },
        BridgeMessage::PlayerJoined { username } => ClientEvent::PlayerJoined { username },
        BridgeMessage::PlayerLeft { username } => ClientEvent::PlayerLeft { username },
        BridgeMessage::Players {
            position,
            online,
            players,
        } => {
            let mut world = shared.world();
            world.position = position;
            world.player_count = online;
            world.players = players;
            return false;
        }
        BridgeMessage::Kicked { reason } => ClientEvent::Kicked { reason },
        BridgeMessage::Error { name, message } => ClientEvent::Error { name, message },
        BridgeMessage::End { reason } => {
            shared.connected.store(false, Ordering::SeqCst);
            shared.spawned.store(false, Ordering::SeqCst);
            sink.emit(ClientEvent::Ended { reason });
            return true;
        }
    };
    sink.emit(event);
    false
}
