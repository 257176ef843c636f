use serde::{Deserialize, Serialize};

/// Block position, rounded to whole blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Position {
  pub x: i64,
  pub y: i64,
  pub z: i64,
}

/// Item names in the six equipment slots ("none" when empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
  pub main_hand: String,
  pub off_hand: String,
  pub helmet: String,
  pub chestplate: String,
  pub leggings: String,
  pub boots: String,
}

impl Default for Equipment {
  fn default() -> Self {
    let none = || "none".to_string();
    Self {
      main_hand: none(),
      off_hand: none(),
      helmet: none(),
      chestplate: none(),
      leggings: none(),
      boots: none(),
    }
  }
}

/// One sample of a player's state. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryPoint {
  pub username: String,
  pub position: Position,
  pub health: f64,
  pub food: f64,
  pub experience: f64,
  pub armor: f64,
  pub is_sneaking: bool,
  pub is_sprinting: bool,
  pub yaw: f64,
  pub pitch: f64,
  pub equipment: Equipment,
  /// ISO-8601 UTC
  pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapPoint {
  pub x: i64,
  pub y: i64,
  pub z: i64,
  pub username: String,
  pub health: f64,
  pub is_active: bool,
  pub time: String,
}

impl HeatmapPoint {
  /// Heatmap entry derived from a trajectory sample.
  pub fn from_sample(point: &TrajectoryPoint) -> Self {
    Self {
      x: point.position.x,
      y: point.position.y,
      z: point.position.z,
      username: point.username.clone(),
      health: point.health,
      is_active: true,
      time: point.time.clone(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityEvent {
  Joined,
  Left,
}

impl ActivityEvent {
  pub fn as_str(&self) -> &'static str {
    match self {
      ActivityEvent::Joined => "joined",
      ActivityEvent::Left => "left",
    }
  }
}

/// A player joining or leaving, as seen by the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
  pub username: String,
  pub event: ActivityEvent,
  /// ISO-8601 UTC
  pub time: String,
  /// Unix epoch milliseconds
  pub timestamp: i64,
}

/// A line of the dashboard chat feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatItem {
  /// Local wall-clock time, `HH:MM:SS`
  pub time: String,
  pub text: String,
}

/// Records that expose an ISO-8601 `time` for range filtering.
pub trait Timestamped {
  fn time(&self) -> &str;
}

impl Timestamped for TrajectoryPoint {
  fn time(&self) -> &str {
    &self.time
  }
}

impl Timestamped for HeatmapPoint {
  fn time(&self) -> &str {
    &self.time
  }
}

impl Timestamped for ActivityEntry {
  fn time(&self) -> &str {
    &self.time
  }
}

// ============================================================================
// Status records (single-object JSON files)
// ============================================================================

/// Pending Microsoft device-code login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginInfo {
  pub user_code: String,
  pub verification_uri: String,
  pub expires_at: String,
  pub requested_at: String,
}

/// Last successful entry into the game world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastLogin {
  pub last_login: String,
  pub server: String,
  pub username: String,
  pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStats {
  pub last_update: String,
  pub total_commands: u64,
  pub target_player: String,
  pub command_delay: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectLog {
  pub time: String,
  pub reason: String,
  /// `"<secs>s"`, or `"stopped retrying"` once the attempt ceiling is hit
  pub reconnect_in: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KickLog {
  pub time: String,
  pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownLog {
  pub time: String,
  pub reason: String,
  /// Process uptime in seconds
  pub uptime: f64,
}
