mod error;
pub mod history;
mod models;
pub mod persistence;
pub mod query;
pub mod series;
pub mod time;

pub use error::{Result, StoreError};
pub use models::{
  ActivityEntry, ActivityEvent, ChatItem, CommandStats, DisconnectLog, Equipment, HeatmapPoint,
  KickLog, LastLogin, LoginInfo, Position, ShutdownLog, Timestamped, TrajectoryPoint,
};
pub use persistence::DataDir;
pub use series::BoundedSeries;

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Series capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacities {
  /// Points kept per player
  pub trajectory: usize,
  pub heatmap: usize,
  pub activity: usize,
}

impl Default for Capacities {
  fn default() -> Self {
    Self {
      trajectory: 1000,
      heatmap: 10_000,
      activity: 5000,
    }
  }
}

/// Record counts reported by `/api/server-info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataStats {
  /// Number of players with a trajectory
  pub trajectories: usize,
  pub heatmap: usize,
  pub activity: usize,
}

/// All in-memory time series.
///
/// The bot loop is the only writer. HTTP handlers and the snapshot task read
/// through the snapshot methods, which copy under the lock, so a reader never
/// sees a half-applied append.
pub struct Stores {
  capacities: Capacities,
  trajectories: scc::HashMap<String, BoundedSeries<TrajectoryPoint>>,
  heatmap: RwLock<BoundedSeries<HeatmapPoint>>,
  activity: RwLock<BoundedSeries<ActivityEntry>>,
}

impl Stores {
  pub fn new(capacities: Capacities) -> Self {
    Self {
      capacities,
      trajectories: scc::HashMap::new(),
      heatmap: RwLock::new(BoundedSeries::new(capacities.heatmap)),
      activity: RwLock::new(BoundedSeries::new(capacities.activity)),
    }
  }

  /// Stores whose activity log starts from previously persisted history.
  pub fn with_activity(capacities: Capacities, history: Vec<ActivityEntry>) -> Self {
    let mut activity = BoundedSeries::new(capacities.activity);
    activity.extend(history);
    Self {
      activity: RwLock::new(activity),
      ..Self::new(capacities)
    }
  }

  pub fn capacities(&self) -> Capacities {
    self.capacities
  }

  // ========================================================================
  // Writes
  // ========================================================================

  /// Append a position sample to the player's trajectory and the heatmap.
  /// Returns the heatmap point that was recorded.
  pub async fn record_sample(&self, point: TrajectoryPoint) -> HeatmapPoint {
    let heat = HeatmapPoint::from_sample(&point);
    let username = point.username.clone();

    let mut pending = Some(point);
    self
      .trajectories
      .update_async(&username, |_, series| {
        if let Some(point) = pending.take() {
          series.append(point);
        }
      })
      .await;

    if let Some(point) = pending {
      let mut series = BoundedSeries::new(self.capacities.trajectory);
      series.append(point);
      if self.trajectories.insert_async(username.clone(), series).await.is_ok() {
        debug!(%username, "started trajectory");
      }
    }

    self.heatmap.write().await.append(heat.clone());
    heat
  }

  pub async fn record_activity(&self, entry: ActivityEntry) {
    self.activity.write().await.append(entry);
  }

  /// Empty every series.
  pub async fn clear(&self) {
    self.trajectories.retain_async(|_, _| false).await;
    self.heatmap.write().await.clear();
    self.activity.write().await.clear();
    info!("in-memory stores cleared");
  }

  // ========================================================================
  // Snapshots
  // ========================================================================

  pub async fn trajectory(&self, username: &str) -> Option<Vec<TrajectoryPoint>> {
    self
      .trajectories
      .read_async(username, |_, series| series.snapshot())
      .await
  }

  /// Every player's trajectory, keyed by username.
  pub async fn trajectories(&self) -> BTreeMap<String, Vec<TrajectoryPoint>> {
    let mut all = BTreeMap::new();
    self
      .trajectories
      .retain_async(|username, series| {
        all.insert(username.clone(), series.snapshot());
        true
      })
      .await;
    all
  }

  pub async fn heatmap(&self) -> Vec<HeatmapPoint> {
    self.heatmap.read().await.snapshot()
  }

  pub async fn activity(&self) -> Vec<ActivityEntry> {
    self.activity.read().await.snapshot()
  }

  pub async fn stats(&self) -> DataStats {
    DataStats {
      trajectories: self.trajectories.len(),
      heatmap: self.heatmap.read().await.len(),
      activity: self.activity.read().await.len(),
    }
  }
}

impl Default for Stores {
  fn default() -> Self {
    Self::new(Capacities::default())
  }
}
