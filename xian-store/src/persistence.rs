//! On-disk layout of the bot's data directory.
//!
//! Every concern owns one file. Status records are single JSON objects,
//! the trajectory map and heatmap are rewritten whole on every snapshot, and
//! the activity log is written as JSON Lines.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::Stores;

pub const LOGIN_INFO_FILE: &str = "login-info.json";
pub const LAST_LOGIN_FILE: &str = "last-login.json";
pub const TRAJECTORIES_FILE: &str = "player-trajectories.json";
pub const HEATMAP_FILE: &str = "heatmap-data.json";
pub const ACTIVITY_FILE: &str = "player-activity.json";
pub const COMMAND_STATS_FILE: &str = "command-stats.json";
pub const DISCONNECT_LOG_FILE: &str = "disconnect-log.json";
pub const KICK_LOG_FILE: &str = "kick-log.json";
pub const SHUTDOWN_LOG_FILE: &str = "shutdown-log.json";

/// Subdirectory handed to the protocol client for its token cache.
pub const AUTH_CACHE_DIR: &str = "auth-cache";

/// A directory entry, as listed in the startup banner.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
  pub name: String,
  pub size: u64,
  pub is_dir: bool,
}

/// Handle to the data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
  root: PathBuf,
}

impl DataDir {
  /// Open the directory, creating it (and the auth cache) if missing.
  pub fn open(root: impl AsRef<Path>) -> Result<Self> {
    let root = root.as_ref().to_path_buf();
    let auth = root.join(AUTH_CACHE_DIR);
    fs::create_dir_all(&auth).map_err(|e| StoreError::io(&auth, e))?;
    info!(path = %root.display(), "data directory ready");
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn path(&self, file: &str) -> PathBuf {
    self.root.join(file)
  }

  pub fn auth_cache(&self) -> PathBuf {
    self.root.join(AUTH_CACHE_DIR)
  }

  /// Replace `file` with `contents`. Writes a sibling temp file first and
  /// renames it over the target, so readers see the old or the new contents.
  pub fn write_atomic(&self, file: &str, contents: &[u8]) -> Result<()> {
    let target = self.path(file);
    let staging = self.path(&format!(".{}.tmp", file));
    fs::write(&staging, contents).map_err(|e| StoreError::io(&staging, e))?;
    fs::rename(&staging, &target).map_err(|e| StoreError::io(&target, e))?;
    Ok(())
  }

  /// Serialize `value` as one JSON document into `file`.
  pub fn write_json<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    self.write_atomic(file, &bytes)
  }

  /// Serialize each record on its own line.
  pub fn write_lines<T: Serialize>(&self, file: &str, records: &[T]) -> Result<()> {
    let lines = records
      .iter()
      .map(serde_json::to_string)
      .collect::<std::result::Result<Vec<_>, _>>()?;
    self.write_atomic(file, lines.join("\n").as_bytes())
  }

  /// Raw file contents, `None` when the file does not exist.
  pub fn read_to_string(&self, file: &str) -> Result<Option<String>> {
    let path = self.path(file);
    match fs::read_to_string(&path) {
      Ok(text) => Ok(Some(text)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(StoreError::io(&path, e)),
    }
  }

  /// Parse `file` as one JSON document, `None` when it does not exist.
  pub fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
    match self.read_to_string(file)? {
      Some(text) => Ok(Some(serde_json::from_str(&text)?)),
      None => Ok(None),
    }
  }

  /// Write a status record, logging instead of failing.
  pub fn record<T: Serialize>(&self, file: &str, value: &T) {
    match self.write_json(file, value) {
      Ok(()) => debug!(file, "status record written"),
      Err(e) => warn!(file, error = %e, "failed to write status record"),
    }
  }

  /// Delete every `*.json` file at the top level. Returns the deleted names.
  pub fn clear_json_files(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
    for entry in entries {
      let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
      let name = entry.file_name().to_string_lossy().into_owned();
      if !name.ends_with(".json") || !entry.path().is_file() {
        continue;
      }
      fs::remove_file(entry.path()).map_err(|e| StoreError::io(entry.path(), e))?;
      info!(file = %name, "deleted data file");
      deleted.push(name);
    }
    deleted.sort();
    Ok(deleted)
  }

  /// Top-level entries, sorted by name.
  pub fn listing(&self) -> Result<Vec<DirEntry>> {
    let mut listing = Vec::new();
    let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
    for entry in entries.flatten() {
      let Ok(meta) = entry.metadata() else {
        continue;
      };
      listing.push(DirEntry {
        name: entry.file_name().to_string_lossy().into_owned(),
        size: meta.len(),
        is_dir: meta.is_dir(),
      });
    }
    listing.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listing)
  }
}

/// Which files a snapshot pass wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotReport {
  pub written: Vec<&'static str>,
  pub failed: Vec<&'static str>,
}

/// Write every non-empty store to disk.
///
/// Each file is attempted independently; a failure is logged and the pass
/// moves on. Nothing is retried until the next call.
pub async fn snapshot(stores: &Stores, dir: &DataDir) -> SnapshotReport {
  let mut report = SnapshotReport::default();

  let trajectories = stores.trajectories().await;
  if !trajectories.is_empty() {
    tally(&mut report, TRAJECTORIES_FILE, dir.write_json(TRAJECTORIES_FILE, &trajectories));
  }

  let heatmap = stores.heatmap().await;
  if !heatmap.is_empty() {
    tally(&mut report, HEATMAP_FILE, dir.write_json(HEATMAP_FILE, &heatmap));
  }

  let activity = stores.activity().await;
  if !activity.is_empty() {
    tally(&mut report, ACTIVITY_FILE, dir.write_lines(ACTIVITY_FILE, &activity));
  }

  report
}

/// Snapshot the stores every `period` until the task is aborted.
pub async fn snapshot_loop(stores: Arc<Stores>, dir: DataDir, period: Duration) {
  info!(period_secs = period.as_secs(), "starting snapshot loop");
  let mut interval = tokio::time::interval(period);
  interval.tick().await; // Consume the initial immediate tick

  loop {
    interval.tick().await;
    let report = snapshot(&stores, &dir).await;
    debug!(written = ?report.written, failed = ?report.failed, "snapshot pass finished");
  }
}

fn tally(report: &mut SnapshotReport, file: &'static str, result: Result<()>) {
  match result {
    Ok(()) => report.written.push(file),
    Err(e) => {
      warn!(file, error = %e, "snapshot write failed");
      report.failed.push(file);
    }
  }
}
