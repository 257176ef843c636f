//! Startup reload of the activity log.
//!
//! The log is stored as JSON Lines. Older builds wrote a single JSON array,
//! which is still accepted when the file does not read as JSON Lines.

use tracing::{info, warn};

use crate::models::ActivityEntry;
use crate::persistence::{ACTIVITY_FILE, DataDir};
use crate::series::BoundedSeries;

/// Outcome of a history load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
  /// Records recovered before truncation
  pub loaded: usize,
  /// Lines that failed to parse
  pub skipped_lines: usize,
  /// Whether the legacy whole-array format was used
  pub legacy: bool,
}

/// Parse activity records from file contents.
///
/// Each non-blank line is parsed on its own and bad lines are skipped. If
/// any line failed, the whole text is tried once as a legacy JSON array and,
/// when that succeeds, the array wins.
pub fn parse_activity(content: &str) -> (Vec<ActivityEntry>, LoadReport) {
  let mut entries = Vec::new();
  let mut report = LoadReport::default();

  for (idx, line) in content.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    match serde_json::from_str::<ActivityEntry>(line) {
      Ok(entry) => entries.push(entry),
      Err(e) => {
        warn!(line = idx + 1, error = %e, "skipping unreadable activity record");
        report.skipped_lines += 1;
      }
    }
  }

  if report.skipped_lines > 0 {
    if let Ok(legacy) = serde_json::from_str::<Vec<ActivityEntry>>(content) {
      info!(records = legacy.len(), "activity log is in legacy array format");
      entries = legacy;
      report.skipped_lines = 0;
      report.legacy = true;
    }
  }

  report.loaded = entries.len();
  (entries, report)
}

/// Load the persisted activity log into a series of `capacity`.
///
/// Never fails: a missing file gives an empty log, and a read error is
/// logged and also gives an empty log.
pub fn load_activity(dir: &DataDir, capacity: usize) -> (BoundedSeries<ActivityEntry>, LoadReport) {
  let mut series = BoundedSeries::new(capacity);

  let content = match dir.read_to_string(ACTIVITY_FILE) {
    Ok(Some(content)) => content,
    Ok(None) => return (series, LoadReport::default()),
    Err(e) => {
      warn!(error = %e, "failed to read activity history");
      return (series, LoadReport::default());
    }
  };

  let (entries, report) = parse_activity(&content);
  series.extend(entries);
  if report.loaded > 0 {
    info!(
      loaded = report.loaded,
      kept = series.len(),
      skipped = report.skipped_lines,
      "loaded player activity history"
    );
  }
  (series, report)
}
