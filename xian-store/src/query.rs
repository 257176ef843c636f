//! Read-side pagination over series snapshots.
//!
//! Pages are anchored at the tail: offset 0 returns the newest `limit`
//! records (newest last), and a larger offset walks back in time. Filters
//! run over the whole snapshot before the window is cut.

use std::ops::Range;

use crate::models::Timestamped;
use crate::time::parse_ms;

/// Default page size for trajectories and the activity log.
pub const DEFAULT_LIMIT: usize = 500;

/// Default page size for the heatmap.
pub const DEFAULT_HEATMAP_LIMIT: usize = 5000;

/// Inclusive time window in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
  start: Option<i64>,
  end: Option<i64>,
}

impl TimeRange {
  pub fn unbounded() -> Self {
    Self::default()
  }

  pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
    Self { start, end }
  }

  /// Build from raw query strings. A bound that does not parse is dropped,
  /// which is the same as `0` for the start and `+inf` for the end.
  pub fn from_raw(start: Option<&str>, end: Option<&str>) -> Self {
    Self {
      start: start.and_then(parse_ms),
      end: end.and_then(parse_ms),
    }
  }

  pub fn is_unbounded(&self) -> bool {
    self.start.is_none() && self.end.is_none()
  }

  /// Whether a record stamped `time` falls inside the window. Records with
  /// an unreadable time only match an unbounded window.
  pub fn contains(&self, time: &str) -> bool {
    if self.is_unbounded() {
      return true;
    }
    let Some(at) = parse_ms(time) else {
      return false;
    };
    at >= self.start.unwrap_or(0) && at <= self.end.unwrap_or(i64::MAX)
  }
}

/// Normalized pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
  pub limit: usize,
  pub offset: usize,
  pub range: TimeRange,
}

impl PageRequest {
  pub fn new(limit: usize, offset: usize) -> Self {
    Self {
      limit,
      offset,
      range: TimeRange::unbounded(),
    }
  }

  /// Coerce raw `limit`/`offset` strings. A limit that is missing,
  /// unparseable or not positive becomes `default_limit`; an offset that is
  /// missing, unparseable or negative becomes 0.
  pub fn from_raw(limit: Option<&str>, offset: Option<&str>, default_limit: usize) -> Self {
    let limit = limit
      .and_then(parse_int)
      .filter(|value| *value > 0)
      .map(|value| value as usize)
      .unwrap_or(default_limit);
    let offset = offset
      .and_then(parse_int)
      .filter(|value| *value >= 0)
      .map(|value| value as usize)
      .unwrap_or(0);
    Self::new(limit, offset)
  }

  pub fn with_range(mut self, range: TimeRange) -> Self {
    self.range = range;
    self
  }
}

/// One page of results plus the counts the API reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub data: Vec<T>,
  /// Number of records left after filtering, before the window is cut.
  pub total: usize,
  pub limit: usize,
  pub offset: usize,
  pub has_more: bool,
}

impl<T> Page<T> {
  pub fn empty(request: &PageRequest) -> Self {
    Self {
      data: Vec::new(),
      total: 0,
      limit: request.limit,
      offset: request.offset,
      has_more: false,
    }
  }
}

/// Slice bounds of the tail window: `[max(0, n-limit-offset), max(0, n-offset))`.
pub fn tail_window(len: usize, limit: usize, offset: usize) -> Range<usize> {
  let end = len.saturating_sub(offset);
  let start = len.saturating_sub(limit.saturating_add(offset));
  start..end
}

/// Filter `items` by the request's time range and `keep`, then cut the tail window.
pub fn page<T, F>(items: &[T], request: &PageRequest, keep: F) -> Page<T>
where
  T: Clone + Timestamped,
  F: Fn(&T) -> bool,
{
  let filtered: Vec<&T> = items
    .iter()
    .filter(|item| request.range.contains(item.time()) && keep(*item))
    .collect();
  page_filtered(&filtered, request)
}

/// Cut the tail window without any filtering.
pub fn page_all<T: Clone>(items: &[T], request: &PageRequest) -> Page<T> {
  let refs: Vec<&T> = items.iter().collect();
  page_filtered(&refs, request)
}

fn page_filtered<T: Clone>(filtered: &[&T], request: &PageRequest) -> Page<T> {
  let total = filtered.len();
  let window = tail_window(total, request.limit, request.offset);
  Page {
    data: filtered[window].iter().map(|item| (*item).clone()).collect(),
    total,
    limit: request.limit,
    offset: request.offset,
    has_more: total > request.offset.saturating_add(request.limit),
  }
}

/// Leading-integer parse: `" 25 "` and `"25px"` give 25, `"abc"` gives `None`.
pub fn parse_int(raw: &str) -> Option<i64> {
  let trimmed = raw.trim();
  let digits_end = trimmed
    .char_indices()
    .find(|(idx, c)| !(c.is_ascii_digit() || (*idx == 0 && (*c == '-' || *c == '+'))))
    .map(|(idx, _)| idx)
    .unwrap_or(trimmed.len());
  trimmed[..digits_end].parse().ok()
}
