//! Fixed-capacity, insertion-ordered buffers.
//!
//! Every in-memory store (per-player trajectories, the heatmap and the
//! activity log) is one of these. Appending past capacity evicts from the
//! head, so the buffer always holds the newest `capacity` items.

use std::collections::VecDeque;

/// Append-only buffer that keeps at most `capacity` items.
#[derive(Debug, Clone)]
pub struct BoundedSeries<T> {
  items: VecDeque<T>,
  capacity: usize,
}

impl<T> BoundedSeries<T> {
  /// Create an empty series. A zero capacity is treated as one.
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      items: VecDeque::with_capacity(capacity.min(1024)),
      capacity,
    }
  }

  /// Add an item at the tail, evicting from the head while over capacity.
  pub fn append(&mut self, item: T) {
    self.items.push_back(item);
    while self.items.len() > self.capacity {
      self.items.pop_front();
    }
  }

  /// Append every item in order. Equivalent to repeated `append`.
  pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
    for item in items {
      self.append(item);
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }

  pub fn into_vec(self) -> Vec<T> {
    self.items.into()
  }

  /// Borrowing iterator, oldest first.
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.items.iter()
  }
}

impl<T: Clone> BoundedSeries<T> {
  /// Copy of the current contents, oldest first.
  ///
  /// The copy is detached: later appends never show up in it.
  pub fn snapshot(&self) -> Vec<T> {
    self.items.iter().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_append_under_capacity_keeps_everything() {
    let mut series = BoundedSeries::new(5);
    series.append(1);
    series.append(2);
    assert_eq!(series.snapshot(), vec![1, 2]);
    assert_eq!(series.len(), 2);
  }

  #[test]
  fn test_eviction_drops_oldest() {
    let mut series = BoundedSeries::new(3);
    for item in ["A", "B", "C", "D"] {
      series.append(item);
    }
    assert_eq!(series.snapshot(), vec!["B", "C", "D"]);
  }

  #[test]
  fn test_holds_exactly_last_capacity_items() {
    for capacity in [1usize, 2, 7, 100] {
      let mut series = BoundedSeries::new(capacity);
      let total = capacity * 3 + 1;
      series.extend(0..total);
      let expected: Vec<usize> = (total - capacity..total).collect();
      assert_eq!(series.snapshot(), expected, "capacity {}", capacity);
    }
  }

  #[test]
  fn test_snapshot_is_detached_from_later_appends() {
    let mut series = BoundedSeries::new(2);
    series.append(1);
    let before = series.snapshot();
    series.append(2);
    series.append(3);
    assert_eq!(before, vec![1]);
    assert_eq!(series.snapshot(), vec![2, 3]);
  }

  #[test]
  fn test_zero_capacity_is_clamped() {
    let mut series = BoundedSeries::new(0);
    series.append('x');
    series.append('y');
    assert_eq!(series.capacity(), 1);
    assert_eq!(series.snapshot(), vec!['y']);
  }

  #[test]
  fn test_clear() {
    let mut series = BoundedSeries::new(4);
    series.extend([1, 2, 3]);
    series.clear();
    assert!(series.is_empty());
  }
}
