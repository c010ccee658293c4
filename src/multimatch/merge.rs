//! Bounded, collapse-aware merge of entries arriving from many leaves.

use crate::compare::MatchComparator;
use crate::types::{CollapseKey, MatchItem, Weight};
use std::collections::HashMap;

/// Keeps the best `capacity` entries seen so far, in comparator order, with
/// at most one entry per collapse key.
///
/// The result never depends on the order entries are pushed in: an entry
/// is discarded only when `capacity` better ones are already held, and the
/// held set only ever gets better, so a discarded entry could never have
/// made the cut. For collapsing, the best entry seen per key is remembered
/// even after it falls out of the buffer, which lets a later, worse
/// duplicate be recognised as one.
#[derive(Debug)]
pub struct MergeBuffer {
  comparator: MatchComparator,
  capacity: usize,
  items: Vec<MatchItem>,
  best_by_key: HashMap<CollapseKey, MatchItem>,
  accepted: usize,
  collapsed: usize,
  max_attained: Weight,
}

impl MergeBuffer {
  pub fn new(comparator: MatchComparator, capacity: usize) -> Self {
    Self {
      comparator,
      capacity,
      items: Vec::with_capacity(capacity.min(1024)),
      best_by_key: HashMap::new(),
      accepted: 0,
      collapsed: 0,
      max_attained: 0.0,
    }
  }

  /// Folds one accepted entry in.
  pub fn push(&mut self, item: MatchItem) {
    self.accepted += 1;
    if self.accepted == 1 || item.score > self.max_attained {
      self.max_attained = item.score;
    }

    if let Some(key) = item.effective_key() {
      if let Some(best) = self.best_by_key.get(key) {
        self.collapsed += 1;
        if self.comparator.ranks_before(best, &item) {
          return;
        }
        // The newcomer displaces the previous holder of its key.
        let displaced = best.docid;
        self.items.retain(|held| held.docid != displaced);
      }
      self.best_by_key.insert(key.to_vec(), item.clone());
    }

    let position = self
      .items
      .partition_point(|held| self.comparator.ranks_before(held, &item));
    if position >= self.capacity {
      return;
    }
    self.items.insert(position, item);
    self.items.truncate(self.capacity);
  }

  /// Whether the buffer holds `capacity` entries.
  pub fn is_full(&self) -> bool {
    self.items.len() >= self.capacity
  }

  /// The worst entry held, once full.
  pub fn tail(&self) -> Option<&MatchItem> {
    if self.is_full() {
      self.items.last()
    } else {
      None
    }
  }

  /// Whether no entry scoring at most `bound` could still get in.
  pub fn excludes(&self, bound: Weight) -> bool {
    self
      .tail()
      .is_some_and(|tail| self.comparator.bound_cannot_beat(bound, tail))
  }

  /// Entries accepted and not collapsed away.
  pub fn distinct(&self) -> usize {
    self.accepted - self.collapsed
  }

  pub fn max_attained(&self) -> Weight {
    self.max_attained
  }

  /// Splits off the window `[first, first + maxitems)` and reports whether
  /// anything ranked after it.
  pub fn into_window(self, first: usize, maxitems: usize) -> (Vec<MatchItem>, bool) {
    let has_more = self.items.len() > first.saturating_add(maxitems);
    let window = self.items.into_iter().skip(first).take(maxitems).collect();
    (window, has_more)
  }
}
