//! The `LeafMatcher` trait: the per-shard side of a match.

pub mod threaded;

pub use threaded::ThreadedLeaf;

use crate::error::MatchResult;
use crate::stats::StatsGatherer;
use crate::types::{CollapseKey, DocId, Query, ShardIndex, Weight};
use crate::weighting::WeightingScheme;
use std::sync::Arc;

/// Everything a leaf needs to take part in one match.
///
/// Built by the orchestrator for each leaf when a match starts. Cheap to
/// clone and `'static`, so a leaf can ship it to a worker thread.
#[derive(Clone)]
pub struct LeafSession {
  /// Index of this leaf among the orchestrator's leaves.
  pub shard: ShardIndex,
  /// Number of leaves taking part.
  pub shard_count: usize,
  /// Match counter. A new value means a new match, even for the same query.
  pub round: u64,
  pub query: Arc<Query>,
  pub weighting: WeightingScheme,
  /// Local ids of the relevance set members stored in this shard.
  pub rset: Arc<[DocId]>,
  /// Value slot to read collapse keys from, if collapsing.
  pub collapse_slot: Option<u32>,
  /// Where to contribute and read collection statistics.
  pub stats: Arc<dyn StatsGatherer>,
}

impl std::fmt::Debug for LeafSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LeafSession")
      .field("shard", &self.shard)
      .field("shard_count", &self.shard_count)
      .field("round", &self.round)
      .field("query", &self.query)
      .field("weighting", &self.weighting)
      .field("rset", &self.rset.len())
      .field("collapse_slot", &self.collapse_slot)
      .finish_non_exhaustive()
  }
}

/// Outcome of one call to [`LeafMatcher::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
  /// The leaf can serve batches.
  Ready,
  /// Still waiting on something (typically the merged statistics); poll again.
  Pending,
}

/// A locally ranked entry, still carrying its shard-local id.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafItem {
  pub docid: DocId,
  pub score: Weight,
  pub collapse_key: Option<CollapseKey>,
}

impl LeafItem {
  pub fn new(docid: DocId, score: Weight) -> Self {
    Self {
      docid,
      score,
      collapse_key: None,
    }
  }

  pub fn with_collapse_key(mut self, key: impl Into<CollapseKey>) -> Self {
    self.collapse_key = Some(key.into());
    self
  }
}

/// Outcome of one call to [`LeafMatcher::next_batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum LeafBatch {
  /// Up to the requested number of entries. Never empty.
  Items(Vec<LeafItem>),
  /// Nothing available yet; poll again.
  Pending,
  /// No entries left.
  Exhausted,
}

/// Progress of a leaf through a match, as tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafState {
  Unprepared,
  Preparing,
  Ready,
  Draining,
  Exhausted,
  Failed,
}

impl LeafState {
  /// Whether the leaf may still produce entries.
  pub fn is_live(self) -> bool {
    matches!(self, LeafState::Ready | LeafState::Draining)
  }
}

/// A matcher over a single shard.
///
/// The orchestrator drives every leaf through the same steps: `prepare` until
/// it reports [`Preparation::Ready`], then `next_batch` until
/// [`LeafBatch::Exhausted`]. Both calls come in a non-blocking flavour
/// (`wait = false`), which must return promptly with `Pending` if the answer
/// is not at hand, and a blocking one, used when no leaf has anything ready.
///
/// Errors from either call abort the whole match. A leaf should not retry
/// internally on the orchestrator's behalf.
///
/// Leaves rank locally: entries come out of `next_batch` best first under
/// the leaf's own scores, and `remaining_upper_bound` must never understate
/// the score of an entry not yet returned.
pub trait LeafMatcher: Send {
  /// Binds the leaf to `session`. Idempotent: calling again after `Ready`
  /// returns `Ready` without redoing work, unless the session changed.
  fn prepare(&mut self, session: &LeafSession, wait: bool) -> MatchResult<Preparation>;

  /// Largest score this leaf can produce for the prepared query. Cheap.
  fn max_possible_score(&self) -> Weight;

  /// Largest score among entries not yet returned.
  fn remaining_upper_bound(&self) -> Weight {
    self.max_possible_score()
  }

  /// Next entries in local rank order, at most `max_count` of them.
  fn next_batch(&mut self, max_count: usize, wait: bool) -> MatchResult<LeafBatch>;

  /// Estimate of the entries not yet returned.
  fn remaining_estimate(&self) -> usize {
    0
  }

  /// Drops in-flight work after a failed or cancelled match.
  fn abandon(&mut self) {}
}

impl<L: LeafMatcher + ?Sized> LeafMatcher for Box<L> {
  fn prepare(&mut self, session: &LeafSession, wait: bool) -> MatchResult<Preparation> {
    (**self).prepare(session, wait)
  }

  fn max_possible_score(&self) -> Weight {
    (**self).max_possible_score()
  }

  fn remaining_upper_bound(&self) -> Weight {
    (**self).remaining_upper_bound()
  }

  fn next_batch(&mut self, max_count: usize, wait: bool) -> MatchResult<LeafBatch> {
    (**self).next_batch(max_count, wait)
  }

  fn remaining_estimate(&self) -> usize {
    (**self).remaining_estimate()
  }

  fn abandon(&mut self) {
    (**self).abandon()
  }
}
