//! Cross-shard statistics.
//!
//! Every leaf scores against the same collection statistics, otherwise a term
//! that is common in one shard but rare overall would be weighted differently
//! depending on where a document happens to live. Leaves contribute their
//! local counts to a [`StatsGatherer`] during preparation and read back the
//! merged [`StatsSnapshot`] once every shard has contributed.

pub mod local;
pub mod network;

pub use local::LocalStatsGatherer;
pub use network::{LoopbackLink, NetworkStatsGatherer, StatsLink, StatsReply, StatsRequest, StatsServer};

use crate::error::MatchResult;
use crate::types::ShardIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-term counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermStats {
  /// Documents containing the term.
  pub termfreq: u64,
  /// Total occurrences of the term.
  pub collfreq: u64,
  /// Documents of the relevance set containing the term.
  pub reltermfreq: u64,
}

impl TermStats {
  fn add(&mut self, other: &TermStats) {
    self.termfreq += other.termfreq;
    self.collfreq += other.collfreq;
    self.reltermfreq += other.reltermfreq;
  }
}

/// Counters of one shard (or, once merged, of the whole federation) for the
/// terms of the current query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
  /// Number of documents.
  pub collection_size: u64,
  /// Sum of document lengths.
  pub total_length: u64,
  /// Size of the relevance set.
  pub rset_size: u64,
  /// Counters per query term.
  pub terms: BTreeMap<String, TermStats>,
}

impl CollectionStats {
  /// Adds `other` into `self`. Summation, so order never matters.
  pub fn merge(&mut self, other: &CollectionStats) {
    self.collection_size += other.collection_size;
    self.total_length += other.total_length;
    self.rset_size += other.rset_size;
    for (term, stats) in &other.terms {
      self.terms.entry(term.clone()).or_default().add(stats);
    }
  }

  /// Mean document length, 0 for an empty collection.
  pub fn average_length(&self) -> f64 {
    if self.collection_size == 0 {
      0.0
    } else {
      self.total_length as f64 / self.collection_size as f64
    }
  }

  /// Counters for `term`, zero if the term was never seen.
  pub fn term(&self, term: &str) -> TermStats {
    self.terms.get(term).copied().unwrap_or_default()
  }
}

/// The merged, read-only view published to leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
  /// Number of shards merged.
  pub shards: usize,
  /// Federation-wide totals.
  pub totals: CollectionStats,
}

impl StatsSnapshot {
  /// Merges contributions. The result does not depend on their order.
  pub fn from_contributions<'a, I>(contributions: I) -> Self
  where
    I: IntoIterator<Item = &'a CollectionStats>,
  {
    let mut snapshot = StatsSnapshot::default();
    for stats in contributions {
      snapshot.totals.merge(stats);
      snapshot.shards += 1;
    }
    snapshot
  }
}

/// Collects statistics from the shards of one match and publishes the merge.
///
/// Implementations must accept contributions from several leaves
/// concurrently. The orchestrator holds exactly one gatherer and does not care
/// whether it aggregates in process or over the network.
pub trait StatsGatherer: Send + Sync {
  /// Starts a new round for `participants` shards, discarding the previous one.
  fn begin(&self, participants: usize) -> MatchResult<()>;

  /// Records the statistics of `shard`. Contributing twice replaces the
  /// earlier contribution.
  fn contribute(&self, shard: ShardIndex, stats: CollectionStats) -> MatchResult<()>;

  /// The merged view. Fails with `NotReady` until every participant has
  /// contributed.
  fn snapshot(&self) -> MatchResult<Arc<StatsSnapshot>>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample(docs: u64, len: u64, term: &str, tf: u64) -> CollectionStats {
    let mut stats = CollectionStats {
      collection_size: docs,
      total_length: len,
      rset_size: 0,
      terms: BTreeMap::new(),
    };
    stats.terms.insert(
      term.to_string(),
      TermStats {
        termfreq: tf,
        collfreq: tf * 2,
        reltermfreq: 0,
      },
    );
    stats
  }

  #[test]
  fn test_merge_sums_counters() {
    let a = sample(10, 100, "rust", 3);
    let b = sample(30, 200, "rust", 1);
    let snapshot = StatsSnapshot::from_contributions([&a, &b]);
    assert_eq!(snapshot.shards, 2);
    assert_eq!(snapshot.totals.collection_size, 40);
    assert_eq!(snapshot.totals.term("rust").termfreq, 4);
    assert_eq!(snapshot.totals.term("missing"), TermStats::default());
    assert!((snapshot.totals.average_length() - 7.5).abs() < 1e-9);
  }
}
