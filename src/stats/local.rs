//! In-process statistics aggregation.

use super::{CollectionStats, StatsGatherer, StatsSnapshot};
use crate::error::{MatchError, MatchResult};
use crate::types::ShardIndex;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Gatherer for shards living in the same process.
///
/// Contributions are kept per shard in a concurrent map, so leaves preparing
/// on different threads never contend on a single lock, and merged on demand.
#[derive(Debug, Default)]
pub struct LocalStatsGatherer {
  participants: AtomicUsize,
  contributions: DashMap<ShardIndex, CollectionStats>,
}

impl LocalStatsGatherer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Shards that have contributed to the current round.
  pub fn contributed(&self) -> usize {
    self.contributions.len()
  }

  /// Whether every participant has contributed.
  pub fn is_complete(&self) -> bool {
    self.contributed() >= self.participants.load(Ordering::Acquire)
  }
}

impl StatsGatherer for LocalStatsGatherer {
  fn begin(&self, participants: usize) -> MatchResult<()> {
    self.contributions.clear();
    self.participants.store(participants, Ordering::Release);
    Ok(())
  }

  fn contribute(&self, shard: ShardIndex, stats: CollectionStats) -> MatchResult<()> {
    let participants = self.participants.load(Ordering::Acquire);
    if shard >= participants {
      return Err(MatchError::InvalidArgument(format!(
        "shard {shard} contributed to a round of {participants}"
      )));
    }
    trace!(shard, docs = stats.collection_size, "statistics contributed");
    self.contributions.insert(shard, stats);
    Ok(())
  }

  fn snapshot(&self) -> MatchResult<Arc<StatsSnapshot>> {
    let expected = self.participants.load(Ordering::Acquire);
    let contributed = self.contributions.len();
    if contributed < expected {
      return Err(MatchError::NotReady {
        contributed,
        expected,
      });
    }

    let mut shards: Vec<ShardIndex> = self.contributions.iter().map(|entry| *entry.key()).collect();
    shards.sort_unstable();
    let parts: Vec<CollectionStats> = shards
      .iter()
      .filter_map(|shard| self.contributions.get(shard).map(|entry| entry.value().clone()))
      .collect();
    Ok(Arc::new(StatsSnapshot::from_contributions(&parts)))
  }
}
