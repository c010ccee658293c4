//! Mapping between shard-local and global document ids.
//!
//! Shards are interleaved: with `n` shards, local id `l` of shard `s` becomes
//! `(l - 1) * n + s + 1`. The global id alone is enough to recover the pair,
//! so no lookup table is needed.

use crate::types::{DocId, ShardIndex};

/// Maps `(shard, local)` to a global id. `None` on a zero id, a shard outside
/// `0..shard_count`, or overflow.
pub fn to_global(shard: ShardIndex, local: DocId, shard_count: usize) -> Option<DocId> {
  if local == 0 || shard >= shard_count {
    return None;
  }
  let n = shard_count as DocId;
  (local - 1)
    .checked_mul(n)?
    .checked_add(shard as DocId)?
    .checked_add(1)
}

/// Splits a global id back into `(shard, local)`.
pub fn to_local(global: DocId, shard_count: usize) -> Option<(ShardIndex, DocId)> {
  if global == 0 || shard_count == 0 {
    return None;
  }
  let n = shard_count as DocId;
  let shard = ((global - 1) % n) as ShardIndex;
  let local = (global - 1) / n + 1;
  Some((shard, local))
}

/// Id mapping bound to a fixed number of shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocIdMapper {
  shard_count: usize,
}

impl DocIdMapper {
  /// Creates a mapper for `shard_count` shards. A count of zero maps
  /// nothing: every conversion returns `None`.
  pub fn new(shard_count: usize) -> Self {
    Self { shard_count }
  }

  /// Number of shards the id space is interleaved over.
  pub fn shard_count(&self) -> usize {
    self.shard_count
  }

  /// Global id of local document `local` in `shard`.
  ///
  /// # Examples
  ///
  /// ```rust
  /// use shardrank::docid::DocIdMapper;
  ///
  /// let mapper = DocIdMapper::new(3);
  /// assert_eq!(mapper.to_global(0, 3), Some(7));
  /// assert_eq!(mapper.to_global(3, 1), None);
  /// ```
  pub fn to_global(&self, shard: ShardIndex, local: DocId) -> Option<DocId> {
    to_global(shard, local, self.shard_count)
  }

  /// Inverse of [`to_global`](Self::to_global).
  pub fn to_local(&self, global: DocId) -> Option<(ShardIndex, DocId)> {
    to_local(global, self.shard_count)
  }
}
