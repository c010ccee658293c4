//! Shardrank - distributed match and merge over sharded document collections.
//!
//! A [`MultiMatch`](multimatch::MultiMatch) runs one query across several
//! shards ("leaves"), makes them score with statistics gathered from all of
//! them, and merges their locally ranked results into a single global window,
//! with optional collapsing, match deciders and early termination.
//!
//! Leaves implement [`LeafMatcher`](leaf::LeafMatcher). An in-memory backend
//! lives in [`shard`] behind the `memory` feature.

pub mod compare;
pub mod decider;
pub mod docid;
pub mod error;
pub mod leaf;
pub mod multimatch;
pub mod options;
pub mod rset;
pub mod stats;
pub mod types;
pub mod weighting;

#[cfg(feature = "memory")]
pub mod shard;

pub use error::{MatchError, MatchResult};
pub use multimatch::{CancelToken, MultiMatch, MultiMatchBuilder};

pub mod prelude {
  //! Convenient re-exports for common types and traits.

  pub use crate::compare::MatchComparator;
  pub use crate::decider::{AllOf, ExcludeDocs, MatchDecider, MinScore};
  pub use crate::docid::DocIdMapper;
  pub use crate::error::{MatchError, MatchResult};
  pub use crate::leaf::{LeafBatch, LeafItem, LeafMatcher, LeafSession, Preparation, ThreadedLeaf};
  pub use crate::multimatch::{CancelToken, MultiMatch, MultiMatchBuilder};
  pub use crate::options::{MatchOptions, MatchOrder};
  pub use crate::rset::RelevanceSet;
  pub use crate::stats::{
    CollectionStats, LocalStatsGatherer, NetworkStatsGatherer, StatsGatherer, StatsServer, TermStats,
  };
  pub use crate::types::*;
  pub use crate::weighting::WeightingScheme;

  #[cfg(feature = "memory")]
  pub use crate::shard::{Document, MemoryShard, ShardMatcher};
}
