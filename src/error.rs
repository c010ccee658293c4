//! Error types for the match engine.

use crate::types::ShardIndex;

/// Errors surfaced by a match and by the statistics protocol.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
  /// Malformed pagination parameters. Raised before any leaf is touched.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// A shard failed to prepare or to produce results. Fatal to the match.
  #[error("leaf for shard {shard} unavailable: {reason}")]
  LeafUnavailable {
    /// Position of the failing leaf in the orchestrator's leaf list.
    shard: ShardIndex,
    /// What went wrong.
    reason: String,
  },

  /// The statistics snapshot was requested before every shard contributed.
  #[error("statistics not ready: {contributed} of {expected} shards contributed")]
  NotReady {
    /// Shards that have contributed so far.
    contributed: usize,
    /// Shards taking part in the current round.
    expected: usize,
  },

  /// The caller aborted the match.
  #[error("match cancelled")]
  Cancelled,

  /// The statistics round trip to a remote aggregator failed.
  #[error("statistics exchange failed: {0}")]
  StatsExchange(String),

  /// A statistics message could not be encoded or decoded.
  #[error("codec error: {0}")]
  Codec(#[from] serde_json::Error),

  /// Options could not be loaded.
  #[error("invalid configuration: {0}")]
  Config(String),
}

impl MatchError {
  /// Whether repeating the same request may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      MatchError::Cancelled | MatchError::StatsExchange(_) | MatchError::NotReady { .. }
    )
  }

  pub(crate) fn leaf(shard: ShardIndex, reason: impl Into<String>) -> Self {
    MatchError::LeafUnavailable {
      shard,
      reason: reason.into(),
    }
  }
}

/// Result alias used throughout the crate.
pub type MatchResult<T> = Result<T, MatchError>;
