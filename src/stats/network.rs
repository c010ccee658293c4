//! Statistics aggregation across a network boundary.
//!
//! The gatherer side turns each call into a JSON request, sends it over a
//! [`StatsLink`] and decodes the reply. The [`StatsServer`] side is the
//! aggregation point; it owns a [`LocalStatsGatherer`] and answers requests.

use super::{CollectionStats, LocalStatsGatherer, StatsGatherer, StatsSnapshot};
use crate::error::{MatchError, MatchResult};
use crate::types::ShardIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Messages sent to the aggregation point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatsRequest {
  Begin { participants: usize },
  Contribute { shard: ShardIndex, stats: CollectionStats },
  Snapshot,
}

/// Answers from the aggregation point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatsReply {
  Ack,
  Snapshot { snapshot: StatsSnapshot },
  NotReady { contributed: usize, expected: usize },
  Error { message: String },
}

/// Transport carrying one request and its reply.
///
/// Errors are plain strings: what failed is transport specific, the gatherer
/// only needs to report it.
pub trait StatsLink: Send + Sync {
  fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, String>;
}

/// Aggregation endpoint answering [`StatsRequest`]s.
#[derive(Debug, Default)]
pub struct StatsServer {
  gatherer: LocalStatsGatherer,
}

impl StatsServer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Decodes a request, applies it and encodes the reply.
  pub fn handle(&self, request: &[u8]) -> MatchResult<Vec<u8>> {
    let reply = match serde_json::from_slice::<StatsRequest>(request) {
      Ok(request) => self.apply(request),
      Err(e) => StatsReply::Error {
        message: format!("malformed request: {e}"),
      },
    };
    Ok(serde_json::to_vec(&reply)?)
  }

  fn apply(&self, request: StatsRequest) -> StatsReply {
    let outcome = match request {
      StatsRequest::Begin { participants } => self.gatherer.begin(participants).map(|_| StatsReply::Ack),
      StatsRequest::Contribute { shard, stats } => {
        self.gatherer.contribute(shard, stats).map(|_| StatsReply::Ack)
      }
      StatsRequest::Snapshot => self.gatherer.snapshot().map(|snapshot| StatsReply::Snapshot {
        snapshot: (*snapshot).clone(),
      }),
    };
    match outcome {
      Ok(reply) => reply,
      Err(MatchError::NotReady {
        contributed,
        expected,
      }) => StatsReply::NotReady {
        contributed,
        expected,
      },
      Err(e) => StatsReply::Error {
        message: e.to_string(),
      },
    }
  }
}

/// In-process link straight into a [`StatsServer`]. Still goes through the
/// wire encoding, so it behaves like a remote link minus the latency.
#[derive(Debug, Clone)]
pub struct LoopbackLink {
  server: Arc<StatsServer>,
}

impl LoopbackLink {
  pub fn new(server: Arc<StatsServer>) -> Self {
    Self { server }
  }
}

impl StatsLink for LoopbackLink {
  fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, String> {
    self.server.handle(request).map_err(|e| e.to_string())
  }
}

/// Gatherer whose aggregation happens behind a [`StatsLink`].
pub struct NetworkStatsGatherer<L> {
  link: L,
}

impl<L: StatsLink> NetworkStatsGatherer<L> {
  pub fn new(link: L) -> Self {
    Self { link }
  }

  fn exchange(&self, request: &StatsRequest) -> MatchResult<StatsReply> {
    let bytes = serde_json::to_vec(request)?;
    let reply = self.link.round_trip(&bytes).map_err(|e| {
      warn!(error = %e, "statistics round trip failed");
      MatchError::StatsExchange(e)
    })?;
    Ok(serde_json::from_slice(&reply)?)
  }

  fn expect_ack(&self, request: &StatsRequest) -> MatchResult<()> {
    match self.exchange(request)? {
      StatsReply::Ack => Ok(()),
      StatsReply::Error { message } => Err(MatchError::StatsExchange(message)),
      other => Err(MatchError::StatsExchange(format!("unexpected reply {other:?}"))),
    }
  }
}

impl<L: StatsLink> StatsGatherer for NetworkStatsGatherer<L> {
  fn begin(&self, participants: usize) -> MatchResult<()> {
    self.expect_ack(&StatsRequest::Begin { participants })
  }

  fn contribute(&self, shard: ShardIndex, stats: CollectionStats) -> MatchResult<()> {
    self.expect_ack(&StatsRequest::Contribute { shard, stats })
  }

  fn snapshot(&self) -> MatchResult<Arc<StatsSnapshot>> {
    match self.exchange(&StatsRequest::Snapshot)? {
      StatsReply::Snapshot { snapshot } => {
        debug!(shards = snapshot.shards, "remote statistics snapshot received");
        Ok(Arc::new(snapshot))
      }
      StatsReply::NotReady {
        contributed,
        expected,
      } => Err(MatchError::NotReady {
        contributed,
        expected,
      }),
      StatsReply::Error { message } => Err(MatchError::StatsExchange(message)),
      StatsReply::Ack => Err(MatchError::StatsExchange("unexpected ack to snapshot".into())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct BrokenLink;

  impl StatsLink for BrokenLink {
    fn round_trip(&self, _request: &[u8]) -> Result<Vec<u8>, String> {
      Err("connection refused".into())
    }
  }

  fn stats(docs: u64) -> CollectionStats {
    CollectionStats {
      collection_size: docs,
      total_length: docs * 4,
      ..CollectionStats::default()
    }
  }

  #[test]
  fn test_round_trip_through_server() {
    let server = Arc::new(StatsServer::new());
    let gatherer = NetworkStatsGatherer::new(LoopbackLink::new(Arc::clone(&server)));
    gatherer.begin(2).unwrap();
    gatherer.contribute(1, stats(3)).unwrap();
    assert!(matches!(
      gatherer.snapshot(),
      Err(MatchError::NotReady {
        contributed: 1,
        expected: 2
      })
    ));
    gatherer.contribute(0, stats(4)).unwrap();
    let snapshot = gatherer.snapshot().unwrap();
    assert_eq!(snapshot.totals.collection_size, 7);
    assert_eq!(snapshot.totals.total_length, 28);
  }

  #[test]
  fn test_server_reports_bad_shard() {
    let server = Arc::new(StatsServer::new());
    let gatherer = NetworkStatsGatherer::new(LoopbackLink::new(server));
    gatherer.begin(1).unwrap();
    assert!(matches!(
      gatherer.contribute(4, stats(1)),
      Err(MatchError::StatsExchange(_))
    ));
  }

  #[test]
  fn test_server_survives_garbage() {
    let server = StatsServer::new();
    let reply: StatsReply = serde_json::from_slice(&server.handle(b"not json").unwrap()).unwrap();
    assert!(matches!(reply, StatsReply::Error { .. }));
  }

  #[test]
  fn test_link_failure_is_exchange_error() {
    let gatherer = NetworkStatsGatherer::new(BrokenLink);
    let err = gatherer.begin(1).unwrap_err();
    assert!(matches!(err, MatchError::StatsExchange(_)));
    assert!(err.is_retryable());
  }

  #[test]
  fn test_wire_format_is_tagged() {
    let json = serde_json::to_string(&StatsRequest::Begin { participants: 3 }).unwrap();
    assert_eq!(json, r#"{"type":"begin","participants":3}"#);
  }
}
