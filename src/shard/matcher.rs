//! Leaf matcher over a [`MemoryShard`].

use super::MemoryShard;
use crate::error::{MatchError, MatchResult};
use crate::leaf::{LeafBatch, LeafItem, LeafMatcher, LeafSession, Preparation};
use crate::stats::StatsSnapshot;
use crate::types::{DocId, Query, QueryOp, ShardIndex, Weight};
use crate::weighting::{TermWeight, WeightingScheme};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// What a preparation was done for. A different binding starts over.
#[derive(Debug, Clone, PartialEq)]
struct Binding {
  shard: ShardIndex,
  round: u64,
  query: Query,
  weighting: WeightingScheme,
  rset: Vec<DocId>,
  collapse_slot: Option<u32>,
}

impl Binding {
  fn of(session: &LeafSession) -> Self {
    Self {
      shard: session.shard,
      round: session.round,
      query: (*session.query).clone(),
      weighting: session.weighting,
      rset: session.rset.to_vec(),
      collapse_slot: session.collapse_slot,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Contributed,
  Ready,
}

/// Scores the documents of one [`MemoryShard`].
///
/// Preparation contributes this shard's counters and then waits for the
/// merged snapshot, so the shard scores with federation-wide statistics.
/// Matching is eager: once prepared, every matching document is scored and
/// held in rank order, and batches are handed out from the front.
#[derive(Debug)]
pub struct ShardMatcher {
  shard: Arc<MemoryShard>,
  binding: Option<(Binding, Phase)>,
  ranked: VecDeque<LeafItem>,
  max_possible: Weight,
}

impl ShardMatcher {
  pub fn new(shard: Arc<MemoryShard>) -> Self {
    Self {
      shard,
      binding: None,
      ranked: VecDeque::new(),
      max_possible: 0.0,
    }
  }

  fn rank(&mut self, binding: &Binding, snapshot: &StatsSnapshot) {
    let weights: Vec<(&str, TermWeight)> = binding
      .query
      .terms
      .iter()
      .map(|term| {
        (
          term.term.as_str(),
          binding.weighting.term_weight(&snapshot.totals, term),
        )
      })
      .collect();
    self.max_possible = weights.iter().map(|(_, weight)| weight.max_part()).sum();

    // docid -> (score, matched terms)
    let mut candidates: BTreeMap<DocId, (Weight, usize)> = BTreeMap::new();
    for (term, weight) in &weights {
      let Some(postings) = self.shard.postings(term) else {
        continue;
      };
      for (&docid, &wdf) in postings {
        let length = self.shard.document(docid).map_or(0, |doc| doc.length());
        let entry = candidates.entry(docid).or_insert((0.0, 0));
        entry.0 += weight.score(wdf, length);
        entry.1 += 1;
      }
    }

    let required = match binding.query.op {
      QueryOp::Or => 1,
      QueryOp::And => weights.len(),
    };
    let mut ranked: Vec<LeafItem> = candidates
      .into_iter()
      .filter(|(_, (_, matched))| *matched >= required.max(1))
      .map(|(docid, (score, _))| {
        let mut item = LeafItem::new(docid, score);
        if let Some(slot) = binding.collapse_slot {
          item.collapse_key = self
            .shard
            .document(docid)
            .and_then(|doc| doc.value(slot))
            .map(<[u8]>::to_vec);
        }
        item
      })
      .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.docid.cmp(&b.docid)));

    debug!(
      shard = binding.shard,
      matches = ranked.len(),
      max_possible = self.max_possible,
      "shard ranked"
    );
    self.ranked = ranked.into();
  }
}

impl LeafMatcher for ShardMatcher {
  fn prepare(&mut self, session: &LeafSession, _wait: bool) -> MatchResult<Preparation> {
    let binding = Binding::of(session);
    let current = self
      .binding
      .as_ref()
      .filter(|(bound, _)| *bound == binding)
      .map(|(_, phase)| *phase);
    let phase = match current {
      Some(phase) => phase,
      None => {
        let stats = self.shard.collection_stats(&binding.query, &binding.rset);
        session.stats.contribute(session.shard, stats)?;
        self.ranked.clear();
        self.max_possible = 0.0;
        self.binding = Some((binding.clone(), Phase::Contributed));
        Phase::Contributed
      }
    };
    if phase == Phase::Ready {
      return Ok(Preparation::Ready);
    }

    // Waiting here would block on other shards' contributions, which may
    // only arrive once the caller polls them, so never block.
    match session.stats.snapshot() {
      Ok(snapshot) => {
        self.rank(&binding, &snapshot);
        self.binding = Some((binding, Phase::Ready));
        Ok(Preparation::Ready)
      }
      Err(MatchError::NotReady { .. }) => Ok(Preparation::Pending),
      Err(e) => Err(e),
    }
  }

  fn max_possible_score(&self) -> Weight {
    self.max_possible
  }

  fn remaining_upper_bound(&self) -> Weight {
    self.ranked.front().map_or(0.0, |item| item.score)
  }

  fn next_batch(&mut self, max_count: usize, _wait: bool) -> MatchResult<LeafBatch> {
    match &self.binding {
      Some((_, Phase::Ready)) => {}
      Some((binding, _)) => {
        return Err(MatchError::leaf(binding.shard, "results requested before preparation finished"))
      }
      None => return Err(MatchError::leaf(0, "results requested from an unprepared shard")),
    }
    if self.ranked.is_empty() {
      return Ok(LeafBatch::Exhausted);
    }
    let take = max_count.max(1).min(self.ranked.len());
    Ok(LeafBatch::Items(self.ranked.drain(..take).collect()))
  }

  fn remaining_estimate(&self) -> usize {
    self.ranked.len()
  }

  fn abandon(&mut self) {
    self.ranked.clear();
    self.binding = None;
  }
}
