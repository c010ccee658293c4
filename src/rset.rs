//! Relevance sets: documents the caller has marked as relevant.

use crate::docid::DocIdMapper;
use crate::types::{DocId, ShardIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A set of global document ids known to be relevant to the query.
///
/// Leaves use it to re-weight terms: terms that occur often in relevant
/// documents count for more. The orchestrator owns the set for the duration
/// of a match and hands each leaf the part that falls in its shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceSet {
  docids: BTreeSet<DocId>,
}

impl RelevanceSet {
  /// Creates an empty set.
  pub fn new() -> Self {
    Self::default()
  }

  /// Marks a global id as relevant. Zero is ignored.
  pub fn add(&mut self, docid: DocId) {
    if docid != 0 {
      self.docids.insert(docid);
    }
  }

  /// Unmarks a global id. Removing an absent id does nothing.
  pub fn remove(&mut self, docid: DocId) {
    self.docids.remove(&docid);
  }

  /// Whether `docid` is marked relevant.
  pub fn contains(&self, docid: DocId) -> bool {
    self.docids.contains(&docid)
  }

  /// Number of relevant documents.
  pub fn len(&self) -> usize {
    self.docids.len()
  }

  /// Whether no document is marked.
  pub fn is_empty(&self) -> bool {
    self.docids.is_empty()
  }

  /// Members in ascending global id order.
  pub fn iter(&self) -> impl Iterator<Item = DocId> + '_ {
    self.docids.iter().copied()
  }

  /// The local ids of the members that live in `shard`, ascending.
  pub fn local_ids(&self, shard: ShardIndex, mapper: &DocIdMapper) -> Vec<DocId> {
    self
      .docids
      .iter()
      .filter_map(|&global| mapper.to_local(global))
      .filter(|&(s, _)| s == shard)
      .map(|(_, local)| local)
      .collect()
  }
}

impl FromIterator<DocId> for RelevanceSet {
  fn from_iter<I: IntoIterator<Item = DocId>>(iter: I) -> Self {
    let mut rset = RelevanceSet::new();
    for docid in iter {
      rset.add(docid);
    }
    rset
  }
}
