//! Core data types shared by the orchestrator, the leaves and callers.

use serde::{Deserialize, Serialize};

/// Document identifier. Ids are 1-based; 0 never names a document.
///
/// Inside a leaf this is a shard-local id, once it leaves the orchestrator it
/// is a global id (see [`crate::docid`]).
pub type DocId = u64;

/// Position of a shard (leaf) in the orchestrator's leaf list, 0-based.
pub type ShardIndex = usize;

/// Relevance score. Higher is better.
pub type Weight = f64;

/// Opaque collapse key. `None` or an empty key never collapses.
pub type CollapseKey = Vec<u8>;

/// A single ranked entry of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchItem {
  /// Global document id.
  pub docid: DocId,
  /// Score computed by the leaf that produced this entry.
  pub score: Weight,
  /// Key used to remove duplicates.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub collapse_key: Option<CollapseKey>,
}

impl MatchItem {
  /// Creates an entry without a collapse key.
  pub fn new(docid: DocId, score: Weight) -> Self {
    Self {
      docid,
      score,
      collapse_key: None,
    }
  }

  /// Attaches a collapse key.
  pub fn with_collapse_key(mut self, key: impl Into<CollapseKey>) -> Self {
    self.collapse_key = Some(key.into());
    self
  }

  /// The key this entry collapses on, if any. Empty keys do not count.
  pub fn effective_key(&self) -> Option<&[u8]> {
    match &self.collapse_key {
      Some(key) if !key.is_empty() => Some(key.as_slice()),
      _ => None,
    }
  }
}

/// The window of results returned by a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSet {
  /// Rank of `items[0]` in the full ranked list.
  pub first: usize,
  /// The window, sorted by the active comparator.
  pub items: Vec<MatchItem>,
  /// Accepted, non-collapsed matches definitely present.
  pub matches_lower_bound: usize,
  /// Best guess at the total number of accepted, non-collapsed matches.
  pub matches_estimated: usize,
  /// Upper bound on the number of matches.
  pub matches_upper_bound: usize,
  /// Largest score any leaf could have produced for this query.
  pub max_possible: Weight,
  /// Largest score actually seen among accepted entries.
  pub max_attained: Weight,
  /// Whether at least one ranked entry exists beyond this window.
  pub has_more: bool,
}

impl MatchSet {
  /// An empty set starting at `first`.
  pub fn empty(first: usize) -> Self {
    Self {
      first,
      items: Vec::new(),
      matches_lower_bound: 0,
      matches_estimated: 0,
      matches_upper_bound: 0,
      max_possible: 0.0,
      max_attained: 0.0,
      has_more: false,
    }
  }

  /// Number of entries in the window.
  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// Returns true if the window holds no entries.
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Global ids of the window, in rank order.
  pub fn docids(&self) -> Vec<DocId> {
    self.items.iter().map(|item| item.docid).collect()
  }
}

/// How the terms of a [`Query`] combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOp {
  /// A document matches if it contains any term.
  #[default]
  Or,
  /// A document matches only if it contains every term.
  And,
}

/// A term of a compiled query together with its within-query frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTerm {
  pub term: String,
  /// Within-query frequency. Terms repeated in the query weigh more.
  pub wqf: u32,
}

/// A query already compiled into its internal representation.
///
/// Parsing is not this crate's business: callers hand over terms directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
  pub op: QueryOp,
  pub terms: Vec<QueryTerm>,
}

impl Query {
  /// Builds a query from terms, folding duplicates into `wqf`.
  pub fn new<I, S>(op: QueryOp, terms: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut query = Query {
      op,
      terms: Vec::new(),
    };
    for term in terms {
      query.add_term(term);
    }
    query
  }

  /// Shorthand for an `Or` query.
  pub fn any_of<I, S>(terms: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(QueryOp::Or, terms)
  }

  /// Shorthand for an `And` query.
  pub fn all_of<I, S>(terms: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(QueryOp::And, terms)
  }

  /// Adds a term, bumping `wqf` if it is already present.
  pub fn add_term(&mut self, term: impl Into<String>) {
    let term = term.into();
    match self.terms.iter_mut().find(|t| t.term == term) {
      Some(existing) => existing.wqf += 1,
      None => self.terms.push(QueryTerm { term, wqf: 1 }),
    }
  }

  /// Returns true if the query has no terms.
  pub fn is_empty(&self) -> bool {
    self.terms.is_empty()
  }
}
