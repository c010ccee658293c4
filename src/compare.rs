//! Ordering of match entries.

use crate::options::{MatchOptions, MatchOrder};
use crate::types::{MatchItem, Weight};
use std::cmp::Ordering;

/// Total order over [`MatchItem`]s. `Ordering::Less` means "ranks earlier".
///
/// Scores are compared with `f64::total_cmp`, so even NaN scores get a fixed
/// place and the order stays total. Document ids always break ties, which
/// makes the ranking independent of the order entries arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchComparator {
  order: MatchOrder,
  docid_ascending: bool,
}

impl Default for MatchComparator {
  fn default() -> Self {
    Self::from_options(&MatchOptions::default())
  }
}

impl MatchComparator {
  pub fn new(order: MatchOrder, docid_ascending: bool) -> Self {
    Self {
      order,
      docid_ascending,
    }
  }

  pub fn from_options(options: &MatchOptions) -> Self {
    Self::new(options.order, options.docid_ascending)
  }

  /// Compares two entries.
  pub fn compare(&self, a: &MatchItem, b: &MatchItem) -> Ordering {
    let by_docid = if self.docid_ascending {
      a.docid.cmp(&b.docid)
    } else {
      b.docid.cmp(&a.docid)
    };
    match self.order {
      MatchOrder::Relevance => b.score.total_cmp(&a.score).then(by_docid),
      MatchOrder::DocId => by_docid,
    }
  }

  /// Whether `a` ranks strictly before `b`.
  pub fn ranks_before(&self, a: &MatchItem, b: &MatchItem) -> bool {
    self.compare(a, b) == Ordering::Less
  }

  /// Whether score is the primary key, i.e. whether score upper bounds can
  /// prove that unseen entries rank after a given one.
  pub fn is_relevance_primary(&self) -> bool {
    self.order == MatchOrder::Relevance
  }

  /// Whether no entry scoring at most `bound` can rank before `tail`.
  ///
  /// Only meaningful for relevance ordering; always false otherwise. Equal
  /// scores are not enough since the docid tie-break could still go either
  /// way.
  pub fn bound_cannot_beat(&self, bound: Weight, tail: &MatchItem) -> bool {
    self.is_relevance_primary() && bound < tail.score
  }
}
