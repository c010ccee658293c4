//! Match deciders: caller-supplied predicates applied to every candidate.
//!
//! A rejected candidate is dropped before it takes a rank slot, so windows
//! stay contiguous no matter how many entries a decider turns away.

use crate::types::{DocId, MatchItem, Weight};
use std::collections::BTreeSet;

/// Decides whether a candidate may appear in the results.
pub trait MatchDecider {
  fn accept(&self, item: &MatchItem) -> bool;
}

impl<F> MatchDecider for F
where
  F: Fn(&MatchItem) -> bool,
{
  fn accept(&self, item: &MatchItem) -> bool {
    self(item)
  }
}

/// Accepts entries scoring at least the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinScore(pub Weight);

impl MatchDecider for MinScore {
  fn accept(&self, item: &MatchItem) -> bool {
    item.score >= self.0
  }
}

/// Rejects the listed global ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeDocs(pub BTreeSet<DocId>);

impl MatchDecider for ExcludeDocs {
  fn accept(&self, item: &MatchItem) -> bool {
    !self.0.contains(&item.docid)
  }
}

/// Accepts only what every inner decider accepts.
#[derive(Default)]
pub struct AllOf(pub Vec<Box<dyn MatchDecider>>);

impl MatchDecider for AllOf {
  fn accept(&self, item: &MatchItem) -> bool {
    self.0.iter().all(|decider| decider.accept(item))
  }
}
