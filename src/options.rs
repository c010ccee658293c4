//! Match configuration.

use crate::error::{MatchError, MatchResult};
use serde::{Deserialize, Serialize};

/// Entries requested from a leaf per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 64;


/// Primary ordering of a match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrder {
  /// Best score first, ties broken by document id.
  #[default]
  Relevance,
  /// Document id only; scores are still reported but do not order.
  DocId,
}

/// Options controlling a match.
///
/// A copy is taken when a match starts, so changing the options on the
/// orchestrator never affects a match already running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
  /// Primary ordering.
  #[serde(default)]
  pub order: MatchOrder,
  /// Direction of document id ordering, used as tie-break under
  /// `Relevance` and as the order itself under `DocId`.
  #[serde(default = "default_docid_ascending")]
  pub docid_ascending: bool,
  /// Value slot holding the collapse key. `None` disables collapsing.
  #[serde(default)]
  pub collapse_slot: Option<u32>,
  /// Entries requested from a leaf per fetch.
  #[serde(default = "default_batch_size")]
  pub batch_size: usize,
  /// Optional upper limit on `first + maxitems`. `None` accepts any window
  /// whose end is representable.
  #[serde(default)]
  pub max_window: Option<usize>,
}

fn default_docid_ascending() -> bool {
  true
}

fn default_batch_size() -> usize {
  DEFAULT_BATCH_SIZE
}

impl Default for MatchOptions {
  fn default() -> Self {
    Self {
      order: MatchOrder::default(),
      docid_ascending: default_docid_ascending(),
      collapse_slot: None,
      batch_size: default_batch_size(),
      max_window: None,
    }
  }
}

impl MatchOptions {
  /// Sets the primary ordering.
  pub fn order(mut self, order: MatchOrder) -> Self {
    self.order = order;
    self
  }

  /// Sets the document id direction.
  pub fn docid_ascending(mut self, ascending: bool) -> Self {
    self.docid_ascending = ascending;
    self
  }

  /// Collapses on the given value slot.
  pub fn collapse_on(mut self, slot: u32) -> Self {
    self.collapse_slot = Some(slot);
    self
  }

  /// Sets the per-fetch batch size.
  pub fn batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }

  /// Caps `first + maxitems`. Larger windows fail with `InvalidArgument`.
  pub fn max_window(mut self, max_window: usize) -> Self {
    self.max_window = Some(max_window);
    self
  }

  /// Loads options from JSON. Missing fields take their defaults.
  pub fn from_json(json: &str) -> MatchResult<Self> {
    let options: MatchOptions = serde_json::from_str(json)?;
    options.validate()?;
    Ok(options)
  }

  /// Rejects settings no match could run with.
  pub fn validate(&self) -> MatchResult<()> {
    if self.batch_size == 0 {
      return Err(MatchError::Config("batch_size must be at least 1".into()));
    }
    if self.max_window == Some(0) {
      return Err(MatchError::Config("max_window must be at least 1".into()));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_json_defaults() {
    let options = MatchOptions::from_json("{}").unwrap();
    assert_eq!(options, MatchOptions::default());
  }

  #[test]
  fn test_json_overrides() {
    let options =
      MatchOptions::from_json(r#"{"order": "doc_id", "collapse_slot": 2, "batch_size": 8}"#).unwrap();
    assert_eq!(options.order, MatchOrder::DocId);
    assert_eq!(options.collapse_slot, Some(2));
    assert_eq!(options.batch_size, 8);
    assert!(options.docid_ascending);
  }

  #[test]
  fn test_window_is_unbounded_unless_capped() {
    assert_eq!(MatchOptions::default().max_window, None);
    let capped = MatchOptions::from_json(r#"{"max_window": 50}"#).unwrap();
    assert_eq!(capped.max_window, Some(50));
    assert!(MatchOptions::from_json(r#"{"max_window": 0}"#).is_err());
  }

  #[test]
  fn test_zero_batch_rejected() {
    let err = MatchOptions::from_json(r#"{"batch_size": 0}"#).unwrap_err();
    assert!(matches!(err, MatchError::Config(_)));
  }
}
