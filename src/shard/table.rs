//! Record storage for a shard.

use super::tokenizer::term_frequencies;
use crate::types::DocId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stored document: its terms, its value slots and an opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
  /// Within-document frequency per term.
  pub terms: BTreeMap<String, u64>,
  /// Numbered value slots. Collapse keys are read from here.
  #[serde(default)]
  pub values: BTreeMap<u32, Vec<u8>>,
  /// Caller data, returned untouched.
  #[serde(default)]
  pub data: String,
}

impl Document {
  /// Indexes `text` as the document's terms and keeps it as data.
  pub fn from_text(text: &str) -> Self {
    Self {
      terms: term_frequencies(text),
      values: BTreeMap::new(),
      data: text.to_string(),
    }
  }

  /// Sets a value slot.
  pub fn with_value(mut self, slot: u32, value: impl Into<Vec<u8>>) -> Self {
    self.values.insert(slot, value.into());
    self
  }

  /// Total number of term occurrences.
  pub fn length(&self) -> u64 {
    self.terms.values().sum()
  }

  pub fn value(&self, slot: u32) -> Option<&[u8]> {
    self.values.get(&slot).map(Vec::as_slice)
  }
}

/// A table of documents keyed by id.
///
/// This is the storage collaborator leaves read from; the orchestrator never
/// touches it. Persistent backends can implement it over their own record
/// files.
pub trait RecordTable: Send + Sync {
  /// Looks up a document.
  fn get_record(&self, docid: DocId) -> Option<&Document>;

  /// Inserts a document, or replaces the one stored under `docid`.
  fn replace_record(&mut self, docid: DocId, document: Document) -> Result<(), String>;

  /// Removes a document. Removing a missing id is an error.
  fn delete_record(&mut self, docid: DocId) -> Result<(), String>;

  /// Number of live documents.
  fn doc_count(&self) -> u64;

  /// Every live id, ascending.
  fn docids(&self) -> Vec<DocId>;
}

/// Record table held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordTable {
  records: BTreeMap<DocId, Document>,
}

impl MemoryRecordTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// The id following the highest one in use.
  pub fn next_docid(&self) -> DocId {
    self.records.keys().next_back().map_or(1, |last| last + 1)
  }
}

impl RecordTable for MemoryRecordTable {
  fn get_record(&self, docid: DocId) -> Option<&Document> {
    self.records.get(&docid)
  }

  fn replace_record(&mut self, docid: DocId, document: Document) -> Result<(), String> {
    if docid == 0 {
      return Err("document id 0 is reserved".to_string());
    }
    self.records.insert(docid, document);
    Ok(())
  }

  fn delete_record(&mut self, docid: DocId) -> Result<(), String> {
    self
      .records
      .remove(&docid)
      .map(|_| ())
      .ok_or_else(|| format!("document {docid} not found"))
  }

  fn doc_count(&self) -> u64 {
    self.records.len() as u64
  }

  fn docids(&self) -> Vec<DocId> {
    self.records.keys().copied().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_replace_and_delete() {
    let mut table = MemoryRecordTable::new();
    assert_eq!(table.next_docid(), 1);
    table.replace_record(1, Document::from_text("a b")).unwrap();
    table.replace_record(4, Document::from_text("c")).unwrap();
    assert_eq!(table.doc_count(), 2);
    assert_eq!(table.next_docid(), 5);

    table.replace_record(1, Document::from_text("a a a")).unwrap();
    assert_eq!(table.get_record(1).unwrap().length(), 3);

    table.delete_record(1).unwrap();
    assert!(table.delete_record(1).is_err());
    assert_eq!(table.docids(), vec![4]);
  }

  #[test]
  fn test_zero_id_rejected() {
    let mut table = MemoryRecordTable::new();
    assert!(table.replace_record(0, Document::default()).is_err());
  }
}
