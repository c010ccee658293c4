//! An in-memory shard and the leaf matcher that searches it.
//!
//! This is the reference backend: small enough to build in a test, complete
//! enough to exercise statistics exchange, relevance weighting and collapse
//! keys through the real leaf contract.

pub mod matcher;
pub mod table;
pub mod tokenizer;

pub use matcher::ShardMatcher;
pub use table::{Document, MemoryRecordTable, RecordTable};

use crate::stats::{CollectionStats, TermStats};
use crate::types::{DocId, Query};
use std::collections::BTreeMap;

/// Documents plus the postings needed to match them.
#[derive(Debug, Clone, Default)]
pub struct MemoryShard {
  records: MemoryRecordTable,
  /// term -> docid -> wdf
  postings: BTreeMap<String, BTreeMap<DocId, u64>>,
  total_length: u64,
}

impl MemoryShard {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builds a shard from texts, numbered from 1 in order.
  pub fn from_texts<I, S>(texts: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut shard = MemoryShard::new();
    for text in texts {
      shard.add_document(Document::from_text(text.as_ref()));
    }
    shard
  }

  /// Stores a document under the next free id and returns that id.
  pub fn add_document(&mut self, document: Document) -> DocId {
    let docid = self.records.next_docid();
    self.index(docid, &document);
    // next_docid is never 0, so this cannot fail.
    let _ = self.records.replace_record(docid, document);
    docid
  }

  /// Stores `document` under `docid`, replacing whatever was there.
  pub fn replace_document(&mut self, docid: DocId, document: Document) -> Result<(), String> {
    if docid == 0 {
      return Err("document id 0 is reserved".to_string());
    }
    self.unindex(docid);
    self.index(docid, &document);
    self.records.replace_record(docid, document)
  }

  /// Removes a document and its postings.
  pub fn delete_document(&mut self, docid: DocId) -> Result<(), String> {
    self.unindex(docid);
    self.records.delete_record(docid)
  }

  pub fn document(&self, docid: DocId) -> Option<&Document> {
    self.records.get_record(docid)
  }

  pub fn doc_count(&self) -> u64 {
    self.records.doc_count()
  }

  pub fn total_length(&self) -> u64 {
    self.total_length
  }

  /// Postings of `term`, docid -> wdf.
  pub fn postings(&self, term: &str) -> Option<&BTreeMap<DocId, u64>> {
    self.postings.get(term)
  }

  /// This shard's counters for the terms of `query`, given the local ids of
  /// the relevance set members.
  pub fn collection_stats(&self, query: &Query, rset: &[DocId]) -> CollectionStats {
    let rset: Vec<DocId> = rset
      .iter()
      .copied()
      .filter(|docid| self.document(*docid).is_some())
      .collect();

    let mut terms = BTreeMap::new();
    for query_term in &query.terms {
      let counters = match self.postings(&query_term.term) {
        Some(postings) => TermStats {
          termfreq: postings.len() as u64,
          collfreq: postings.values().sum(),
          reltermfreq: rset.iter().filter(|docid| postings.contains_key(docid)).count() as u64,
        },
        None => TermStats::default(),
      };
      terms.insert(query_term.term.clone(), counters);
    }

    CollectionStats {
      collection_size: self.doc_count(),
      total_length: self.total_length,
      rset_size: rset.len() as u64,
      terms,
    }
  }

  fn index(&mut self, docid: DocId, document: &Document) {
    for (term, wdf) in &document.terms {
      self.postings.entry(term.clone()).or_default().insert(docid, *wdf);
    }
    self.total_length += document.length();
  }

  fn unindex(&mut self, docid: DocId) {
    let Some(old) = self.records.get_record(docid) else {
      return;
    };
    let length = old.length();
    let terms: Vec<String> = old.terms.keys().cloned().collect();
    for term in terms {
      if let Some(postings) = self.postings.get_mut(&term) {
        postings.remove(&docid);
        if postings.is_empty() {
          self.postings.remove(&term);
        }
      }
    }
    self.total_length -= length;
  }
}
