//! Text tokenization for the in-memory shard.

use std::collections::BTreeMap;
use unicode_segmentation::UnicodeSegmentation;

/// Splits text into lowercased words.
pub fn tokenize(text: &str) -> Vec<String> {
  text
    .unicode_words()
    .map(|word| word.to_lowercase())
    .collect()
}

/// Within-document frequency of every term of `text`.
pub fn term_frequencies(text: &str) -> BTreeMap<String, u64> {
  let mut freqs = BTreeMap::new();
  for token in tokenize(text) {
    *freqs.entry(token).or_insert(0) += 1;
  }
  freqs
}
