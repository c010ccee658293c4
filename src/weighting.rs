//! Weighting schemes.
//!
//! A scheme turns merged collection statistics into per-term weights. Every
//! leaf builds its term weights from the same [`StatsSnapshot`], so scores
//! from different shards land on one scale.
//!
//! The term weight is the Robertson/Sparck Jones relevance weight. With an
//! empty relevance set it reduces to an IDF; documents in the relevance set
//! push up the weight of terms they contain.
//!
//! [`StatsSnapshot`]: crate::stats::StatsSnapshot

use crate::error::{MatchError, MatchResult};
use crate::stats::CollectionStats;
use crate::types::{QueryTerm, Weight};
use serde::{Deserialize, Serialize};

/// Which scoring formula a match uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum WeightingScheme {
  /// Every match scores 0. Useful with `MatchOrder::DocId`.
  Bool,
  /// Traditional probabilistic weighting.
  Trad {
    /// Document length normalisation strength.
    k: f64,
  },
  /// Okapi BM25.
  Bm25 {
    /// Term frequency saturation. Higher values let frequency keep counting.
    k1: f64,
    /// Length normalisation, 0 for none and 1 for full.
    b: f64,
    /// Floor for the normalised document length.
    min_normlen: f64,
  },
}

impl Default for WeightingScheme {
  fn default() -> Self {
    WeightingScheme::Bm25 {
      k1: 1.5,
      b: 0.75,
      min_normlen: 0.5,
    }
  }
}

impl WeightingScheme {
  /// Rejects parameters under which [`TermWeight::max_part`] stops bounding
  /// [`TermWeight::score`]: negative or non-finite `k`/`k1`/`min_normlen`,
  /// and `b` outside `[0, 1]`.
  pub fn validate(&self) -> MatchResult<()> {
    let ok = match *self {
      WeightingScheme::Bool => true,
      WeightingScheme::Trad { k } => k.is_finite() && k >= 0.0,
      WeightingScheme::Bm25 { k1, b, min_normlen } => {
        k1.is_finite()
          && k1 >= 0.0
          && (0.0..=1.0).contains(&b)
          && min_normlen.is_finite()
          && min_normlen >= 0.0
      }
    };
    if ok {
      Ok(())
    } else {
      Err(MatchError::Config(format!("invalid weighting parameters {self:?}")))
    }
  }

  /// Prepares the weight of one query term.
  pub fn term_weight(&self, stats: &CollectionStats, term: &QueryTerm) -> TermWeight {
    let counters = stats.term(&term.term);
    let idf = relevance_weight(
      stats.collection_size as f64,
      counters.termfreq as f64,
      stats.rset_size as f64,
      counters.reltermfreq as f64,
    );
    TermWeight {
      scheme: *self,
      termweight: idf * term.wqf as f64,
      average_length: stats.average_length(),
    }
  }
}

/// Robertson/Sparck Jones weight, kept positive.
fn relevance_weight(n_docs: f64, termfreq: f64, rset_size: f64, reltermfreq: f64) -> f64 {
  let numerator = (reltermfreq + 0.5) * (n_docs - termfreq - rset_size + reltermfreq + 0.5).max(0.5);
  let denominator = (rset_size - reltermfreq + 0.5) * (termfreq - reltermfreq + 0.5).max(0.5);
  let mut tw = numerator / denominator;
  if tw < 2.0 {
    tw = tw * 0.5 + 1.0;
  }
  tw.ln()
}

/// A query term's weighting, ready to score documents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermWeight {
  scheme: WeightingScheme,
  termweight: f64,
  average_length: f64,
}

impl TermWeight {
  /// Contribution of this term to a document with `wdf` occurrences of it and
  /// length `doc_length`.
  pub fn score(&self, wdf: u64, doc_length: u64) -> Weight {
    if wdf == 0 {
      return 0.0;
    }
    let wdf = wdf as f64;
    let normlen = if self.average_length > 0.0 {
      doc_length as f64 / self.average_length
    } else {
      0.0
    };
    match self.scheme {
      WeightingScheme::Bool => 0.0,
      WeightingScheme::Trad { k } => self.termweight * (k + 1.0) * wdf / (k * normlen + wdf),
      WeightingScheme::Bm25 { k1, b, min_normlen } => {
        let normlen = normlen.max(min_normlen);
        self.termweight * (k1 + 1.0) * wdf / (k1 * ((1.0 - b) + b * normlen) + wdf)
      }
    }
  }

  /// Upper bound of [`score`](Self::score) over every document.
  pub fn max_part(&self) -> Weight {
    match self.scheme {
      WeightingScheme::Bool => 0.0,
      WeightingScheme::Trad { k } => self.termweight * (k + 1.0),
      WeightingScheme::Bm25 { k1, .. } => self.termweight * (k1 + 1.0),
    }
  }
}
