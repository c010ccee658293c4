use proptest::prelude::*;
use shardrank::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A leaf that serves a fixed, locally ranked list.
struct FixedLeaf {
  items: Vec<LeafItem>,
  cursor: usize,
  fail_prepare: bool,
  fetches: Arc<AtomicUsize>,
}

impl FixedLeaf {
  fn new(entries: &[(u64, f64)]) -> Self {
    Self::keyed(&entries.iter().map(|&(d, s)| (d, s, "")).collect::<Vec<_>>())
  }

  fn keyed(entries: &[(u64, f64, &str)]) -> Self {
    let mut items: Vec<LeafItem> = entries
      .iter()
      .map(|&(docid, score, key)| LeafItem::new(docid, score).with_collapse_key(key.as_bytes().to_vec()))
      .collect();
    items.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.docid.cmp(&b.docid)));
    Self {
      items,
      cursor: 0,
      fail_prepare: false,
      fetches: Arc::new(AtomicUsize::new(0)),
    }
  }

  fn failing() -> Self {
    Self {
      fail_prepare: true,
      ..Self::new(&[])
    }
  }
}

impl LeafMatcher for FixedLeaf {
  fn prepare(&mut self, session: &LeafSession, _wait: bool) -> MatchResult<Preparation> {
    if self.fail_prepare {
      return Err(MatchError::LeafUnavailable {
        shard: session.shard,
        reason: "connection refused".to_string(),
      });
    }
    self.cursor = 0;
    Ok(Preparation::Ready)
  }

  fn max_possible_score(&self) -> f64 {
    self.items.first().map_or(0.0, |item| item.score)
  }

  fn remaining_upper_bound(&self) -> f64 {
    self.items.get(self.cursor).map_or(0.0, |item| item.score)
  }

  fn next_batch(&mut self, max_count: usize, _wait: bool) -> MatchResult<LeafBatch> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    if self.cursor >= self.items.len() {
      return Ok(LeafBatch::Exhausted);
    }
    let end = (self.cursor + max_count).min(self.items.len());
    let batch = self.items[self.cursor..end].to_vec();
    self.cursor = end;
    Ok(LeafBatch::Items(batch))
  }

  fn remaining_estimate(&self) -> usize {
    self.items.len() - self.cursor
  }
}

fn multimatch(leaves: Vec<FixedLeaf>) -> MultiMatch {
  leaves
    .into_iter()
    .fold(MultiMatch::builder(), |builder, leaf| builder.leaf(Box::new(leaf)))
    .build()
}

fn pairs(set: &MatchSet) -> Vec<(u64, f64)> {
  set.items.iter().map(|item| (item.docid, item.score)).collect()
}

#[test]
fn test_three_shards_merge_into_global_ids() {
  let mut matcher = multimatch(vec![
    FixedLeaf::new(&[(3, 0.9)]),
    FixedLeaf::new(&[(1, 0.95)]),
    FixedLeaf::new(&[(5, 0.7)]),
  ]);
  let set = matcher.run_match(0, 3, None).unwrap();
  assert_eq!(pairs(&set), vec![(2, 0.95), (7, 0.9), (15, 0.7)]);
  assert_eq!(set.matches_lower_bound, 3);
  assert!(!set.has_more);
  assert_eq!(set.max_possible, 0.95);
  assert_eq!(set.max_attained, 0.95);
}

#[test]
fn test_collapse_leaves_no_gap() {
  // Globals 5 and 2 live in shard 1, 9 in shard 2.
  let mut matcher = multimatch(vec![
    FixedLeaf::new(&[]),
    FixedLeaf::keyed(&[(2, 0.8, "K"), (1, 0.7, "")]),
    FixedLeaf::keyed(&[(3, 0.6, "K")]),
  ]);
  let set = matcher.run_match(0, 3, None).unwrap();
  assert_eq!(pairs(&set), vec![(5, 0.8), (2, 0.7)]);
  assert_eq!(set.matches_lower_bound, 2);
}

#[test]
fn test_leaf_unavailable_fails_whole_match() {
  let mut matcher = multimatch(vec![
    FixedLeaf::new(&[(1, 0.5)]),
    FixedLeaf::failing(),
    FixedLeaf::new(&[(1, 0.4)]),
  ]);
  let err = matcher.run_match(0, 10, None).unwrap_err();
  assert!(matches!(err, MatchError::LeafUnavailable { shard: 1, .. }));
}

#[test]
fn test_windows_paginate() {
  let mut matcher = multimatch(vec![
    FixedLeaf::new(&[(1, 0.9), (2, 0.5), (3, 0.1)]),
    FixedLeaf::new(&[(1, 0.8), (2, 0.4)]),
  ]);
  let page = matcher.run_match(1, 2, None).unwrap();
  assert_eq!(page.docids(), vec![2, 3]);
  assert_eq!(page.first, 1);
  assert!(page.has_more);

  let tail = matcher.run_match(4, 10, None).unwrap();
  assert_eq!(tail.docids(), vec![5]);
  assert!(!tail.has_more);

  let beyond = matcher.run_match(20, 5, None).unwrap();
  assert!(beyond.is_empty());
}

#[test]
fn test_zero_window_counts_matches() {
  let mut matcher = multimatch(vec![FixedLeaf::new(&[(1, 0.9), (2, 0.5)])]);
  let set = matcher.run_match(0, 0, None).unwrap();
  assert!(set.is_empty());
  assert!(set.has_more);
}

#[test]
fn test_decider_rejections_do_not_leave_gaps() {
  let mut matcher = multimatch(vec![
    FixedLeaf::new(&[(1, 0.9), (2, 0.5)]),
    FixedLeaf::new(&[(1, 0.8), (2, 0.4)]),
  ]);
  let odd_only = |item: &MatchItem| item.docid % 2 == 1;
  let set = matcher.run_match(0, 2, Some(&odd_only)).unwrap();
  assert_eq!(set.docids(), vec![1, 3]);
  assert_eq!(set.matches_lower_bound, 2);
}

#[test]
fn test_docid_order_ignores_scores() {
  let mut matcher = multimatch(vec![
    FixedLeaf::new(&[(1, 0.1), (2, 0.9)]),
    FixedLeaf::new(&[(1, 0.5)]),
  ]);
  matcher.set_options(MatchOptions::default().order(MatchOrder::DocId));
  assert_eq!(matcher.run_match(0, 10, None).unwrap().docids(), vec![1, 2, 3]);

  matcher.set_options(MatchOptions::default().order(MatchOrder::DocId).docid_ascending(false));
  assert_eq!(matcher.run_match(0, 10, None).unwrap().docids(), vec![3, 2, 1]);
}

#[test]
fn test_early_termination_skips_hopeless_leaf() {
  let weak = FixedLeaf::new(&(1..=50).map(|d| (d, 0.01)).collect::<Vec<_>>());
  let fetches = Arc::clone(&weak.fetches);
  let strong = FixedLeaf::new(&[(1, 0.9), (2, 0.8), (3, 0.7)]);
  let mut matcher = MultiMatch::builder()
    .leaf(Box::new(strong))
    .leaf(Box::new(weak))
    .options(MatchOptions::default().batch_size(4))
    .build();

  let set = matcher.run_match(0, 2, None).unwrap();
  assert_eq!(set.docids(), vec![1, 3]);
  // The weak leaf is polled once, then retired once the buffer fills.
  assert!(fetches.load(Ordering::SeqCst) <= 1);
  assert!(set.matches_estimated >= set.matches_lower_bound);
  assert!(set.matches_upper_bound >= 40);
}

#[test]
fn test_window_limits() {
  let mut matcher = multimatch(vec![FixedLeaf::new(&[(1, 0.5)])]);
  matcher.set_options(MatchOptions::default().max_window(10));
  assert!(matches!(
    matcher.run_match(5, 6, None),
    Err(MatchError::InvalidArgument(_))
  ));
  assert!(matches!(
    matcher.run_match(usize::MAX, 1, None),
    Err(MatchError::InvalidArgument(_))
  ));
}

#[test]
fn test_large_windows_need_no_configuration() {
  let mut matcher = multimatch(vec![FixedLeaf::new(&[(1, 0.5)]), FixedLeaf::new(&[(1, 0.4)])]);
  let set = matcher.run_match(0, 10_001, None).unwrap();
  assert_eq!(set.docids(), vec![1, 2]);
  assert!(!set.has_more);

  let deep = matcher.run_match(1_000_000, 50_000, None).unwrap();
  assert!(deep.is_empty());
  assert_eq!(deep.first, 1_000_000);
}

#[test]
fn test_negative_scores_bound_themselves() {
  let mut matcher = multimatch(vec![
    FixedLeaf::new(&[(1, -0.5), (2, -0.9)]),
    FixedLeaf::new(&[(1, -0.2)]),
  ]);
  let set = matcher.run_match(0, 10, None).unwrap();
  assert_eq!(set.docids(), vec![2, 1, 3]);
  assert_eq!(set.max_attained, -0.2);
  assert_eq!(set.max_possible, -0.2);
  assert!(set.max_attained <= set.max_possible);
  assert_eq!(matcher.max_weight().unwrap(), -0.2);
}

/// Breaks the batch contract by answering with nothing forever.
struct EmptyBatches;

impl LeafMatcher for EmptyBatches {
  fn prepare(&mut self, _session: &LeafSession, _wait: bool) -> MatchResult<Preparation> {
    Ok(Preparation::Ready)
  }

  fn max_possible_score(&self) -> f64 {
    1.0
  }

  fn next_batch(&mut self, _max_count: usize, _wait: bool) -> MatchResult<LeafBatch> {
    Ok(LeafBatch::Items(Vec::new()))
  }
}

#[test]
fn test_empty_batch_fails_the_leaf() {
  let mut matcher = MultiMatch::builder()
    .leaf(Box::new(FixedLeaf::new(&[(1, 0.5)])))
    .leaf(Box::new(EmptyBatches))
    .build();
  let err = matcher.run_match(0, 10, None).unwrap_err();
  assert!(matches!(err, MatchError::LeafUnavailable { shard: 1, .. }));
}

#[test]
fn test_unbounded_weighting_rejected_before_matching() {
  let leaf = FixedLeaf::new(&[(1, 0.5)]);
  let fetches = Arc::clone(&leaf.fetches);
  let mut matcher = multimatch(vec![leaf]);
  matcher.set_weighting(WeightingScheme::Trad { k: -2.0 });
  assert!(matches!(matcher.run_match(0, 10, None), Err(MatchError::Config(_))));
  assert!(matches!(matcher.max_weight(), Err(MatchError::Config(_))));
  assert_eq!(fetches.load(Ordering::SeqCst), 0);

  matcher.set_weighting(WeightingScheme::default());
  assert_eq!(matcher.run_match(0, 10, None).unwrap().len(), 1);
}

#[test]
fn test_max_weight_without_matching() {
  let leaf = FixedLeaf::new(&[(1, 0.3), (2, 0.2)]);
  let fetches = Arc::clone(&leaf.fetches);
  let mut matcher = multimatch(vec![leaf, FixedLeaf::new(&[(1, 0.6)])]);
  assert_eq!(matcher.max_weight().unwrap(), 0.6);
  assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancelled_match_returns_nothing() {
  let mut matcher = multimatch(vec![FixedLeaf::new(&[(1, 0.5)])]);
  let cancel = CancelToken::new();
  cancel.cancel();
  let err = matcher.run_match_with_cancel(0, 10, None, &cancel).unwrap_err();
  assert!(matches!(err, MatchError::Cancelled));
  assert!(err.is_retryable());
  // A fresh match still works.
  assert_eq!(matcher.run_match(0, 10, None).unwrap().len(), 1);
}

#[test]
fn test_repeated_matches_agree() {
  let mut matcher = multimatch(vec![
    FixedLeaf::new(&[(1, 0.9), (2, 0.5)]),
    FixedLeaf::new(&[(1, 0.7)]),
  ]);
  let first = matcher.run_match(0, 10, None).unwrap();
  let second = matcher.run_match(0, 10, None).unwrap();
  assert_eq!(first, second);
}

fn shard_lists() -> impl Strategy<Value = Vec<Vec<(u64, f64)>>> {
  prop::collection::vec(
    prop::collection::btree_map(1u64..40, 0u32..1000, 0..12)
      .prop_map(|entries| entries.into_iter().map(|(d, s)| (d, s as f64 / 1000.0)).collect::<Vec<_>>()),
    1..4,
  )
}

proptest! {
  #[test]
  fn prop_pages_concatenate_to_full_ranking(lists in shard_lists(), page in 1usize..6) {
    let build = || multimatch(lists.iter().map(|entries| FixedLeaf::new(entries)).collect());
    let full = build().run_match(0, 200, None).unwrap();

    let mut paged = Vec::new();
    let mut first = 0;
    loop {
      let set = build().run_match(first, page, None).unwrap();
      paged.extend(set.docids());
      if !set.has_more {
        break;
      }
      first += page;
    }
    prop_assert_eq!(paged, full.docids());

    let mut scores: Vec<f64> = full.items.iter().map(|item| item.score).collect();
    let sorted = scores.clone();
    scores.sort_by(|a, b| b.total_cmp(a));
    prop_assert_eq!(scores, sorted);
  }
}

const KEYS: [&str; 4] = ["", "a", "b", "c"];

/// Per shard: local docid -> (score in thousandths, index into `KEYS`).
fn keyed_shard_lists() -> impl Strategy<Value = Vec<Vec<(u64, f64, &'static str)>>> {
  prop::collection::vec(
    prop::collection::btree_map(1u64..30, (0u32..20, 0usize..KEYS.len()), 0..10).prop_map(|entries| {
      entries
        .into_iter()
        .map(|(docid, (score, key))| (docid, score as f64 / 20.0, KEYS[key]))
        .collect::<Vec<_>>()
    }),
    1..4,
  )
}

/// Full ranking computed the slow way: remap, filter, sort, keep the best
/// entry per non-empty key.
fn reference_ranking(lists: &[Vec<(u64, f64, &str)>], reject_multiple_of: Option<u64>) -> Vec<(u64, f64)> {
  let mapper = DocIdMapper::new(lists.len());
  let mut all: Vec<(u64, f64, &str)> = lists
    .iter()
    .enumerate()
    .flat_map(|(shard, entries)| {
      let mapper = &mapper;
      entries
        .iter()
        .map(move |&(local, score, key)| (mapper.to_global(shard, local).unwrap(), score, key))
    })
    .filter(|(docid, _, _)| reject_multiple_of.map_or(true, |m| docid % m != 0))
    .collect();
  all.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

  let mut seen = std::collections::HashSet::new();
  all
    .into_iter()
    .filter(|(_, _, key)| key.is_empty() || seen.insert(*key))
    .map(|(docid, score, _)| (docid, score))
    .collect()
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(500))]

  #[test]
  fn prop_collapsed_filtered_pages_match_reference(
    lists in keyed_shard_lists(),
    page in 1usize..5,
    reject_multiple_of in prop::option::of(2u64..5),
  ) {
    let expected = reference_ranking(&lists, reject_multiple_of);
    let decider = move |item: &MatchItem| reject_multiple_of.map_or(true, |m| item.docid % m != 0);
    let build = || {
      lists
        .iter()
        .fold(MultiMatch::builder(), |builder, entries| builder.leaf(Box::new(FixedLeaf::keyed(entries))))
        .options(MatchOptions::default().batch_size(2))
        .build()
    };

    let mut paged = Vec::new();
    let mut first = 0;
    loop {
      let set = build().run_match(first, page, Some(&decider)).unwrap();
      let end = (first + page).min(expected.len());
      prop_assert_eq!(pairs(&set), expected[first.min(end)..end].to_vec());
      prop_assert_eq!(set.has_more, expected.len() > first + page);
      paged.extend(pairs(&set));
      if !set.has_more {
        break;
      }
      first += page;
    }
    prop_assert_eq!(paged, expected);
  }
}
