//! The match orchestrator.
//!
//! [`MultiMatch`] runs one query over a fixed set of leaves (one per shard)
//! and merges what they return into a single ranked window.

pub mod merge;

pub use merge::MergeBuffer;

use crate::compare::MatchComparator;
use crate::decider::MatchDecider;
use crate::docid::DocIdMapper;
use crate::error::{MatchError, MatchResult};
use crate::leaf::{LeafBatch, LeafMatcher, LeafSession, LeafState, Preparation};
use crate::options::MatchOptions;
use crate::rset::RelevanceSet;
use crate::stats::{LocalStatsGatherer, StatsGatherer};
use crate::types::{MatchItem, MatchSet, Query, ShardIndex, Weight};
use crate::weighting::WeightingScheme;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info_span, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Lets a caller abort a running match from another thread.
///
/// The orchestrator checks the token between poll iterations; a tripped token
/// makes the match fail with [`MatchError::Cancelled`] and nothing collected
/// so far is returned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  /// Creates an untripped token.
  pub fn new() -> Self {
    Self::default()
  }

  /// Trips the token. Every clone observes it; there is no way to reset.
  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  /// Whether [`cancel`](Self::cancel) has been called on any clone.
  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

/// Coordinates a match over several shards.
///
/// The orchestrator owns its leaves, its statistics gatherer and the
/// relevance set, and drops them with itself. Query, relevance set,
/// weighting and options can be changed between matches; the leaf set is
/// fixed at construction, which keeps the global id space stable.
///
/// Running a match takes `&mut self`, so one orchestrator serves one match
/// at a time.
///
/// # Examples
///
/// ```rust
/// use shardrank::prelude::*;
/// use std::sync::Arc;
///
/// let a = MemoryShard::from_texts(["rust search engine", "garden tools"]);
/// let b = MemoryShard::from_texts(["search in rust", "rust rust rust"]);
///
/// let mut matcher = MultiMatch::builder()
///     .leaf(Box::new(ShardMatcher::new(Arc::new(a))))
///     .leaf(Box::new(ShardMatcher::new(Arc::new(b))))
///     .build();
///
/// matcher.set_query(Query::any_of(["rust"]));
/// let results = matcher.run_match(0, 10, None).unwrap();
/// assert_eq!(results.len(), 3);
/// assert_eq!(results.items[0].docid, 4); // shard 1, local 2
/// ```
pub struct MultiMatch {
  leaves: Vec<Box<dyn LeafMatcher>>,
  gatherer: Arc<dyn StatsGatherer>,
  rset: RelevanceSet,
  query: Arc<Query>,
  weighting: WeightingScheme,
  options: MatchOptions,
  round: u64,
  prepared_round: Option<u64>,
}

impl MultiMatch {
  /// Creates a builder.
  pub fn builder() -> MultiMatchBuilder {
    MultiMatchBuilder::new()
  }

  /// Orchestrator over `leaves` with in-process statistics.
  pub fn new(leaves: Vec<Box<dyn LeafMatcher>>) -> Self {
    Self::with_gatherer(leaves, Box::new(LocalStatsGatherer::new()))
  }

  /// Orchestrator over `leaves` using the given statistics gatherer.
  pub fn with_gatherer(leaves: Vec<Box<dyn LeafMatcher>>, gatherer: Box<dyn StatsGatherer>) -> Self {
    Self {
      leaves,
      gatherer: Arc::from(gatherer),
      rset: RelevanceSet::new(),
      query: Arc::new(Query::default()),
      weighting: WeightingScheme::default(),
      options: MatchOptions::default(),
      round: 0,
      prepared_round: None,
    }
  }

  /// Number of shards.
  pub fn shard_count(&self) -> usize {
    self.leaves.len()
  }

  /// Replaces the query.
  pub fn set_query(&mut self, query: Query) {
    self.query = Arc::new(query);
    self.prepared_round = None;
  }

  /// Takes ownership of a relevance set, dropping the previous one.
  pub fn set_rset(&mut self, rset: RelevanceSet) {
    self.rset = rset;
    self.prepared_round = None;
  }

  /// Gives up the relevance set, leaving an empty one in its place.
  pub fn take_rset(&mut self) -> RelevanceSet {
    self.prepared_round = None;
    std::mem::take(&mut self.rset)
  }

  /// Selects the weighting scheme for the next match. Parameters are
  /// checked when a match starts, see [`WeightingScheme::validate`].
  pub fn set_weighting(&mut self, weighting: WeightingScheme) {
    self.weighting = weighting;
    self.prepared_round = None;
  }

  /// Replaces the match options. A running match keeps the copy it took
  /// when it started.
  pub fn set_options(&mut self, options: MatchOptions) {
    self.options = options;
    self.prepared_round = None;
  }

  /// The options the next match will use.
  pub fn options(&self) -> &MatchOptions {
    &self.options
  }

  /// Largest score any leaf could give a document for the current query and
  /// weighting. Runs the preparation phase only, no matching.
  pub fn max_weight(&mut self) -> MatchResult<Weight> {
    self.weighting.validate()?;
    if self.prepared_round != Some(self.round) {
      let options = self.options.clone();
      self.prepare_leaves(&options, &CancelToken::new())?;
    }
    Ok(self.max_possible())
  }

  /// Runs the match and returns one window of the global ranking.
  ///
  /// The match goes through these stages:
  ///
  /// 1.  **Validation**: the window and the weighting parameters are checked
  ///     before any leaf is contacted.
  /// 2.  **Preparation**: a statistics round is opened for every leaf, and the
  ///     leaves are polled until each has contributed its local counters and
  ///     read back the merged snapshot. Under the `parallel` feature each
  ///     polling round runs on the rayon pool.
  /// 3.  **Collection**: leaves are asked for batches without blocking; when
  ///     none has anything ready, the one with the best remaining entry is
  ///     waited on. Local ids are remapped into the global id space and the
  ///     decider is applied.
  /// 4.  **Merging**: entries are folded into a bounded buffer holding the
  ///     best `first + maxitems + 1` entries, keeping only the best entry per
  ///     collapse key.
  /// 5.  **Early termination**: under relevance ordering, once the buffer is
  ///     full a leaf whose best remaining score is below the worst buffered
  ///     entry is retired without being read further.
  /// 6.  **Trimming**: the first `first` entries are skipped and up to
  ///     `maxitems` returned.
  ///
  /// # Arguments
  ///
  /// * `first` - Global rank of the first entry to return, 0-based.
  /// * `maxitems` - Largest number of entries to return. Zero still runs the
  ///   match, so counts and `has_more` are filled in.
  /// * `decider` - Optional predicate; rejected entries take no rank slot and
  ///   are not counted. `None` accepts everything.
  ///
  /// # Returns
  ///
  /// A [`MatchSet`] whose entries are sorted by the active ordering. A window
  /// past the end of the ranking is empty, not an error.
  ///
  /// # Errors
  ///
  /// * [`MatchError::InvalidArgument`] if `first + maxitems` overflows, or
  ///   exceeds [`MatchOptions::max_window`] when a cap is configured.
  /// * [`MatchError::Config`] for invalid options or weighting parameters.
  /// * [`MatchError::LeafUnavailable`] if any leaf fails; no partial ranking
  ///   is returned.
  /// * [`MatchError::StatsExchange`] if the statistics round cannot start.
  ///
  /// # Examples
  ///
  /// ```rust
  /// use shardrank::prelude::*;
  /// use std::sync::Arc;
  ///
  /// let shard = MemoryShard::from_texts(["rust", "rust rust", "go", "rust go"]);
  /// let mut matcher = MultiMatch::new(vec![Box::new(ShardMatcher::new(Arc::new(shard)))]);
  /// matcher.set_query(Query::any_of(["rust"]));
  ///
  /// let page = matcher.run_match(1, 1, None).unwrap();
  /// assert_eq!(page.len(), 1);
  /// assert!(page.has_more);
  ///
  /// let not_two = |item: &MatchItem| item.docid != 2;
  /// let filtered = matcher.run_match(0, 10, Some(&not_two)).unwrap();
  /// assert_eq!(filtered.len(), 2);
  /// ```
  pub fn run_match(
    &mut self,
    first: usize,
    maxitems: usize,
    decider: Option<&dyn MatchDecider>,
  ) -> MatchResult<MatchSet> {
    self.run_match_with_cancel(first, maxitems, decider, &CancelToken::new())
  }

  /// Like [`run_match`](Self::run_match), abortable through `cancel`.
  pub fn run_match_with_cancel(
    &mut self,
    first: usize,
    maxitems: usize,
    decider: Option<&dyn MatchDecider>,
    cancel: &CancelToken,
  ) -> MatchResult<MatchSet> {
    let span = info_span!("run_match", first, maxitems, leaves = self.leaves.len());
    let _enter = span.enter();

    // Snapshot the options so nothing changes under a running match.
    let options = self.options.clone();
    options.validate()?;
    self.weighting.validate()?;
    let capacity = validate_window(first, maxitems, options.max_window)?;

    if self.leaves.is_empty() {
      return Ok(MatchSet::empty(first));
    }

    self.prepare_leaves(&options, cancel)?;
    // Leaves are about to be drained; max_weight must prepare afresh.
    self.prepared_round = None;

    let outcome = self.collect(&options, capacity, decider, cancel);
    let (buffer, unseen) = match outcome {
      Ok(collected) => collected,
      Err(e) => {
        self.abandon_all();
        return Err(e);
      }
    };

    let distinct = buffer.distinct();
    let max_attained = buffer.max_attained();
    let (items, has_more) = buffer.into_window(first, maxitems);
    debug!(returned = items.len(), distinct, unseen, has_more, "match trimmed");

    Ok(MatchSet {
      first,
      items,
      matches_lower_bound: distinct,
      matches_estimated: distinct + unseen,
      matches_upper_bound: distinct + unseen,
      max_possible: self.max_possible(),
      max_attained,
      has_more,
    })
  }

  fn max_possible(&self) -> Weight {
    self
      .leaves
      .iter()
      .map(|leaf| leaf.max_possible_score())
      .reduce(Weight::max)
      .unwrap_or(0.0)
  }

  fn sessions(&self, options: &MatchOptions) -> Vec<LeafSession> {
    let shard_count = self.leaves.len();
    let mapper = DocIdMapper::new(shard_count);
    (0..shard_count)
      .map(|shard| LeafSession {
        shard,
        shard_count,
        round: self.round,
        query: Arc::clone(&self.query),
        weighting: self.weighting,
        rset: Arc::from(self.rset.local_ids(shard, &mapper)),
        collapse_slot: options.collapse_slot,
        stats: Arc::clone(&self.gatherer),
      })
      .collect()
  }

  /// Brings every leaf to `Ready`, polling without blocking and only
  /// blocking on one leaf when a whole round made no progress.
  fn prepare_leaves(&mut self, options: &MatchOptions, cancel: &CancelToken) -> MatchResult<()> {
    self.round += 1;
    self.gatherer.begin(self.leaves.len())?;
    let sessions = self.sessions(options);
    let mut states = vec![LeafState::Unprepared; self.leaves.len()];

    loop {
      if cancel.is_cancelled() {
        warn!("match cancelled during preparation");
        self.abandon_all();
        return Err(MatchError::Cancelled);
      }

      #[cfg(feature = "parallel")]
      let outcomes: Vec<MatchResult<bool>> = self
        .leaves
        .par_iter_mut()
        .zip(states.par_iter_mut())
        .zip(sessions.par_iter())
        .map(|((leaf, state), session)| poll_preparation(leaf.as_mut(), state, session, false))
        .collect();

      #[cfg(not(feature = "parallel"))]
      let outcomes: Vec<MatchResult<bool>> = self
        .leaves
        .iter_mut()
        .zip(states.iter_mut())
        .zip(sessions.iter())
        .map(|((leaf, state), session)| poll_preparation(leaf.as_mut(), state, session, false))
        .collect();

      let mut progressed = false;
      for outcome in outcomes {
        match outcome {
          Ok(step) => progressed |= step,
          Err(e) => {
            warn!(error = %e, "leaf failed to prepare");
            self.abandon_all();
            return Err(e);
          }
        }
      }

      if states.iter().all(|state| *state == LeafState::Ready) {
        break;
      }

      if !progressed {
        if let Some(shard) = states.iter().position(|state| *state == LeafState::Preparing) {
          let blocked = poll_preparation(self.leaves[shard].as_mut(), &mut states[shard], &sessions[shard], true);
          match blocked {
            Ok(true) => {}
            Ok(false) => std::thread::yield_now(),
            Err(e) => {
              warn!(shard, error = %e, "leaf failed to prepare");
              self.abandon_all();
              return Err(e);
            }
          }
        }
      }
    }

    debug!(round = self.round, "all leaves prepared");
    self.prepared_round = Some(self.round);
    Ok(())
  }

  /// Pulls batches from the leaves until they are drained or can no longer
  /// change the window. Returns the buffer and an estimate of the entries
  /// left behind in retired leaves.
  fn collect(
    &mut self,
    options: &MatchOptions,
    capacity: usize,
    decider: Option<&dyn MatchDecider>,
    cancel: &CancelToken,
  ) -> MatchResult<(MergeBuffer, usize)> {
    let mapper = DocIdMapper::new(self.leaves.len());
    let comparator = MatchComparator::from_options(options);
    let mut buffer = MergeBuffer::new(comparator, capacity);
    let mut states = vec![LeafState::Ready; self.leaves.len()];
    let mut unseen = 0;

    loop {
      if cancel.is_cancelled() {
        warn!("match cancelled while collecting");
        return Err(MatchError::Cancelled);
      }

      // Leaves whose best remaining entry cannot make the window are done.
      for (shard, leaf) in self.leaves.iter_mut().enumerate() {
        if states[shard].is_live() && buffer.excludes(leaf.remaining_upper_bound()) {
          debug!(shard, bound = leaf.remaining_upper_bound(), "leaf retired early");
          unseen += leaf.remaining_estimate();
          leaf.abandon();
          states[shard] = LeafState::Exhausted;
        }
      }

      let live: Vec<ShardIndex> = (0..self.leaves.len()).filter(|&s| states[s].is_live()).collect();
      if live.is_empty() {
        break;
      }

      let mut progressed = false;
      for &shard in &live {
        let batch = fetch(self.leaves[shard].as_mut(), shard, options.batch_size, false)?;
        progressed |= fold(batch, shard, &mut states[shard], &mapper, decider, &mut buffer)?;
      }

      if !progressed {
        // Block on the leaf that could still contribute the best entry.
        let shard = live
          .iter()
          .copied()
          .max_by(|&a, &b| {
            let (ba, bb) = (
              self.leaves[a].remaining_upper_bound(),
              self.leaves[b].remaining_upper_bound(),
            );
            ba.total_cmp(&bb).then(b.cmp(&a))
          })
          .unwrap_or(live[0]);
        let batch = fetch(self.leaves[shard].as_mut(), shard, options.batch_size, true)?;
        if !fold(batch, shard, &mut states[shard], &mapper, decider, &mut buffer)? {
          std::thread::yield_now();
        }
      }
    }

    Ok((buffer, unseen))
  }

  fn abandon_all(&mut self) {
    for leaf in &mut self.leaves {
      leaf.abandon();
    }
    self.prepared_round = None;
  }
}

/// Checks the window and returns the merge buffer capacity: the window, the
/// ranks before it, and one lookahead slot for `has_more`.
///
/// Only an unrepresentable window end is always rejected; `max_window` is an
/// opt-in cap.
fn validate_window(first: usize, maxitems: usize, max_window: Option<usize>) -> MatchResult<usize> {
  let end = first
    .checked_add(maxitems)
    .ok_or_else(|| MatchError::InvalidArgument(format!("first {first} + maxitems {maxitems} overflows")))?;
  if let Some(limit) = max_window.filter(|&limit| end > limit) {
    return Err(MatchError::InvalidArgument(format!(
      "window end {end} exceeds the limit of {limit}"
    )));
  }
  // A window ending at usize::MAX has no room for lookahead; nothing can
  // rank after it anyway.
  Ok(end.saturating_add(1))
}

/// Polls one leaf's preparation. Returns whether its state moved.
fn poll_preparation(
  leaf: &mut dyn LeafMatcher,
  state: &mut LeafState,
  session: &LeafSession,
  wait: bool,
) -> MatchResult<bool> {
  if *state == LeafState::Ready {
    return Ok(false);
  }
  match leaf.prepare(session, wait) {
    Ok(Preparation::Ready) => {
      *state = LeafState::Ready;
      Ok(true)
    }
    Ok(Preparation::Pending) => {
      let moved = *state == LeafState::Unprepared;
      *state = LeafState::Preparing;
      Ok(moved)
    }
    Err(e) => {
      *state = LeafState::Failed;
      Err(as_leaf_error(session.shard, e))
    }
  }
}

fn fetch(leaf: &mut dyn LeafMatcher, shard: ShardIndex, batch_size: usize, wait: bool) -> MatchResult<LeafBatch> {
  leaf.next_batch(batch_size, wait).map_err(|e| {
    warn!(shard, error = %e, "leaf failed while fetching");
    as_leaf_error(shard, e)
  })
}

/// Folds a batch into the buffer. Returns whether the leaf made progress.
fn fold(
  batch: LeafBatch,
  shard: ShardIndex,
  state: &mut LeafState,
  mapper: &DocIdMapper,
  decider: Option<&dyn MatchDecider>,
  buffer: &mut MergeBuffer,
) -> MatchResult<bool> {
  match batch {
    LeafBatch::Pending => Ok(false),
    LeafBatch::Exhausted => {
      *state = LeafState::Exhausted;
      Ok(true)
    }
    // Leaves report `Pending` or `Exhausted` instead of an empty batch;
    // accepting one would let a leaf keep the match polling forever.
    LeafBatch::Items(items) if items.is_empty() => Err(MatchError::leaf(shard, "leaf returned an empty batch")),
    LeafBatch::Items(items) => {
      *state = LeafState::Draining;
      for local in items {
        let docid = mapper
          .to_global(shard, local.docid)
          .ok_or_else(|| MatchError::leaf(shard, format!("invalid local document id {}", local.docid)))?;
        let item = MatchItem {
          docid,
          score: local.score,
          collapse_key: local.collapse_key,
        };
        if decider.map_or(true, |decider| decider.accept(&item)) {
          buffer.push(item);
        }
      }
      Ok(true)
    }
  }
}

/// Leaf failures all surface as `LeafUnavailable` for the right shard;
/// cancellation passes through untouched.
fn as_leaf_error(shard: ShardIndex, error: MatchError) -> MatchError {
  match error {
    MatchError::Cancelled => MatchError::Cancelled,
    MatchError::LeafUnavailable { reason, .. } => MatchError::LeafUnavailable { shard, reason },
    other => MatchError::leaf(shard, other.to_string()),
  }
}

/// A builder for [`MultiMatch`].
///
/// Leaves are numbered in the order they are added, and that numbering fixes
/// the global id space. Anything not set falls back to the defaults of
/// [`MultiMatch::new`]: in-process statistics, [`MatchOptions::default`] and
/// [`WeightingScheme::default`].
///
/// # Examples
///
/// ```rust
/// use shardrank::prelude::*;
/// use std::sync::Arc;
///
/// let server = Arc::new(StatsServer::new());
/// let link = shardrank::stats::LoopbackLink::new(server);
///
/// let matcher = MultiMatch::builder()
///     .leaf(Box::new(ShardMatcher::new(Arc::new(MemoryShard::from_texts(["a b"])))))
///     .leaf(Box::new(ShardMatcher::new(Arc::new(MemoryShard::from_texts(["b c"])))))
///     .gatherer(Box::new(NetworkStatsGatherer::new(link)))
///     .options(MatchOptions::default().collapse_on(0).batch_size(16))
///     .weighting(WeightingScheme::Trad { k: 1.2 })
///     .build();
/// assert_eq!(matcher.shard_count(), 2);
/// ```
#[derive(Default)]
pub struct MultiMatchBuilder {
  leaves: Vec<Box<dyn LeafMatcher>>,
  gatherer: Option<Box<dyn StatsGatherer>>,
  options: Option<MatchOptions>,
  weighting: Option<WeightingScheme>,
}

impl MultiMatchBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a leaf. Leaves are numbered in the order they are added.
  pub fn leaf(mut self, leaf: Box<dyn LeafMatcher>) -> Self {
    self.leaves.push(leaf);
    self
  }

  /// Uses `gatherer` instead of in-process statistics.
  pub fn gatherer(mut self, gatherer: Box<dyn StatsGatherer>) -> Self {
    self.gatherer = Some(gatherer);
    self
  }

  /// Sets the initial match options.
  pub fn options(mut self, options: MatchOptions) -> Self {
    self.options = Some(options);
    self
  }

  /// Sets the initial weighting scheme.
  pub fn weighting(mut self, weighting: WeightingScheme) -> Self {
    self.weighting = Some(weighting);
    self
  }

  /// Builds the orchestrator. Nothing is contacted until the first match.
  pub fn build(self) -> MultiMatch {
    let gatherer = self
      .gatherer
      .unwrap_or_else(|| Box::new(LocalStatsGatherer::new()));
    let mut multimatch = MultiMatch::with_gatherer(self.leaves, gatherer);
    if let Some(options) = self.options {
      multimatch.options = options;
    }
    if let Some(weighting) = self.weighting {
      multimatch.weighting = weighting;
    }
    multimatch
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_window_validation() {
    assert_eq!(validate_window(0, 10, Some(100)).unwrap(), 11);
    assert_eq!(validate_window(0, 50_000, None).unwrap(), 50_001);
    assert_eq!(validate_window(usize::MAX, 0, None).unwrap(), usize::MAX);
    assert!(matches!(
      validate_window(usize::MAX, 1, None),
      Err(MatchError::InvalidArgument(_))
    ));
    assert!(matches!(validate_window(90, 20, Some(100)), Err(MatchError::InvalidArgument(_))));
  }

  #[test]
  fn test_leaf_errors_are_reattributed() {
    let err = as_leaf_error(4, MatchError::leaf(0, "boom"));
    assert!(matches!(err, MatchError::LeafUnavailable { shard: 4, .. }));
    let err = as_leaf_error(1, MatchError::StatsExchange("down".into()));
    assert!(matches!(err, MatchError::LeafUnavailable { shard: 1, .. }));
    assert!(matches!(as_leaf_error(1, MatchError::Cancelled), MatchError::Cancelled));
  }

  #[test]
  fn test_no_leaves_is_empty() {
    let mut multimatch = MultiMatch::new(Vec::new());
    let set = multimatch.run_match(3, 10, None).unwrap();
    assert_eq!(set, MatchSet::empty(3));
  }

  #[test]
  fn test_cancel_token_is_shared() {
    let token = CancelToken::new();
    let clone = token.clone();
    clone.cancel();
    assert!(token.is_cancelled());
  }
}
