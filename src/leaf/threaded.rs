//! Running a leaf on its own worker thread.
//!
//! A `ThreadedLeaf` looks like any other leaf to the orchestrator, but every
//! call is forwarded to a worker over a channel. Non-blocking polls return
//! `Pending` while the worker is busy, which is exactly how a remote or slow
//! shard behaves, so the orchestrator keeps merging from other leaves in the
//! meantime.

use super::{LeafBatch, LeafMatcher, LeafSession, Preparation};
use crate::error::{MatchError, MatchResult};
use crate::types::{ShardIndex, Weight};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace};

enum Command {
  Prepare(LeafSession),
  Fetch(usize),
  Abandon,
}

struct Progress {
  max_possible: Weight,
  remaining_bound: Weight,
  remaining_estimate: usize,
}

enum Reply {
  Prepared(MatchResult<Preparation>, Progress),
  Batch(MatchResult<LeafBatch>, Progress),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
  Prepare,
  Fetch,
}

/// A leaf driven on a dedicated worker thread.
pub struct ThreadedLeaf {
  name: String,
  shard: ShardIndex,
  commands: Option<Sender<Command>>,
  replies: Receiver<Reply>,
  in_flight: Option<InFlight>,
  max_possible: Weight,
  remaining_bound: Weight,
  remaining_estimate: usize,
  worker: Option<JoinHandle<()>>,
}

impl ThreadedLeaf {
  /// Moves `inner` onto a new worker thread.
  pub fn spawn<L>(name: impl Into<String>, inner: L) -> std::io::Result<Self>
  where
    L: LeafMatcher + 'static,
  {
    Self::spawn_with_latency(name, inner, None)
  }

  /// Like [`spawn`](Self::spawn), but the worker sleeps for `latency` before
  /// answering each request, standing in for a network round trip.
  pub fn spawn_with_latency<L>(
    name: impl Into<String>,
    mut inner: L,
    latency: Option<Duration>,
  ) -> std::io::Result<Self>
  where
    L: LeafMatcher + 'static,
  {
    let name = name.into();
    let (command_tx, command_rx) = mpsc::channel::<Command>();
    let (reply_tx, reply_rx) = mpsc::channel::<Reply>();

    let worker = std::thread::Builder::new()
      .name(format!("leaf-{name}"))
      .spawn(move || {
        while let Ok(command) = command_rx.recv() {
          if let Some(latency) = latency {
            std::thread::sleep(latency);
          }
          let reply = match command {
            Command::Prepare(session) => {
              let outcome = inner.prepare(&session, true);
              Reply::Prepared(outcome, progress(&inner))
            }
            Command::Fetch(max_count) => {
              let outcome = inner.next_batch(max_count, true);
              Reply::Batch(outcome, progress(&inner))
            }
            Command::Abandon => {
              inner.abandon();
              continue;
            }
          };
          if reply_tx.send(reply).is_err() {
            break;
          }
        }
      })?;

    Ok(Self {
      name,
      shard: 0,
      commands: Some(command_tx),
      replies: reply_rx,
      in_flight: None,
      max_possible: 0.0,
      remaining_bound: 0.0,
      remaining_estimate: 0,
      worker: Some(worker),
    })
  }

  /// The name given at spawn time.
  pub fn name(&self) -> &str {
    &self.name
  }

  fn send(&mut self, command: Command, kind: InFlight) -> MatchResult<()> {
    let sender = self
      .commands
      .as_ref()
      .ok_or_else(|| MatchError::leaf(self.shard, format!("worker {} shut down", self.name)))?;
    sender
      .send(command)
      .map_err(|_| MatchError::leaf(self.shard, format!("worker {} exited", self.name)))?;
    self.in_flight = Some(kind);
    Ok(())
  }

  /// Waits for (or polls for) the reply to the request in flight.
  fn receive(&mut self, wait: bool) -> MatchResult<Option<Reply>> {
    let reply = if wait {
      self.replies.recv().map_err(|_| TryRecvError::Disconnected)
    } else {
      self.replies.try_recv()
    };
    match reply {
      Ok(reply) => {
        self.in_flight = None;
        Ok(Some(reply))
      }
      Err(TryRecvError::Empty) => Ok(None),
      Err(TryRecvError::Disconnected) => {
        self.in_flight = None;
        Err(MatchError::leaf(self.shard, format!("worker {} disconnected", self.name)))
      }
    }
  }

  fn absorb(&mut self, progress: Progress) {
    self.max_possible = progress.max_possible;
    self.remaining_bound = progress.remaining_bound;
    self.remaining_estimate = progress.remaining_estimate;
  }

  /// Discards the reply to a request nobody is waiting for any more.
  fn drain_in_flight(&mut self) {
    if self.in_flight.take().is_some() {
      let _ = self.replies.recv();
    }
  }
}

fn progress<L: LeafMatcher>(leaf: &L) -> Progress {
  Progress {
    max_possible: leaf.max_possible_score(),
    remaining_bound: leaf.remaining_upper_bound(),
    remaining_estimate: leaf.remaining_estimate(),
  }
}

impl LeafMatcher for ThreadedLeaf {
  fn prepare(&mut self, session: &LeafSession, wait: bool) -> MatchResult<Preparation> {
    self.shard = session.shard;
    if self.in_flight == Some(InFlight::Fetch) {
      self.drain_in_flight();
    }
    if self.in_flight.is_none() {
      self.send(Command::Prepare(session.clone()), InFlight::Prepare)?;
    }
    match self.receive(wait)? {
      None => Ok(Preparation::Pending),
      Some(Reply::Prepared(outcome, progress)) => {
        self.absorb(progress);
        trace!(leaf = %self.name, ?outcome, "remote prepare answered");
        outcome
      }
      Some(Reply::Batch(..)) => Ok(Preparation::Pending),
    }
  }

  fn max_possible_score(&self) -> Weight {
    self.max_possible
  }

  fn remaining_upper_bound(&self) -> Weight {
    self.remaining_bound
  }

  fn next_batch(&mut self, max_count: usize, wait: bool) -> MatchResult<LeafBatch> {
    if self.in_flight == Some(InFlight::Prepare) {
      return Err(MatchError::leaf(
        self.shard,
        format!("worker {} asked for results before it was prepared", self.name),
      ));
    }
    if self.in_flight.is_none() {
      self.send(Command::Fetch(max_count), InFlight::Fetch)?;
    }
    match self.receive(wait)? {
      None => Ok(LeafBatch::Pending),
      Some(Reply::Batch(outcome, progress)) => {
        self.absorb(progress);
        outcome
      }
      Some(Reply::Prepared(..)) => Ok(LeafBatch::Pending),
    }
  }

  fn remaining_estimate(&self) -> usize {
    self.remaining_estimate
  }

  fn abandon(&mut self) {
    self.drain_in_flight();
    if let Some(sender) = &self.commands {
      let _ = sender.send(Command::Abandon);
    }
    debug!(leaf = %self.name, "abandoned");
  }
}

impl Drop for ThreadedLeaf {
  fn drop(&mut self) {
    // Closing the command channel ends the worker loop.
    self.commands.take();
    if let Some(worker) = self.worker.take() {
      let _ = worker.join();
    }
  }
}
