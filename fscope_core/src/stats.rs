//! Count statistics for the probe. Increment-only atomics on the hot
//! path; the read side takes relaxed loads into a point-in-time
//! snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Event counters for one probe instance. Never decremented (the
/// tracked-flow gauge excepted), never reset.
#[derive(Default)]
pub struct ProbeStats {
  ring_full_drops: AtomicU64,
  contention_drops: AtomicU64,
  maxflow_rejects: AtomicU64,
  close_samples: AtomicU64,
  tracked_flows: AtomicU64,
}

impl ProbeStats {
  /// A record was dropped because the ring was inside its guard
  /// margin.
  pub fn ring_full_drop(&self) {
    self.ring_full_drops.fetch_add(1, Ordering::Relaxed);
  }

  /// A segment event was skipped because the flow-table lock was held,
  /// most likely by a purge sweep.
  pub fn contention_drop(&self) {
    self.contention_drops.fetch_add(1, Ordering::Relaxed);
  }

  /// A new flow was refused because the table is at `maxflows`.
  pub fn maxflow_reject(&self) {
    self.maxflow_rejects.fetch_add(1, Ordering::Relaxed);
  }

  /// A terminal sample was emitted for an explicit flow close.
  pub fn close_sample(&self) {
    self.close_samples.fetch_add(1, Ordering::Relaxed);
  }

  /// Update the live flow gauge after an insert, removal or sweep.
  pub fn set_tracked_flows(&self, count: u64) {
    self.tracked_flows.store(count, Ordering::Relaxed);
  }

  /// Aggregate the counters into a snapshot.
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      ring_full_drops: self.ring_full_drops.load(Ordering::Relaxed),
      contention_drops: self.contention_drops.load(Ordering::Relaxed),
      maxflow_rejects: self.maxflow_rejects.load(Ordering::Relaxed),
      close_samples: self.close_samples.load(Ordering::Relaxed),
      tracked_flows: self.tracked_flows.load(Ordering::Relaxed),
    }
  }
}

/// Point-in-time view of the probe counters, for the stats read
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
  /// Records dropped at the ring's guard margin.
  pub ring_full_drops: u64,
  /// Segment events skipped under flow-table lock contention.
  pub contention_drops: u64,
  /// New flows refused at the `maxflows` cap.
  pub maxflow_rejects: u64,
  /// Terminal samples emitted for explicit closes.
  pub close_samples: u64,
  /// Flows currently tracked.
  pub tracked_flows: u64,
}
