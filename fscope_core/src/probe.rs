use crate::flow::{FlowKey, FlowRecord};
use crate::ring::SampleRing;
use crate::sample::{FlowSample, ProtocolSnapshot, CLOSE_SENTINEL};
use crate::stats::{ProbeStats, StatsSnapshot};
use crate::table::FlowTable;
use fscope_config::{ConfigError, ProbeConfig};
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

/// One notification from the event source, as carried over the
/// daemon's intake socket. Test harnesses can feed these directly via
/// [`FlowProbe::handle_event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProbeEvent {
  /// A segment was received on a tracked (or trackable) flow.
  Segment {
    /// The flow's 4-tuple.
    key: FlowKey,
    /// Current send-sequence number.
    seq: u32,
    /// Segment length in bytes.
    length: u16,
    /// Protocol state at the time of the event.
    snapshot: ProtocolSnapshot,
    /// Monotonic timestamp, nanoseconds since boot.
    timestamp: u64,
  },
  /// The flow was torn down.
  Close {
    /// The flow's 4-tuple.
    key: FlowKey,
    /// Final send-sequence number.
    seq: u32,
    /// Protocol state at the time of teardown.
    snapshot: ProtocolSnapshot,
    /// Monotonic timestamp, nanoseconds since boot.
    timestamp: u64,
  },
}

/// Error type for probe construction.
#[derive(Error, Debug)]
pub enum ProbeError {
  /// The configuration refuses to produce a runnable probe.
  #[error("Invalid probe configuration")]
  InvalidConfig(#[from] ConfigError),
}

/// The flow-tracking engine. Owns the flow table, the sample ring and
/// the counters; the event source calls [`on_segment`] and
/// [`on_flow_close`], the consumer drains via [`drain`], and the purge
/// sweeper ticks [`expire_idle`].
///
/// The table sits behind one exclusive lock. The segment path only
/// ever try-locks it; when the lock is held (typically by a purge
/// sweep) the event is counted and skipped, because that caller is on
/// a hot path and must not stall. The ring has its own narrower lock,
/// taken after the table lock is released.
///
/// [`on_segment`]: FlowProbe::on_segment
/// [`on_flow_close`]: FlowProbe::on_flow_close
/// [`drain`]: FlowProbe::drain
/// [`expire_idle`]: FlowProbe::expire_idle
pub struct FlowProbe {
  port: u16,
  full: bool,
  probetime_nanos: u64,
  purgetime_nanos: u64,
  purge_interval: Duration,
  table: Mutex<FlowTable>,
  ring: SampleRing,
  stats: ProbeStats,
  /// Congestion window of the most recently emitted sample, across
  /// all flows. The cheap cwnd-change heuristic compares against this
  /// global value, not a per-flow one.
  last_cwnd: AtomicU32,
}

impl FlowProbe {
  /// Validate the configuration and allocate the table and ring up
  /// front. Fails rather than running degraded.
  pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
    config.validate()?;
    let bufsize = config.effective_bufsize();
    let hashsize = config.effective_hashsize();
    info!(
      "Flow probe registered (port={}) bufsize={} probetime={}ms purgetime={}s maxflows={} hashsize={}",
      config.port, bufsize, config.probetime_ms, config.purgetime_secs,
      config.maxflows, hashsize
    );
    Ok(Self {
      port: config.port,
      full: config.full,
      probetime_nanos: config.probe_interval().as_nanos() as u64,
      purgetime_nanos: config.purge_interval().as_nanos() as u64,
      purge_interval: config.purge_interval(),
      table: Mutex::new(FlowTable::with_settings(hashsize, config.maxflows)),
      ring: SampleRing::new(bufsize),
      stats: ProbeStats::default(),
      last_cwnd: AtomicU32::new(0),
    })
  }

  /// Entry point for every received segment. Never blocks: if the
  /// flow-table lock is held, the event is dropped and counted.
  pub fn on_segment(
    &self,
    key: &FlowKey,
    seq: u32,
    length: u16,
    snapshot: &ProtocolSnapshot,
    now: u64,
  ) {
    if !key.touches_port(self.port) {
      return;
    }
    let Some(mut table) = self.table.try_lock() else {
      self.stats.contention_drop();
      return;
    };
    let sample = match table.find_mut(key) {
      Some(record) => {
        let cwnd_changed =
          snapshot.snd_cwnd != self.last_cwnd.load(Ordering::Relaxed);
        let interval_elapsed =
          now.saturating_sub(record.last_sampled_at) >= self.probetime_nanos;
        if self.full || cwnd_changed || interval_elapsed {
          record.last_sampled_at = now;
          record.advance_seq(seq);
          Some(FlowSample::from_event(
            key,
            snapshot,
            now,
            length,
            record.cumulative_bytes,
            record.first_seq,
          ))
        } else {
          None
        }
      }
      None => {
        let record = FlowRecord::new(*key, seq, now);
        let first_seq = record.first_seq;
        match table.insert(record) {
          Ok(()) => {
            self.stats.set_tracked_flows(table.len() as u64);
            // The first sample always goes out; no bytes accounted yet.
            Some(FlowSample::from_event(key, snapshot, now, length, 0, first_seq))
          }
          Err(_) => {
            self.stats.maxflow_reject();
            debug!("Flow count at maxflows limit, rejecting {:?}", key);
            None
          }
        }
      }
    };
    drop(table);
    if let Some(sample) = sample {
      self.emit(sample, snapshot);
    }
  }

  /// Entry point for flow teardown. Teardown is rare, so this path may
  /// block briefly on the table lock. Emits exactly one terminal
  /// record, then removes the flow; a second close for the same key is
  /// a no-op.
  pub fn on_flow_close(
    &self,
    key: &FlowKey,
    seq: u32,
    snapshot: &ProtocolSnapshot,
    now: u64,
  ) {
    if !key.touches_port(self.port) {
      return;
    }
    let mut table = self.table.lock();
    let Some(record) = table.find_mut(key) else {
      debug!("Close for flow {:?} with no table entry", key);
      return;
    };
    record.advance_seq(seq);
    let sample = FlowSample::from_event(
      key,
      snapshot,
      now,
      CLOSE_SENTINEL,
      record.cumulative_bytes,
      record.first_seq,
    );
    table.remove(key);
    self.stats.set_tracked_flows(table.len() as u64);
    drop(table);
    self.stats.close_sample();
    self.emit(sample, snapshot);
  }

  /// Dispatch one deserialized event to the matching entry point.
  pub fn handle_event(&self, event: ProbeEvent) {
    match event {
      ProbeEvent::Segment {
        key,
        seq,
        length,
        snapshot,
        timestamp,
      } => self.on_segment(&key, seq, length, &snapshot, timestamp),
      ProbeEvent::Close {
        key,
        seq,
        snapshot,
        timestamp,
      } => self.on_flow_close(&key, seq, &snapshot, timestamp),
    }
  }

  fn emit(&self, sample: FlowSample, snapshot: &ProtocolSnapshot) {
    if self.ring.push(sample).is_err() {
      self.stats.ring_full_drop();
    }
    // Recorded even when the ring refused the record, matching the
    // sampling heuristic's view of "last emitted" state.
    self.last_cwnd.store(snapshot.snd_cwnd, Ordering::Relaxed);
  }

  /// Evict flows idle for at least the purge threshold. Called from
  /// the sweeper tick; takes the table lock blocking (the segment path
  /// yields to us, not the other way around). Evictions are silent.
  pub fn expire_idle(&self, now: u64) -> usize {
    let mut table = self.table.lock();
    let evicted = table.expire_idle(now, self.purgetime_nanos, |record| {
      debug!("Purging idle flow {:?}", record.key);
    });
    self.stats.set_tracked_flows(table.len() as u64);
    evicted
  }

  /// Unconditionally release every tracked flow. Runs as the final
  /// sweep during shutdown.
  pub fn purge_all(&self) -> usize {
    let mut table = self.table.lock();
    let purged = table.purge_all(|_| {});
    self.stats.set_tracked_flows(0);
    purged
  }

  /// Consume all published records, in order.
  pub fn drain(&self) -> Vec<FlowSample> {
    self.ring.drain()
  }

  /// Block until records are available or the timeout elapses; returns
  /// the number waiting. Advisory helper for the export reader.
  pub fn wait_for_samples(&self, timeout: Duration) -> usize {
    self.ring.wait_for_samples(timeout)
  }

  /// Point-in-time counter snapshot.
  pub fn stats(&self) -> StatsSnapshot {
    self.stats.snapshot()
  }

  /// Number of flows currently tracked.
  pub fn tracked_flows(&self) -> usize {
    self.table.lock().len()
  }

  /// The configured sweep tick interval.
  pub fn purge_interval(&self) -> Duration {
    self.purge_interval
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn probe(config: ProbeConfig) -> FlowProbe {
    FlowProbe::new(config).unwrap()
  }

  fn key(src_port: u16, dst_port: u16) -> FlowKey {
    FlowKey {
      src: "10.0.0.1".parse::<std::net::IpAddr>().unwrap().into(),
      dst: "10.0.0.2".parse::<std::net::IpAddr>().unwrap().into(),
      src_port,
      dst_port,
    }
  }

  fn snapshot(cwnd: u32) -> ProtocolSnapshot {
    ProtocolSnapshot {
      snd_cwnd: cwnd,
      ..Default::default()
    }
  }

  #[test]
  fn test_invalid_config_is_fatal() {
    let config = ProbeConfig {
      bufsize: 0,
      ..Default::default()
    };
    assert!(matches!(
      FlowProbe::new(config),
      Err(ProbeError::InvalidConfig(_))
    ));
  }

  #[test]
  fn test_first_segment_always_samples() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      ..Default::default()
    });
    p.on_segment(&key(1000, 80), 5000, 100, &snapshot(10), 0);
    let samples = p.drain();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].cumulative_bytes, 0);
    assert_eq!(samples[0].first_seq, 5000);
    assert_eq!(p.tracked_flows(), 1);
  }

  #[test]
  fn test_port_filter_skips_unmatched_flows() {
    let p = probe(ProbeConfig {
      port: 443,
      bufsize: 16,
      ..Default::default()
    });
    p.on_segment(&key(1000, 80), 1, 100, &snapshot(10), 0);
    assert_eq!(p.tracked_flows(), 0);
    assert!(p.drain().is_empty());
    // Either endpoint may match
    p.on_segment(&key(1000, 443), 1, 100, &snapshot(10), 0);
    p.on_segment(&key(443, 9000), 1, 100, &snapshot(10), 0);
    assert_eq!(p.tracked_flows(), 2);
  }

  #[test]
  fn test_steady_cwnd_within_interval_is_not_sampled() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      probetime_ms: 1000,
      ..Default::default()
    });
    let k = key(1000, 80);
    p.on_segment(&k, 1000, 100, &snapshot(10), 0);
    // Same cwnd, well inside the interval: policy says skip.
    p.on_segment(&k, 2000, 100, &snapshot(10), 1_000_000);
    assert_eq!(p.drain().len(), 1);
  }

  #[test]
  fn test_cwnd_change_triggers_sample() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      probetime_ms: 1000,
      ..Default::default()
    });
    let k = key(1000, 80);
    p.on_segment(&k, 1000, 100, &snapshot(10), 0);
    p.on_segment(&k, 2000, 100, &snapshot(20), 1_000_000);
    let samples = p.drain();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].snd_cwnd, 20);
    assert_eq!(samples[1].cumulative_bytes, 1000);
  }

  #[test]
  fn test_elapsed_interval_triggers_sample() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      probetime_ms: 1,
      ..Default::default()
    });
    let k = key(1000, 80);
    p.on_segment(&k, 1000, 100, &snapshot(10), 0);
    // Unchanged cwnd, but a full interval has passed.
    p.on_segment(&k, 2000, 100, &snapshot(10), 2_000_000);
    assert_eq!(p.drain().len(), 2);
  }

  #[test]
  fn test_contended_segment_is_dropped_and_counted() {
    use std::sync::Arc;
    use std::time::Instant;

    let p = Arc::new(probe(ProbeConfig {
      bufsize: 16,
      ..Default::default()
    }));
    // Hold the table lock, as a sweep in progress would.
    let guard = p.table.lock();
    let contended = p.clone();
    let elapsed = std::thread::spawn(move || {
      let started = Instant::now();
      contended.on_segment(&key(1000, 80), 1, 100, &snapshot(10), 0);
      started.elapsed()
    })
    .join()
    .unwrap();
    drop(guard);

    // The segment path returned without waiting for the lock...
    assert!(elapsed < Duration::from_millis(100));
    // ...and the event was dropped and counted, not processed.
    assert_eq!(p.stats().contention_drops, 1);
    assert_eq!(p.tracked_flows(), 0);
    assert!(p.drain().is_empty());
  }

  #[test]
  fn test_maxflows_rejection_is_counted() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      maxflows: 1,
      ..Default::default()
    });
    p.on_segment(&key(1000, 80), 1, 100, &snapshot(10), 0);
    p.on_segment(&key(2000, 80), 1, 100, &snapshot(10), 0);
    assert_eq!(p.tracked_flows(), 1);
    assert_eq!(p.stats().maxflow_rejects, 1);
    assert_eq!(p.drain().len(), 1);
  }

  #[test]
  fn test_ring_overflow_is_counted_not_propagated() {
    let p = probe(ProbeConfig {
      bufsize: 4,
      full: true,
      ..Default::default()
    });
    let k = key(1000, 80);
    for n in 0..10 {
      p.on_segment(&k, 1000 + n, 100, &snapshot(10), n as u64);
    }
    assert_eq!(p.drain().len(), 3);
    assert_eq!(p.stats().ring_full_drops, 7);
  }

  #[test]
  fn test_close_emits_terminal_sample_and_removes_flow() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      ..Default::default()
    });
    let k = key(1000, 80);
    p.on_segment(&k, 1000, 100, &snapshot(10), 0);
    p.on_flow_close(&k, 2500, &snapshot(10), 1);
    let samples = p.drain();
    assert_eq!(samples.len(), 2);
    assert!(samples[1].is_close());
    assert_eq!(samples[1].cumulative_bytes, 1500);
    assert_eq!(p.tracked_flows(), 0);
    assert_eq!(p.stats().close_samples, 1);
  }

  #[test]
  fn test_double_close_is_a_noop() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      ..Default::default()
    });
    let k = key(1000, 80);
    p.on_segment(&k, 1000, 100, &snapshot(10), 0);
    p.on_flow_close(&k, 2000, &snapshot(10), 1);
    p.on_flow_close(&k, 2000, &snapshot(10), 2);
    assert_eq!(p.drain().len(), 2);
    assert_eq!(p.stats().close_samples, 1);
  }

  #[test]
  fn test_close_for_unknown_flow_is_a_noop() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      ..Default::default()
    });
    p.on_flow_close(&key(1000, 80), 2000, &snapshot(10), 0);
    assert!(p.drain().is_empty());
    assert_eq!(p.stats().close_samples, 0);
  }

  #[test]
  fn test_expire_idle_removes_stale_flows_silently() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      purgetime_secs: 1,
      ..Default::default()
    });
    p.on_segment(&key(1000, 80), 1, 100, &snapshot(10), 0);
    p.drain();
    let evicted = p.expire_idle(2_000_000_000);
    assert_eq!(evicted, 1);
    assert_eq!(p.tracked_flows(), 0);
    // Eviction writes nothing to the ring
    assert!(p.drain().is_empty());
  }

  #[test]
  fn test_expire_idle_spares_active_flows() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      purgetime_secs: 10,
      ..Default::default()
    });
    p.on_segment(&key(1000, 80), 1, 100, &snapshot(10), 0);
    let evicted = p.expire_idle(1_000_000_000);
    assert_eq!(evicted, 0);
    assert_eq!(p.tracked_flows(), 1);
  }

  #[test]
  fn test_handle_event_dispatch() {
    let p = probe(ProbeConfig {
      bufsize: 16,
      ..Default::default()
    });
    let k = key(1000, 80);
    p.handle_event(ProbeEvent::Segment {
      key: k,
      seq: 100,
      length: 50,
      snapshot: snapshot(10),
      timestamp: 0,
    });
    p.handle_event(ProbeEvent::Close {
      key: k,
      seq: 200,
      snapshot: snapshot(10),
      timestamp: 1,
    });
    let samples = p.drain();
    assert_eq!(samples.len(), 2);
    assert!(samples[1].is_close());
  }
}
