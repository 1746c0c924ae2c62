use fscope_utils::FlowAddress;
use serde::{Deserialize, Serialize};

/// Identity of one TCP flow: the 4-tuple. Immutable once the flow is
/// created; doubles as the hash key and the output identity.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct FlowKey {
  /// Source address of the flow.
  pub src: FlowAddress,
  /// Destination address of the flow.
  pub dst: FlowAddress,
  /// Source port number.
  pub src_port: u16,
  /// Destination port number.
  pub dst_port: u16,
}

impl FlowKey {
  /// True when `port` matches either endpoint, or when the filter is
  /// disabled (0).
  pub fn touches_port(&self, port: u16) -> bool {
    port == 0 || self.src_port == port || self.dst_port == port
  }
}

/// Mutable accounting state for one live flow. Owned exclusively by
/// the flow table.
#[derive(Debug, Clone)]
pub struct FlowRecord {
  /// The flow's identity.
  pub key: FlowKey,
  /// Monotonic time (nanos) of the last emitted sample. Also serves as
  /// the "last activity" mark for idle eviction.
  pub last_sampled_at: u64,
  /// Most recently observed send-sequence number, raw and wrapping.
  pub last_seq: u32,
  /// Bytes sent on the flow, reconstructed from successive sequence
  /// numbers. Never decreases.
  pub cumulative_bytes: u64,
  /// Sequence value seen at flow creation, widened. Carried through to
  /// every record so the consumer can correlate samples of the same
  /// flow instance.
  pub first_seq: u64,
}

impl FlowRecord {
  /// Create the record for a newly observed flow. The first event
  /// establishes `first_seq` and the activity timestamp; no bytes have
  /// been accounted yet.
  pub fn new(key: FlowKey, seq: u32, now: u64) -> Self {
    Self {
      key,
      last_sampled_at: now,
      last_seq: seq,
      cumulative_bytes: 0,
      first_seq: seq as u64,
    }
  }

  /// Fold a newly observed sequence number into the cumulative byte
  /// count. A non-increasing but unequal value is taken to be a 32-bit
  /// rollover; for a 10 Gbit/s flow that happens every few seconds.
  /// True retransmits landing in that window undercount instead of
  /// driving the counter backwards.
  pub fn advance_seq(&mut self, seq: u32) {
    if seq > self.last_seq {
      self.cumulative_bytes += (seq - self.last_seq) as u64;
    } else if seq != self.last_seq {
      self.cumulative_bytes += (u32::MAX - self.last_seq) as u64 + seq as u64;
    }
    self.last_seq = seq;
  }
}
