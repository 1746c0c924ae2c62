use crate::flow::FlowKey;
use fscope_utils::FlowAddress;
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Reserved `length` value meaning "this record marks flow
/// termination", not data.
pub const CLOSE_SENTINEL: u16 = u16::MAX;

/// Protocol state supplied by the event source alongside each segment
/// or teardown notification. The probe copies the interesting fields
/// into the output record; it never interprets them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSnapshot {
  /// Congestion window, in segments.
  pub snd_cwnd: u32,
  /// Slow-start threshold.
  pub ssthresh: u32,
  /// Smoothed round-trip time, microseconds.
  pub srtt_us: u32,
  /// Round-trip time variance, microseconds.
  pub rttvar_us: u32,
  /// Segments currently considered lost.
  pub lost: u32,
  /// Total retransmissions over the life of the connection.
  pub retrans: u32,
  /// Packets currently in flight.
  pub inflight: u32,
  /// Receive queue depth. For listening sockets the event source
  /// reports the accept backlog here instead.
  pub rcv_queue: u32,
  /// Send queue depth. For listening sockets the event source reports
  /// the maximum accept backlog here instead.
  pub snd_queue: u32,
  /// Congestion-control state indicator.
  pub ca_state: u8,
}

/// One output record, written into the sample ring and exported to the
/// consumer verbatim as its binary layout. `#[repr(C)]` with explicit
/// padding so the byte view is stable.
#[repr(C)]
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  FromBytes,
  IntoBytes,
  Immutable,
  KnownLayout,
)]
pub struct FlowSample {
  /// Monotonic timestamp of the event, nanoseconds since boot.
  pub timestamp: u64,
  /// Sequence value seen at flow creation; stable identifier for this
  /// flow instance across all of its records.
  pub first_seq: u64,
  /// Cumulative bytes sent on the flow at the time of the event.
  pub cumulative_bytes: u64,
  /// Source address of the flow.
  pub src: FlowAddress,
  /// Destination address of the flow.
  pub dst: FlowAddress,
  /// Source port number.
  pub src_port: u16,
  /// Destination port number.
  pub dst_port: u16,
  /// Segment length in bytes, or [`CLOSE_SENTINEL`] for a terminal
  /// record.
  pub length: u16,
  /// Congestion-control state indicator.
  pub ca_state: u8,
  /// Reserved to pad the structure.
  pub reserved: u8,
  /// Congestion window, in segments.
  pub snd_cwnd: u32,
  /// Slow-start threshold.
  pub ssthresh: u32,
  /// Smoothed round-trip time, microseconds.
  pub srtt_us: u32,
  /// Round-trip time variance, microseconds.
  pub rttvar_us: u32,
  /// Computed retransmission timeout: `srtt + 4 * rttvar`.
  pub rto_us: u32,
  /// Segments currently considered lost.
  pub lost: u32,
  /// Total retransmissions over the life of the connection.
  pub retrans: u32,
  /// Packets currently in flight.
  pub inflight: u32,
  /// Receive queue depth (accept backlog for listeners).
  pub rcv_queue: u32,
  /// Send queue depth (max accept backlog for listeners).
  pub snd_queue: u32,
}

impl FlowSample {
  /// Build a record from one observed event. Pure; the caller has
  /// already updated the flow's accounting state.
  pub fn from_event(
    key: &FlowKey,
    snapshot: &ProtocolSnapshot,
    timestamp: u64,
    length: u16,
    cumulative_bytes: u64,
    first_seq: u64,
  ) -> Self {
    Self {
      timestamp,
      first_seq,
      cumulative_bytes,
      src: key.src,
      dst: key.dst,
      src_port: key.src_port,
      dst_port: key.dst_port,
      length,
      ca_state: snapshot.ca_state,
      reserved: 0,
      snd_cwnd: snapshot.snd_cwnd,
      ssthresh: snapshot.ssthresh,
      srtt_us: snapshot.srtt_us,
      rttvar_us: snapshot.rttvar_us,
      rto_us: snapshot.srtt_us.saturating_add(snapshot.rttvar_us.saturating_mul(4)),
      lost: snapshot.lost,
      retrans: snapshot.retrans,
      inflight: snapshot.inflight,
      rcv_queue: snapshot.rcv_queue,
      snd_queue: snapshot.snd_queue,
    }
  }

  /// True when this record marks flow termination.
  pub fn is_close(&self) -> bool {
    self.length == CLOSE_SENTINEL
  }
}
