//! The FlowScope engine: tracks live TCP flows and samples their
//! congestion-control state into a bounded ring of output records.
//!
//! The packet/event source is an external collaborator. It calls
//! [`FlowProbe::on_segment`] for every received segment and
//! [`FlowProbe::on_flow_close`] on teardown, supplying the flow's
//! 4-tuple, the current send sequence number, a protocol state
//! snapshot, and a monotonic timestamp. The engine decides whether the
//! event is worth a sample, maintains per-flow cumulative byte
//! accounting across 32-bit sequence wraparound, and publishes
//! fixed-size records through a drop-on-full ring buffer that a
//! consumer drains. Nothing on the segment path ever blocks.

#![warn(missing_docs)]

mod flow;
mod probe;
mod ring;
mod sample;
mod stats;
mod sweeper;
mod table;

pub use flow::{FlowKey, FlowRecord};
pub use probe::{FlowProbe, ProbeError, ProbeEvent};
pub use ring::{RingFull, SampleRing};
pub use sample::{FlowSample, ProtocolSnapshot, CLOSE_SENTINEL};
pub use stats::{ProbeStats, StatsSnapshot};
pub use sweeper::PurgeSweeper;
pub use table::{CapacityExceeded, FlowTable};
