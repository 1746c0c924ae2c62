use crate::sample::FlowSample;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use thiserror::Error;

/// The ring is inside its guard margin; the record was dropped, not
/// written. Counted by the caller.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Sample ring is full")]
pub struct RingFull;

struct RingInner {
  slots: Vec<FlowSample>,
  /// Next write cursor. Cursors increase monotonically and are masked
  /// into slot indices, so head - tail is always the occupancy.
  head: u64,
  /// Next read cursor, advanced by the consumer.
  tail: u64,
}

/// Fixed-capacity circular buffer of output records. Single writer
/// domain (the probe's emit path), single reader domain (the export
/// consumer). Writes are refused when fewer than two slots remain
/// free; unread data is never overwritten, and nothing ever blocks on
/// the producer side. A condition variable signals the consumer after
/// each successful push; the signal is advisory only.
pub struct SampleRing {
  inner: Mutex<RingInner>,
  ready: Condvar,
  mask: u64,
  capacity: u64,
}

impl SampleRing {
  /// Allocate a ring. `capacity` is rounded up to a power of two so
  /// cursor arithmetic is a bitmask. All storage is allocated up
  /// front.
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.next_power_of_two() as u64;
    Self {
      inner: Mutex::new(RingInner {
        slots: vec![FlowSample::default(); capacity as usize],
        head: 0,
        tail: 0,
      }),
      ready: Condvar::new(),
      mask: capacity - 1,
      capacity,
    }
  }

  /// Slot count.
  pub fn capacity(&self) -> usize {
    self.capacity as usize
  }

  /// Records currently waiting for the consumer.
  pub fn len(&self) -> usize {
    let inner = self.inner.lock();
    (inner.head - inner.tail) as usize
  }

  /// True when nothing is waiting for the consumer.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Publish one record. Succeeds only while at least two slots remain
  /// free; the guard margin keeps full and empty unambiguous and gives
  /// the consumer one cycle of slack. On success the readiness signal
  /// is raised.
  pub fn push(&self, sample: FlowSample) -> Result<(), RingFull> {
    {
      let mut inner = self.inner.lock();
      let free = self.capacity - (inner.head - inner.tail);
      if free < 2 {
        return Err(RingFull);
      }
      let idx = (inner.head & self.mask) as usize;
      inner.slots[idx] = sample;
      inner.head += 1;
    }
    self.ready.notify_one();
    Ok(())
  }

  /// Consume every published record, in order, advancing the tail
  /// cursor past them.
  pub fn drain(&self) -> Vec<FlowSample> {
    let mut inner = self.inner.lock();
    let mut out = Vec::with_capacity((inner.head - inner.tail) as usize);
    while inner.tail < inner.head {
      out.push(inner.slots[(inner.tail & self.mask) as usize]);
      inner.tail += 1;
    }
    out
  }

  /// Block the consumer until at least one record is published or the
  /// timeout elapses. Returns the number of records waiting. Purely a
  /// convenience for the reader; correctness never depends on it.
  pub fn wait_for_samples(&self, timeout: Duration) -> usize {
    let mut inner = self.inner.lock();
    if inner.head == inner.tail {
      self.ready.wait_for(&mut inner, timeout);
    }
    (inner.head - inner.tail) as usize
  }
}
