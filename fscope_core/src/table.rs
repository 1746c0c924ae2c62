use crate::flow::{FlowKey, FlowRecord};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// The table is at its configured `maxflows` cap; the flow was not
/// admitted. This is the deliberate safeguard against flow-table
/// amplification from untracked traffic.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Flow table is at its maximum flow count")]
pub struct CapacityExceeded;

/// Bounded map of live flows. The `HashMap` is the single owner of
/// every record; `sweep_order` is a secondary index of keys in
/// insertion order, walked by the purge sweep. The hasher is std's
/// `RandomState`, seeded from OS randomness at construction, so bucket
/// distribution cannot be predicted by a flood of crafted 4-tuples.
///
/// A record is reachable if and only if it is present in the map.
/// `sweep_order` may briefly hold keys for flows that were explicitly
/// closed; the sweep discards those as it walks.
pub struct FlowTable {
  flows: HashMap<FlowKey, FlowRecord>,
  sweep_order: VecDeque<FlowKey>,
  max_flows: u32,
}

impl FlowTable {
  /// Build a table sized by the configured hint, enforcing `max_flows`
  /// (0 = unlimited) on insertion.
  pub fn with_settings(capacity_hint: u32, max_flows: u32) -> Self {
    Self {
      flows: HashMap::with_capacity(capacity_hint as usize),
      sweep_order: VecDeque::with_capacity(capacity_hint as usize),
      max_flows,
    }
  }

  /// Number of live flows.
  pub fn len(&self) -> usize {
    self.flows.len()
  }

  /// True when no flows are tracked.
  pub fn is_empty(&self) -> bool {
    self.flows.is_empty()
  }

  /// Look up a flow for in-place mutation.
  pub fn find_mut(&mut self, key: &FlowKey) -> Option<&mut FlowRecord> {
    self.flows.get_mut(key)
  }

  /// Admit a new flow, subject to the cap. On success the record is
  /// indexed both by hash and in sweep order.
  pub fn insert(&mut self, record: FlowRecord) -> Result<(), CapacityExceeded> {
    if self.max_flows > 0 && self.flows.len() as u32 >= self.max_flows {
      return Err(CapacityExceeded);
    }
    debug_assert!(!self.flows.contains_key(&record.key));
    self.sweep_order.push_back(record.key);
    self.flows.insert(record.key, record);
    Ok(())
  }

  /// Remove a flow. A no-op if the key is absent. The sweep-order
  /// entry is left behind and discarded lazily by the next sweep, so
  /// teardown stays O(1).
  pub fn remove(&mut self, key: &FlowKey) -> Option<FlowRecord> {
    self.flows.remove(key)
  }

  /// Walk the sweep-order index and evict every flow idle for at least
  /// `idle_nanos`. Stale index entries (closed flows) are dropped as
  /// they are encountered. Returns the number of evictions.
  pub fn expire_idle(
    &mut self,
    now: u64,
    idle_nanos: u64,
    mut on_evict: impl FnMut(&FlowRecord),
  ) -> usize {
    let mut kept = VecDeque::with_capacity(self.sweep_order.len());
    let mut seen = HashSet::with_capacity(self.flows.len());
    let mut evicted = 0;
    while let Some(key) = self.sweep_order.pop_front() {
      let Some(record) = self.flows.get(&key) else {
        // Closed flow; discard the stale index entry.
        continue;
      };
      if now.saturating_sub(record.last_sampled_at) >= idle_nanos {
        if let Some(record) = self.flows.remove(&key) {
          on_evict(&record);
          evicted += 1;
        }
      } else if seen.insert(key) {
        kept.push_back(key);
      }
    }
    self.sweep_order = kept;
    evicted
  }

  /// Evict everything. Used by the final shutdown sweep so all records
  /// are released before the table's storage goes away.
  pub fn purge_all(&mut self, mut on_evict: impl FnMut(&FlowRecord)) -> usize {
    let purged = self.flows.len();
    for (_, record) in self.flows.drain() {
      on_evict(&record);
    }
    self.sweep_order.clear();
    purged
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn key(src_port: u16) -> FlowKey {
    FlowKey {
      src: "10.0.0.1".parse::<std::net::IpAddr>().unwrap().into(),
      dst: "10.0.0.2".parse::<std::net::IpAddr>().unwrap().into(),
      src_port,
      dst_port: 80,
    }
  }

  #[test]
  fn test_insert_find_remove() {
    let mut table = FlowTable::with_settings(32, 0);
    let k = key(1000);
    table.insert(FlowRecord::new(k, 1, 0)).unwrap();
    assert_eq!(table.len(), 1);
    assert!(table.find_mut(&k).is_some());
    assert!(table.remove(&k).is_some());
    assert!(table.find_mut(&k).is_none());
    // Idempotent: removing again is a no-op
    assert!(table.remove(&k).is_none());
    assert_eq!(table.len(), 0);
  }

  #[test]
  fn test_maxflows_cap() {
    let mut table = FlowTable::with_settings(32, 2);
    table.insert(FlowRecord::new(key(1), 1, 0)).unwrap();
    table.insert(FlowRecord::new(key(2), 1, 0)).unwrap();
    let rejected = table.insert(FlowRecord::new(key(3), 1, 0));
    assert_eq!(rejected, Err(CapacityExceeded));
    assert_eq!(table.len(), 2);
    // Removing one frees a slot
    table.remove(&key(1));
    assert!(table.insert(FlowRecord::new(key(3), 1, 0)).is_ok());
  }

  #[test]
  fn test_zero_maxflows_is_unlimited() {
    let mut table = FlowTable::with_settings(32, 0);
    for port in 0..100 {
      table.insert(FlowRecord::new(key(port), 1, 0)).unwrap();
    }
    assert_eq!(table.len(), 100);
  }

  #[test]
  fn test_expire_idle_evicts_only_stale_flows() {
    let mut table = FlowTable::with_settings(32, 0);
    table.insert(FlowRecord::new(key(1), 1, 0)).unwrap();
    table.insert(FlowRecord::new(key(2), 1, 900)).unwrap();
    let mut evicted = Vec::new();
    let count = table.expire_idle(1000, 500, |r| evicted.push(r.key));
    assert_eq!(count, 1);
    assert_eq!(evicted, vec![key(1)]);
    assert!(table.find_mut(&key(1)).is_none());
    assert!(table.find_mut(&key(2)).is_some());
  }

  #[test]
  fn test_expire_discards_stale_sweep_entries() {
    let mut table = FlowTable::with_settings(32, 0);
    table.insert(FlowRecord::new(key(1), 1, 0)).unwrap();
    table.remove(&key(1));
    // Re-create the same flow; the index briefly holds two entries
    table.insert(FlowRecord::new(key(1), 1, 1000)).unwrap();
    let count = table.expire_idle(1000, 500, |_| {});
    assert_eq!(count, 0);
    assert_eq!(table.sweep_order.len(), 1);
    assert!(table.find_mut(&key(1)).is_some());
  }

  #[test]
  fn test_purge_all() {
    let mut table = FlowTable::with_settings(32, 0);
    for port in 0..10 {
      table.insert(FlowRecord::new(key(port), 1, 0)).unwrap();
    }
    let mut seen = 0;
    let purged = table.purge_all(|_| seen += 1);
    assert_eq!(purged, 10);
    assert_eq!(seen, 10);
    assert!(table.is_empty());
    assert!(table.sweep_order.is_empty());
  }
}
