use crate::probe::FlowProbe;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use fscope_utils::unix_time::boot_time_nanos;
use log::{debug, error, info};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Periodic task evicting flows idle past the purge threshold. Ticks
/// at the purge interval on its own named thread; eviction is silent
/// bookkeeping and never writes to the sample ring.
pub struct PurgeSweeper {
  stop_tx: Sender<()>,
  handle: JoinHandle<()>,
}

impl PurgeSweeper {
  /// Spawn the sweep thread. It runs until [`stop`] is called.
  ///
  /// [`stop`]: PurgeSweeper::stop
  pub fn spawn(probe: Arc<FlowProbe>) -> std::io::Result<Self> {
    let interval = probe.purge_interval();
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let handle = std::thread::Builder::new()
      .name("PurgeSweeper".to_string())
      .spawn(move || {
        info!("Purge sweeper started, interval {interval:?}");
        loop {
          match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
              if let Ok(now) = boot_time_nanos() {
                let evicted = probe.expire_idle(now);
                if evicted > 0 {
                  debug!("Purge sweep evicted {evicted} idle flows");
                }
              }
            }
            _ => break,
          }
        }
        // Final unconditional sweep: every remaining flow is released
        // before the table's storage can go away.
        let purged = probe.purge_all();
        info!("Purge sweeper stopped, released {purged} remaining flows");
      })?;
    Ok(Self { stop_tx, handle })
  }

  /// Stop the sweep thread and join it. The final unconditional sweep
  /// has completed by the time this returns.
  pub fn stop(self) {
    let _ = self.stop_tx.send(());
    if self.handle.join().is_err() {
      error!("Purge sweeper thread panicked");
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::flow::FlowKey;
  use crate::sample::ProtocolSnapshot;
  use fscope_config::ProbeConfig;

  #[test]
  fn test_stop_runs_final_sweep() {
    let probe = Arc::new(
      FlowProbe::new(ProbeConfig {
        bufsize: 16,
        purgetime_secs: 3600,
        ..Default::default()
      })
      .unwrap(),
    );
    let key = FlowKey {
      src: "10.0.0.1".parse::<std::net::IpAddr>().unwrap().into(),
      dst: "10.0.0.2".parse::<std::net::IpAddr>().unwrap().into(),
      src_port: 1000,
      dst_port: 80,
    };
    probe.on_segment(&key, 1, 100, &ProtocolSnapshot::default(), 0);
    assert_eq!(probe.tracked_flows(), 1);

    let sweeper = PurgeSweeper::spawn(probe.clone()).unwrap();
    sweeper.stop();
    // Shutdown released the flow without waiting for the interval
    assert_eq!(probe.tracked_flows(), 0);
    // ...and wrote nothing beyond the original sample
    assert_eq!(probe.drain().len(), 1);
  }
}
