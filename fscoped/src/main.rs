//! FlowScope daemon. Builds the flow probe from `/etc/fscope.conf`,
//! accepts probe events from the capture process over a Unix datagram
//! socket, and streams sampled flow records to consumers over a Unix
//! stream socket. SIGHUP logs the counter snapshot; SIGINT/SIGTERM
//! stop the purge sweeper (running its final sweep) and clean up the
//! socket files before exit.

mod export;
mod intake;

use anyhow::Result;
use fscope_config::{ConfigError, ProbeConfig};
use fscope_core::{FlowProbe, PurgeSweeper};
use log::{error, info, warn};
use signal_hook::{
  consts::{SIGHUP, SIGINT, SIGTERM},
  iterator::Signals,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "/etc/fscope.conf";
const SOCKET_DIRECTORY: &str = "/run/fscope";

/// Cleared by the signal handler; the intake and export threads poll
/// it and wind down on their next timeout.
static RUNNING: AtomicBool = AtomicBool::new(true);

fn keep_running() -> bool {
  RUNNING.load(Ordering::Relaxed)
}

/// Load the configuration file named on the command line (or the
/// default path). A missing file yields defaults, matching the
/// original module-parameter behavior; a file that exists but does not
/// parse is fatal.
fn load_config() -> Result<ProbeConfig> {
  let path = std::env::args()
    .nth(1)
    .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
  match ProbeConfig::load(Path::new(&path)) {
    Ok(config) => Ok(config),
    Err(ConfigError::FileNotFound(_)) => {
      info!("No configuration at {path}, using defaults");
      Ok(ProbeConfig::default())
    }
    Err(e) => Err(e.into()),
  }
}

fn setup_socket_directory() -> Result<()> {
  let dir = Path::new(SOCKET_DIRECTORY);
  if !dir.exists() {
    std::fs::create_dir_all(dir)?;
  }
  // Stale sockets from an unclean exit would block the bind
  remove_socket_files();
  Ok(())
}

fn remove_socket_files() {
  for path in [intake::EVENT_SOCKET, export::SAMPLE_SOCKET] {
    let path = Path::new(path);
    if path.exists() {
      if let Err(e) = std::fs::remove_file(path) {
        warn!("Unable to remove {}: {e:?}", path.display());
      }
    }
  }
}

fn main() -> Result<()> {
  env_logger::init();
  info!("FlowScope daemon starting");

  let config = load_config()?;
  let probe = Arc::new(FlowProbe::new(config)?);

  setup_socket_directory()?;
  let sweeper = PurgeSweeper::spawn(probe.clone())?;
  let _intake = intake::spawn_event_intake(probe.clone())?;
  let _export = export::spawn_sample_export(probe.clone())?;

  let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
  for sig in signals.forever() {
    match sig {
      SIGHUP => match serde_json::to_string(&probe.stats()) {
        Ok(stats) => info!("Probe counters: {stats}"),
        Err(e) => error!("Unable to serialize counters: {e:?}"),
      },
      SIGINT | SIGTERM => {
        warn!("Terminating on signal {sig}");
        RUNNING.store(false, Ordering::Relaxed);
        // Joining the sweeper runs its final unconditional sweep, so
        // every tracked flow is released before we exit.
        sweeper.stop();
        remove_socket_files();
        std::process::exit(0);
      }
      _ => warn!("No handler for signal: {sig}"),
    }
  }
  Ok(())
}
