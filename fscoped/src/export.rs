//! Sample export. Consumers connect to a Unix stream socket and
//! receive drained [`FlowSample`] records as raw fixed-size structs,
//! in ring order. One consumer at a time; samples drained while nobody
//! is connected are gone, exactly as the ring's drop-on-full policy
//! already allows.
//!
//! [`FlowSample`]: fscope_core::FlowSample

use anyhow::Result;
use fscope_core::FlowProbe;
use log::{debug, info, warn};
use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use zerocopy::IntoBytes;

/// Stream socket sampled flow records are served on.
pub const SAMPLE_SOCKET: &str = "/run/fscope/samples.sock";

/// How long to block waiting for the ring before re-checking the
/// running flag and the client connection.
const DRAIN_WAIT: Duration = Duration::from_millis(250);

/// Spawn the export thread. It owns the sample socket and serves one
/// connected consumer at a time until the daemon clears the running
/// flag.
pub fn spawn_sample_export(probe: Arc<FlowProbe>) -> Result<JoinHandle<()>> {
  let listener = UnixListener::bind(SAMPLE_SOCKET)?;
  let handle = std::thread::Builder::new()
    .name("SampleExport".to_string())
    .spawn(move || {
      info!("Serving flow samples on {SAMPLE_SOCKET}");
      for stream in listener.incoming() {
        if !crate::keep_running() {
          break;
        }
        match stream {
          Ok(stream) => {
            debug!("Sample consumer connected");
            serve_client(stream, &probe);
            debug!("Sample consumer disconnected");
          }
          Err(e) => warn!("Accept failed on sample socket: {e:?}"),
        }
      }
      info!("Sample export stopped");
    })?;
  Ok(handle)
}

fn serve_client(mut stream: UnixStream, probe: &Arc<FlowProbe>) {
  while crate::keep_running() {
    if probe.wait_for_samples(DRAIN_WAIT) == 0 {
      continue;
    }
    for sample in probe.drain() {
      if let Err(e) = stream.write_all(sample.as_bytes()) {
        debug!("Sample write failed, dropping consumer: {e:?}");
        return;
      }
    }
    if let Err(e) = stream.flush() {
      debug!("Sample flush failed, dropping consumer: {e:?}");
      return;
    }
  }
}
