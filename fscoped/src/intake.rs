//! Probe event intake. The capture process sends one bincode-encoded
//! [`ProbeEvent`] per datagram; each is dispatched straight into the
//! probe on this thread, so ordering within the socket is preserved.

use anyhow::Result;
use fscope_core::{FlowProbe, ProbeEvent};
use log::{info, warn};
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Datagram socket the capture process sends events to.
pub const EVENT_SOCKET: &str = "/run/fscope/events.sock";

/// Largest encoded event we accept. Events are ~100 bytes on the wire;
/// anything bigger is malformed.
const EVENT_BUFFER_SIZE: usize = 2048;

/// Spawn the intake thread. It owns the event socket and runs until
/// the daemon clears the running flag.
pub fn spawn_event_intake(probe: Arc<FlowProbe>) -> Result<JoinHandle<()>> {
  let socket = UnixDatagram::bind(EVENT_SOCKET)?;
  socket.set_read_timeout(Some(Duration::from_millis(250)))?;
  let handle = std::thread::Builder::new()
    .name("EventIntake".to_string())
    .spawn(move || {
      info!("Listening for probe events on {EVENT_SOCKET}");
      let mut buffer = vec![0u8; EVENT_BUFFER_SIZE];
      while crate::keep_running() {
        let len = match socket.recv(&mut buffer) {
          Ok(len) => len,
          Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
              || e.kind() == std::io::ErrorKind::TimedOut =>
          {
            continue;
          }
          Err(e) => {
            warn!("Event socket read failed: {e:?}");
            continue;
          }
        };
        match bincode::deserialize::<ProbeEvent>(&buffer[..len]) {
          Ok(event) => probe.handle_event(event),
          Err(e) => warn!("Discarding undecodable event ({len} bytes): {e:?}"),
        }
      }
      info!("Event intake stopped");
    })?;
  Ok(handle)
}
