use log::warn;
use nix::{
  sys::time::TimeSpec,
  time::{clock_gettime, ClockId},
};
use std::time::Duration;
use thiserror::Error;

/// Return the time since boot, from the Linux kernel.
/// Can fail if the clock isn't ready yet.
pub fn time_since_boot() -> Result<TimeSpec, TimeError> {
  match clock_gettime(ClockId::CLOCK_BOOTTIME) {
    Ok(t) => Ok(t),
    Err(e) => {
      warn!("Clock not ready: {:?}", e);
      Err(TimeError::ClockNotReady)
    }
  }
}

/// The time since boot, in nanoseconds. This is the timestamp unit
/// carried on every probe event and output record.
pub fn boot_time_nanos() -> Result<u64, TimeError> {
  let now = time_since_boot()?;
  Ok(Duration::from(now).as_nanos() as u64)
}

/// Error type for time functions.
#[derive(Error, Debug)]
pub enum TimeError {
  /// The clock isn't ready yet.
  #[error("Clock not ready")]
  ClockNotReady,
}
