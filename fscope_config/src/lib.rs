//! Manages the FlowScope configuration file.
//!
//! All options mirror the probe's runtime knobs: which port to watch,
//! how often a flow may be sampled, how long an idle flow lives, how
//! large the sample ring is, and the flow-table limits. Invalid values
//! are fatal at startup; the probe refuses to run in a degraded state.

#![warn(missing_docs)]

use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Hard floor on the flow-table sizing hint, however small the
/// configured or derived value is.
pub const MIN_HASHSIZE: u32 = 32;

/// Ceiling applied to the automatically derived flow-table sizing
/// hint on large-memory hosts.
pub const MAX_AUTO_HASHSIZE: u32 = 16384;

/// Runtime configuration for the flow probe. Usually loaded from
/// `/etc/fscope.conf`; every field has a default so a missing file
/// yields a working probe watching all ports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeConfig {
  /// Restrict sampling to flows touching this port, on either
  /// endpoint. 0 disables the filter.
  #[serde(default)]
  pub port: u16,

  /// Sample every matching segment instead of only on congestion
  /// window changes or when the sampling interval elapses.
  #[serde(default)]
  pub full: bool,

  /// Minimum interval between samples of the same flow, in
  /// milliseconds, when `full` is off.
  #[serde(default = "default_probetime")]
  pub probetime_ms: u64,

  /// Idle threshold for flow eviction, in seconds. Also the purge
  /// sweep tick interval.
  #[serde(default = "default_purgetime")]
  pub purgetime_secs: u64,

  /// Sample ring capacity in records. Rounded up to a power of two.
  /// Zero is a fatal configuration error.
  #[serde(default = "default_bufsize")]
  pub bufsize: u32,

  /// Hard cap on concurrently tracked flows. 0 means unlimited.
  #[serde(default)]
  pub maxflows: u32,

  /// Flow-table sizing hint. 0 derives a value from available memory.
  #[serde(default)]
  pub hashsize: u32,
}

fn default_probetime() -> u64 {
  500
}

fn default_purgetime() -> u64 {
  300
}

fn default_bufsize() -> u32 {
  4096
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      port: 0,
      full: false,
      probetime_ms: default_probetime(),
      purgetime_secs: default_purgetime(),
      bufsize: default_bufsize(),
      maxflows: 0,
      hashsize: 0,
    }
  }
}

impl ProbeConfig {
  /// Load the configuration from a TOML file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      return Err(ConfigError::FileNotFound(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path)
      .map_err(|_| ConfigError::ReadFail(path.display().to_string()))?;
    let config: Self = toml::from_str(&raw)?;
    Ok(config)
  }

  /// Check for values that make the probe unable to run. Called by the
  /// engine before any storage is allocated.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.bufsize == 0 {
      return Err(ConfigError::ZeroBufferSize);
    }
    if self.purgetime_secs == 0 {
      return Err(ConfigError::ZeroPurgeInterval);
    }
    Ok(())
  }

  /// Ring capacity after rounding up to a power of two.
  pub fn effective_bufsize(&self) -> usize {
    self.bufsize.next_power_of_two() as usize
  }

  /// Flow-table sizing hint. A configured value is clamped to the
  /// floor; 0 derives the hint from total system memory, capped on
  /// large hosts.
  pub fn effective_hashsize(&self) -> u32 {
    if self.hashsize != 0 {
      return self.hashsize.max(MIN_HASHSIZE);
    }
    let sys = sysinfo::System::new_with_specifics(
      sysinfo::RefreshKind::new()
        .with_memory(sysinfo::MemoryRefreshKind::new().with_ram()),
    );
    let derived = (sys.total_memory() / 16384 / 8).min(MAX_AUTO_HASHSIZE as u64) as u32;
    let derived = derived.max(MIN_HASHSIZE);
    info!("Flow table hint derived from system memory: {derived} entries");
    derived
  }

  /// Minimum per-flow sampling interval.
  pub fn probe_interval(&self) -> Duration {
    Duration::from_millis(self.probetime_ms)
  }

  /// Idle threshold and sweep tick interval.
  pub fn purge_interval(&self) -> Duration {
    Duration::from_secs(self.purgetime_secs)
  }
}

/// Error type for configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
  /// The configuration file does not exist.
  #[error("Configuration file not found: {0}")]
  FileNotFound(String),
  /// The configuration file could not be read.
  #[error("Unable to read configuration file: {0}")]
  ReadFail(String),
  /// The configuration file is not valid TOML.
  #[error("Unable to parse configuration file")]
  ParseFail(#[from] toml::de::Error),
  /// A zero-size sample ring cannot hold any records.
  #[error("bufsize must be greater than zero")]
  ZeroBufferSize,
  /// A zero purge interval would sweep continuously.
  #[error("purgetime_secs must be greater than zero")]
  ZeroPurgeInterval,
}
