//! Collection of utility functions for FlowScope

#![warn(missing_docs)]

mod flow_address;

/// Utilities dealing with monotonic timestamps
pub mod unix_time;

/// Fixed-width IP address used for flow identity
pub use flow_address::FlowAddress;
