use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// `FlowAddress` stores an IP address as a fixed `[u8; 16]` block,
/// IPv6-mapped, so that flow keys and output records have a single
/// fixed-width layout regardless of address family. Provides helpful
/// conversion to and from Rust `IpAddr` types.
#[repr(C)]
#[derive(
  Debug,
  Copy,
  Clone,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  FromBytes,
  IntoBytes,
  Immutable,
  KnownLayout,
  Unaligned,
)]
pub struct FlowAddress(pub [u8; 16]);

impl Default for FlowAddress {
  fn default() -> Self {
    Self([0xFF; 16])
  }
}

impl FlowAddress {
  /// Converts a Rust `IpAddr` type into a `FlowAddress`.
  pub fn from_ip(ip: IpAddr) -> Self {
    let mut result = Self::default();
    match ip {
      IpAddr::V4(ip) => {
        result.0[12..16].copy_from_slice(&ip.octets());
      }
      IpAddr::V6(ip) => {
        result.0.copy_from_slice(&ip.octets());
      }
    }
    result
  }

  /// Converts a `FlowAddress` back to a Rust `IpAddr` type.
  pub fn as_ip(&self) -> IpAddr {
    if self.0[0..12] == [0xFF; 12] {
      // It's an IPv4 address
      IpAddr::V4(Ipv4Addr::new(self.0[12], self.0[13], self.0[14], self.0[15]))
    } else {
      // It's an IPv6 address
      IpAddr::V6(Ipv6Addr::new(
        BigEndian::read_u16(&self.0[0..2]),
        BigEndian::read_u16(&self.0[2..4]),
        BigEndian::read_u16(&self.0[4..6]),
        BigEndian::read_u16(&self.0[6..8]),
        BigEndian::read_u16(&self.0[8..10]),
        BigEndian::read_u16(&self.0[10..12]),
        BigEndian::read_u16(&self.0[12..14]),
        BigEndian::read_u16(&self.0[14..]),
      ))
    }
  }
}

impl From<FlowAddress> for IpAddr {
  fn from(addr: FlowAddress) -> Self {
    addr.as_ip()
  }
}

impl From<IpAddr> for FlowAddress {
  fn from(ip: IpAddr) -> Self {
    Self::from_ip(ip)
  }
}
