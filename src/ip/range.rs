//! CIDR address ranges.
//!
//! An `AddressRange` is an immutable IPv4 block: a network base plus a prefix
//! length. All queries are pure arithmetic, so ranges are `Copy` and shared
//! freely between subnets, networks and worker threads.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::{Ipv4AddrRange, Ipv4Net};
use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, Result};

/// IPv4 CIDR block such as `192.168.1.0/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressRange {
    net: Ipv4Net,
}

impl AddressRange {
    /// Build a range from its base address and prefix length.
    ///
    /// The base must be the network address of the block: `192.168.1.5/24`
    /// is rejected rather than silently truncated.
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        let value = format!("{}/{}", base, prefix_len);
        let net = Ipv4Net::new(base, prefix_len).map_err(|e| NetworkError::InvalidRangeFormat {
            value: value.clone(),
            reason: e.to_string(),
        })?;

        if net.network() != base {
            return Err(NetworkError::InvalidRangeFormat {
                value,
                reason: format!("host bits are set, expected {}", net.trunc()),
            });
        }

        Ok(AddressRange { net })
    }

    /// Parse a range from CIDR notation
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let net = Ipv4Net::from_str(trimmed).map_err(|e| NetworkError::InvalidRangeFormat {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
        Self::new(net.addr(), net.prefix_len())
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.net.contains(&address)
    }

    /// Every address of the block in ascending order, network and broadcast
    /// addresses included. Calling it again restarts the walk.
    pub fn addresses(&self) -> Ipv4AddrRange {
        Ipv4AddrRange::new(self.net.network(), self.net.broadcast())
    }

    pub fn network_address(&self) -> Ipv4Addr {
        self.net.network()
    }

    pub fn broadcast_address(&self) -> Ipv4Addr {
        self.net.broadcast()
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.net.netmask()
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// Number of addresses in the block, including network and broadcast
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.net.prefix_len()))
    }

    /// Whether two blocks share at least one address
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.net.contains(&other.net.network()) || other.net.contains(&self.net.network())
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

impl FromStr for AddressRange {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AddressRange {
    type Error = NetworkError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AddressRange> for String {
    fn from(range: AddressRange) -> Self {
        range.to_string()
    }
}
