//! Subnets of manual networks.
//!
//! A `Subnet` is built once from its manifest declaration and never changes
//! afterwards. Whether an address is currently taken is answered only by the
//! reservation store, so a subnet can be read from any number of threads
//! without locking.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use serde_json::{Map, Value};

use super::range::AddressRange;
use super::store::{ReservationStore, StoreResult};
use crate::config::SubnetSpec;
use crate::error::{NetworkError, Result};

/// How a subnet treats one address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// Declared in the static pool
    Static,
    /// Eligible for dynamic allocation
    Dynamic,
    /// Network, broadcast, gateway or operator-reserved address
    Reserved,
    OutOfRange,
}

/// One CIDR block of a manual network with its pools
#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    network_name: String,
    range: AddressRange,
    gateway: Option<Ipv4Addr>,
    dns: Option<Vec<Ipv4Addr>>,
    static_pool: BTreeSet<Ipv4Addr>,
    reserved: BTreeSet<Ipv4Addr>,
    cloud_properties: Map<String, Value>,
    availability_zone: Option<String>,
}

impl Subnet {
    /// Build a subnet of `network_name` from its manifest declaration.
    ///
    /// Addresses of the subnet that fall inside any of `foreign_ranges` are
    /// treated as reserved.
    pub fn parse(network_name: &str, spec: &SubnetSpec, foreign_ranges: &[AddressRange]) -> Result<Self> {
        let range = AddressRange::parse(&spec.range)?;

        let gateway = spec
            .gateway
            .as_deref()
            .map(|value| parse_address(network_name, value))
            .transpose()?;

        let mut reserved = BTreeSet::new();
        for entry in &spec.reserved {
            let span = AddressSpan::parse(network_name, entry)?;
            if let Some(address) = span.outside(&range) {
                return Err(NetworkError::ReservedPoolOutOfRange {
                    network: network_name.to_string(),
                    range: range.to_string(),
                    address,
                });
            }
            reserved.extend(span.addresses());
        }

        for foreign in foreign_ranges.iter().filter(|foreign| foreign.overlaps(&range)) {
            // Overlapping CIDR blocks nest, so the narrower one is the intersection
            let shared = if foreign.prefix_len() >= range.prefix_len() {
                foreign
            } else {
                &range
            };
            reserved.extend(shared.addresses());
        }

        let mut static_pool = BTreeSet::new();
        for entry in &spec.static_ips {
            let span = AddressSpan::parse(network_name, entry)?;
            if let Some(address) = span.outside(&range) {
                return Err(NetworkError::StaticPoolOutOfRange {
                    network: network_name.to_string(),
                    range: range.to_string(),
                    address,
                });
            }
            static_pool.extend(span.addresses());
        }

        let dns = spec
            .dns
            .as_ref()
            .map(|servers| {
                servers
                    .iter()
                    .map(|value| parse_address(network_name, value))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        let subnet = Subnet {
            network_name: network_name.to_string(),
            range,
            gateway,
            dns,
            static_pool,
            reserved,
            cloud_properties: spec.cloud_properties.clone(),
            availability_zone: spec.availability_zone.clone(),
        };
        subnet.validate()?;
        Ok(subnet)
    }

    /// Check the subnet's own invariants: the gateway is a usable address of
    /// the range, and every static address is in range and not reserved.
    ///
    /// Overlap between subnets is checked by the owning network.
    pub fn validate(&self) -> Result<()> {
        if let Some(gateway) = self.gateway {
            if !self.range.contains(gateway) || self.is_boundary(gateway) {
                return Err(NetworkError::GatewayOutOfRange {
                    network: self.network_name.clone(),
                    range: self.range.to_string(),
                    gateway,
                });
            }
        }

        for &address in &self.static_pool {
            let restricted = !self.range.contains(address)
                || self.is_boundary(address)
                || self.gateway == Some(address)
                || self.reserved.contains(&address);
            if restricted {
                return Err(NetworkError::StaticPoolOutOfRange {
                    network: self.network_name.clone(),
                    range: self.range.to_string(),
                    address,
                });
            }
        }

        for &address in &self.reserved {
            if !self.range.contains(address) {
                return Err(NetworkError::ReservedPoolOutOfRange {
                    network: self.network_name.clone(),
                    range: self.range.to_string(),
                    address,
                });
            }
        }

        Ok(())
    }

    /// Classify an address against this subnet's pools
    pub fn classify(&self, address: Ipv4Addr) -> AddressClass {
        if !self.range.contains(address) {
            AddressClass::OutOfRange
        } else if self.is_boundary(address)
            || self.gateway == Some(address)
            || self.reserved.contains(&address)
        {
            AddressClass::Reserved
        } else if self.static_pool.contains(&address) {
            AddressClass::Static
        } else {
            AddressClass::Dynamic
        }
    }

    /// Lowest dynamic address not committed in `store` and not in `exclude`.
    ///
    /// The scan is in ascending numeric order, so an unchanged store always
    /// yields the same answer.
    pub fn next_available_dynamic(
        &self,
        store: &dyn ReservationStore,
        exclude: &BTreeSet<Ipv4Addr>,
    ) -> StoreResult<Option<Ipv4Addr>> {
        let taken = store.reserved_addresses(&self.network_name)?;
        Ok(self.range.addresses().find(|address| {
            self.classify(*address) == AddressClass::Dynamic
                && !taken.contains(address)
                && !exclude.contains(address)
        }))
    }

    /// Number of addresses eligible for dynamic allocation
    pub fn dynamic_capacity(&self) -> usize {
        self.range
            .addresses()
            .filter(|address| self.classify(*address) == AddressClass::Dynamic)
            .count()
    }

    /// Network and broadcast addresses are unusable on blocks wider than /31
    fn is_boundary(&self, address: Ipv4Addr) -> bool {
        self.range.prefix_len() < 31
            && (address == self.range.network_address() || address == self.range.broadcast_address())
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn range(&self) -> &AddressRange {
        &self.range
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.range.netmask()
    }

    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    pub fn dns(&self) -> Option<&[Ipv4Addr]> {
        self.dns.as_deref()
    }

    pub fn static_pool(&self) -> &BTreeSet<Ipv4Addr> {
        &self.static_pool
    }

    pub fn reserved(&self) -> &BTreeSet<Ipv4Addr> {
        &self.reserved
    }

    pub fn cloud_properties(&self) -> &Map<String, Value> {
        &self.cloud_properties
    }

    pub fn availability_zone(&self) -> Option<&str> {
        self.availability_zone.as_deref()
    }
}

fn parse_address(network: &str, value: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse()
        .map_err(|_| NetworkError::InvalidAddressFormat {
            network: network.to_string(),
            value: value.to_string(),
        })
}

/// Inclusive run of addresses named by one pool entry: a single address,
/// a `first - last` range, or a CIDR block.
///
/// Entries are kept as their endpoints so they can be bounds-checked before
/// any address is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpan {
    first: Ipv4Addr,
    last: Ipv4Addr,
}

impl AddressSpan {
    pub fn parse(network: &str, entry: &str) -> Result<Self> {
        if entry.contains('/') {
            let block = AddressRange::parse(entry)?;
            return Ok(AddressSpan {
                first: block.network_address(),
                last: block.broadcast_address(),
            });
        }

        match entry.split_once('-') {
            Some((first, last)) => {
                let first = parse_address(network, first)?;
                let last = parse_address(network, last)?;
                if first > last {
                    return Err(NetworkError::InvalidRangeFormat {
                        value: entry.to_string(),
                        reason: "range end is lower than its start".to_string(),
                    });
                }
                Ok(AddressSpan { first, last })
            }
            None => {
                let address = parse_address(network, entry)?;
                Ok(AddressSpan {
                    first: address,
                    last: address,
                })
            }
        }
    }

    pub fn first(&self) -> Ipv4Addr {
        self.first
    }

    pub fn last(&self) -> Ipv4Addr {
        self.last
    }

    /// Number of addresses in the span
    pub fn size(&self) -> u64 {
        u64::from(u32::from(self.last)) - u64::from(u32::from(self.first)) + 1
    }

    /// First endpoint lying outside `range`, if any. A CIDR block is
    /// contiguous, so both endpoints inside means the whole span is.
    pub fn outside(&self, range: &AddressRange) -> Option<Ipv4Addr> {
        [self.first, self.last]
            .into_iter()
            .find(|address| !range.contains(*address))
    }

    /// Addresses of the span in ascending order, produced lazily
    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> {
        (u32::from(self.first)..=u32::from(self.last)).map(Ipv4Addr::from)
    }
}
