//! Resolution of a deployment's network definitions.
//!
//! The resolver turns manifest network declarations into `Network`s bound
//! to one reservation store, rejecting duplicate names and manual subnets
//! that overlap across networks. Ranges claimed by other deployments that
//! share the address space are folded into each subnet's reserved set.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use super::Network;
use crate::config::NetworkSpec;
use crate::error::{NetworkError, Result};
use crate::ip::{AddressRange, ReservationStore};

#[derive(Debug, Clone, Default)]
pub struct GlobalNetworkResolver {
    foreign_ranges: Vec<AddressRange>,
}

impl GlobalNetworkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that treats `ranges` as already claimed elsewhere
    pub fn with_foreign_ranges(ranges: Vec<AddressRange>) -> Self {
        GlobalNetworkResolver {
            foreign_ranges: ranges,
        }
    }

    /// Parse foreign ranges given in CIDR notation
    pub fn parse_foreign_ranges(values: &[String]) -> Result<Self> {
        let ranges = values
            .iter()
            .map(|value| AddressRange::parse(value))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::with_foreign_ranges(ranges))
    }

    pub fn foreign_ranges(&self) -> &[AddressRange] {
        &self.foreign_ranges
    }

    /// Build every network in `specs`, or none of them.
    ///
    /// Fails with `DuplicateNetworkName` if two declarations share a name
    /// and with `NetworkOverlappingSubnets` if subnets of two different
    /// manual networks overlap.
    pub fn resolve(&self, specs: &[NetworkSpec], store: Arc<dyn ReservationStore>) -> Result<Vec<Network>> {
        let mut names = HashSet::new();
        for spec in specs {
            if !names.insert(spec.name.as_str()) {
                return Err(NetworkError::DuplicateNetworkName {
                    name: spec.name.clone(),
                });
            }
        }

        let networks = specs
            .iter()
            .map(|spec| Network::parse(spec, Arc::clone(&store), &self.foreign_ranges))
            .collect::<Result<Vec<_>>>()?;

        check_cross_network_overlap(&networks)?;

        info!(
            "Resolved {} network(s) with {} foreign range(s) reserved",
            networks.len(),
            self.foreign_ranges.len()
        );
        Ok(networks)
    }
}

fn check_cross_network_overlap(networks: &[Network]) -> Result<()> {
    let manual: Vec<_> = networks.iter().filter_map(Network::as_manual).collect();

    for (i, first) in manual.iter().enumerate() {
        for second in &manual[i + 1..] {
            for a in first.subnets() {
                for b in second.subnets() {
                    if a.range().overlaps(b.range()) {
                        return Err(NetworkError::NetworkOverlappingSubnets {
                            first: first.name().to_string(),
                            first_range: a.range().to_string(),
                            second: second.name().to_string(),
                            second_range: b.range().to_string(),
                        });
                    }
                }
            }
        }
    }

    debug!("No overlapping subnets across {} manual network(s)", manual.len());
    Ok(())
}
