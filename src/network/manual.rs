//! Manual networks: director-managed address partitioning.
//!
//! A manual network owns an ordered list of non-overlapping subnets and
//! resolves reservations against them. Static requests must name an address
//! from a subnet's static pool; dynamic requests take the lowest free
//! address of the first subnet (in declared order) that has one.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, info, log_enabled, Level};

use super::settings::{DefaultRole, ManualSettings, NetworkSettings};
use super::zones::{collect_zones, ensure_zones_covered};
use crate::config::SubnetSpec;
use crate::error::{NetworkError, Result, StoreError};
use crate::ip::{
    AddressClass, AddressRange, Requester, Reservation, ReservationState, ReservationStore,
    ReservationType, Subnet,
};

/// Network whose addresses are partitioned into subnets by the director
#[derive(Debug)]
pub struct ManualNetwork {
    name: String,
    subnets: Vec<Subnet>,
    store: Arc<dyn ReservationStore>,
}

impl ManualNetwork {
    /// Build a network from already-parsed subnets.
    ///
    /// Fails with `OverlappingRange` if any two subnets share an address,
    /// whatever order they were declared in.
    pub fn new(name: impl Into<String>, subnets: Vec<Subnet>, store: Arc<dyn ReservationStore>) -> Result<Self> {
        let name = name.into();

        for (i, first) in subnets.iter().enumerate() {
            for second in &subnets[i + 1..] {
                if first.range().overlaps(second.range()) {
                    return Err(NetworkError::OverlappingRange {
                        network: name.clone(),
                        first: first.range().to_string(),
                        second: second.range().to_string(),
                    });
                }
            }
        }

        debug!("Built manual network '{}' with {} subnet(s)", name, subnets.len());
        if log_enabled!(Level::Debug) {
            for subnet in &subnets {
                debug!(
                    "  {} of '{}': {} dynamic, {} static",
                    subnet.range(),
                    name,
                    subnet.dynamic_capacity(),
                    subnet.static_pool().len()
                );
            }
        }
        Ok(ManualNetwork {
            name,
            subnets,
            store,
        })
    }

    /// Parse every subnet declaration and build the network
    pub fn parse(
        name: &str,
        specs: &[SubnetSpec],
        store: Arc<dyn ReservationStore>,
        foreign_ranges: &[AddressRange],
    ) -> Result<Self> {
        let subnets = specs
            .iter()
            .map(|spec| Subnet::parse(name, spec, foreign_ranges))
            .collect::<Result<Vec<_>>>()?;
        Self::new(name, subnets, store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    /// Resolve `reservation` against this network's subnets.
    ///
    /// On failure the reservation is left in `Failed` and the same error is
    /// returned.
    pub fn reserve(&self, reservation: &mut Reservation) -> Result<()> {
        reservation.begin(&self.name)?;

        let outcome = match reservation.requested() {
            ReservationType::Static(address) => self.reserve_static(reservation.requester(), address),
            ReservationType::Dynamic | ReservationType::Any => {
                self.reserve_dynamic(reservation.requester(), reservation.availability_zone())
            }
        };

        reservation.settle(outcome)
    }

    fn reserve_static(&self, requester: &Requester, address: Ipv4Addr) -> Result<ReservationState> {
        let subnet = self.subnet_for(address, requester)?;

        match subnet.classify(address) {
            AddressClass::Static => {}
            AddressClass::Reserved => return Err(self.in_use(requester, address)),
            AddressClass::Dynamic => {
                return Err(NetworkError::NetworkReservationWrongType {
                    network: self.name.clone(),
                    requester: requester.clone(),
                    reason: format!(
                        "{} is not in the static pool of subnet {}",
                        address,
                        subnet.range()
                    ),
                })
            }
            AddressClass::OutOfRange => return Err(self.outside_subnets(requester, address)),
        }

        match self.store.try_commit(&self.name, address, requester) {
            Ok(()) => {
                info!(
                    "Reserved static IP {} on network '{}' for {}",
                    address, self.name, requester
                );
                Ok(ReservationState::Reserved(address))
            }
            Err(StoreError::AlreadyReserved { .. }) => Err(self.in_use(requester, address)),
            Err(e) => Err(e.into()),
        }
    }

    fn reserve_dynamic(&self, requester: &Requester, zone: Option<&str>) -> Result<ReservationState> {
        let candidates = self
            .subnets
            .iter()
            .filter(|subnet| zone.is_none() || subnet.availability_zone() == zone);

        for subnet in candidates {
            // Addresses lost to concurrent commits since the last scan. Each
            // retry excludes one more address, so the loop ends within the
            // subnet's address space.
            let mut lost = BTreeSet::new();

            while let Some(address) = subnet.next_available_dynamic(self.store.as_ref(), &lost)? {
                match self.store.try_commit(&self.name, address, requester) {
                    Ok(()) => {
                        info!(
                            "Reserved dynamic IP {} in {} on network '{}' for {}",
                            address,
                            subnet.range(),
                            self.name,
                            requester
                        );
                        return Ok(ReservationState::Reserved(address));
                    }
                    Err(StoreError::AlreadyReserved { owner, .. }) => {
                        debug!(
                            "Lost {} on network '{}' to {}, trying the next address",
                            address, self.name, owner
                        );
                        lost.insert(address);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            debug!("Subnet {} of network '{}' is exhausted", subnet.range(), self.name);
        }

        Err(NetworkError::NetworkReservationNotEnoughCapacity {
            network: self.name.clone(),
            requester: requester.clone(),
        })
    }

    /// Give a reserved address back to the store
    pub fn release(&self, reservation: &mut Reservation) -> Result<()> {
        let address = match reservation.state() {
            ReservationState::Reserved(address) => *address,
            _ => return Err(reservation.not_reserved("release")),
        };
        self.ensure_own(reservation)?;

        match self
            .store
            .release_owned(&self.name, address, reservation.requester())
        {
            Ok(()) => {}
            Err(StoreError::NotReserved { .. }) => return Err(reservation.not_reserved("release")),
            Err(StoreError::AlreadyReserved { .. }) => {
                return Err(self.in_use(reservation.requester(), address))
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Released IP {} on network '{}' from {}",
            address,
            self.name,
            reservation.requester()
        );
        reservation.mark_released();
        Ok(())
    }

    /// Agent settings for a reserved address
    pub fn network_settings(&self, reservation: &Reservation, defaults: &[DefaultRole]) -> Result<NetworkSettings> {
        let address = reservation
            .ip()
            .ok_or_else(|| reservation.not_reserved("get network settings for"))?;
        self.ensure_own(reservation)?;
        let subnet = self.subnet_for(address, reservation.requester())?;

        Ok(NetworkSettings::Manual(ManualSettings {
            ip: address,
            netmask: subnet.netmask(),
            cloud_properties: subnet.cloud_properties().clone(),
            gateway: subnet.gateway(),
            dns: subnet.dns().map(<[Ipv4Addr]>::to_vec),
            default: defaults.to_vec(),
        }))
    }

    /// Zones of the subnets, in first-declared order without duplicates
    pub fn availability_zones(&self) -> Vec<String> {
        collect_zones(self.subnets.iter().filter_map(Subnet::availability_zone))
    }

    /// Fail unless every zone in `zones` is served by some subnet
    pub fn validate_has_job(&self, zones: &[String], job: &str) -> Result<()> {
        ensure_zones_covered(&self.name, &self.availability_zones(), zones, job)
    }

    fn subnet_for(&self, address: Ipv4Addr, requester: &Requester) -> Result<&Subnet> {
        self.subnets
            .iter()
            .find(|subnet| subnet.range().contains(address))
            .ok_or_else(|| self.outside_subnets(requester, address))
    }

    fn ensure_own(&self, reservation: &Reservation) -> Result<()> {
        if reservation.network() == self.name {
            Ok(())
        } else {
            Err(NetworkError::NetworkReservationWrongNetwork {
                network: self.name.clone(),
                requester: reservation.requester().clone(),
                reason: format!("reservation belongs to network '{}'", reservation.network()),
            })
        }
    }

    fn outside_subnets(&self, requester: &Requester, address: Ipv4Addr) -> NetworkError {
        NetworkError::NetworkReservationWrongNetwork {
            network: self.name.clone(),
            requester: requester.clone(),
            reason: format!("{} does not belong to any of its subnets", address),
        }
    }

    fn in_use(&self, requester: &Requester, address: Ipv4Addr) -> NetworkError {
        NetworkError::NetworkReservationAlreadyInUse {
            network: self.name.clone(),
            requester: requester.clone(),
            address,
        }
    }
}
