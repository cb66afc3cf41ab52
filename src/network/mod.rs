//! Networks and network resolution.
//!
//! `Network` is a closed set of network kinds sharing one capability surface:
//! `reserve`, `release`, `network_settings`, `availability_zones` and
//! `validate_has_job`. Every network holds a handle to the reservation store
//! it was built with; the store choice is made once, at construction.
//!
//! - `manual`: director-partitioned subnets (the interesting case)
//! - `dynamic`: cloud-assigned addresses
//! - `vip`: externally routable addresses named by the deployment
//! - `resolver`: name and overlap checks across a deployment's networks

pub mod dynamic;
pub mod manual;
pub mod resolver;
pub mod settings;
pub mod vip;
mod zones;

use std::sync::Arc;

pub use dynamic::DynamicNetwork;
pub use manual::ManualNetwork;
pub use resolver::GlobalNetworkResolver;
pub use settings::{DefaultRole, DynamicSettings, ManualSettings, NetworkSettings, VipSettings};
pub use vip::VipNetwork;

use crate::config::{NetworkSpec, NetworkType};
use crate::error::{NetworkError, Result};
use crate::ip::{AddressRange, Reservation, ReservationStore};

/// A network of any kind
#[derive(Debug)]
pub enum Network {
    Manual(ManualNetwork),
    Dynamic(DynamicNetwork),
    Vip(VipNetwork),
}

impl Network {
    /// Build a network from its manifest declaration
    pub fn parse(
        spec: &NetworkSpec,
        store: Arc<dyn ReservationStore>,
        foreign_ranges: &[AddressRange],
    ) -> Result<Self> {
        match spec.network_type {
            NetworkType::Manual => Ok(Network::Manual(ManualNetwork::parse(
                &spec.name,
                &spec.subnets,
                store,
                foreign_ranges,
            )?)),
            NetworkType::Dynamic => Ok(Network::Dynamic(DynamicNetwork::parse(spec)?)),
            NetworkType::Vip => Ok(Network::Vip(VipNetwork::parse(spec, store))),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Network::Manual(network) => network.name(),
            Network::Dynamic(network) => network.name(),
            Network::Vip(network) => network.name(),
        }
    }

    pub fn network_type(&self) -> NetworkType {
        match self {
            Network::Manual(_) => NetworkType::Manual,
            Network::Dynamic(_) => NetworkType::Dynamic,
            Network::Vip(_) => NetworkType::Vip,
        }
    }

    pub fn reserve(&self, reservation: &mut Reservation) -> Result<()> {
        match self {
            Network::Manual(network) => network.reserve(reservation),
            Network::Dynamic(network) => network.reserve(reservation),
            Network::Vip(network) => network.reserve(reservation),
        }
    }

    pub fn release(&self, reservation: &mut Reservation) -> Result<()> {
        self.ensure_own(reservation)?;
        match self {
            Network::Manual(network) => network.release(reservation),
            Network::Dynamic(network) => network.release(reservation),
            Network::Vip(network) => network.release(reservation),
        }
    }

    /// Settings for `reservation`; `defaults` lists the roles this network
    /// is authoritative for (ignored by VIP networks)
    pub fn network_settings(&self, reservation: &Reservation, defaults: &[DefaultRole]) -> Result<NetworkSettings> {
        self.ensure_own(reservation)?;
        match self {
            Network::Manual(network) => network.network_settings(reservation, defaults),
            Network::Dynamic(network) => network.network_settings(reservation, defaults),
            Network::Vip(network) => network.network_settings(reservation),
        }
    }

    pub fn availability_zones(&self) -> Vec<String> {
        match self {
            Network::Manual(network) => network.availability_zones(),
            Network::Dynamic(network) => network.availability_zones(),
            Network::Vip(_) => Vec::new(),
        }
    }

    /// VIP networks are not zone-bound and accept every job
    pub fn validate_has_job(&self, zones: &[String], job: &str) -> Result<()> {
        match self {
            Network::Manual(network) => network.validate_has_job(zones, job),
            Network::Dynamic(network) => network.validate_has_job(zones, job),
            Network::Vip(_) => Ok(()),
        }
    }

    pub fn as_manual(&self) -> Option<&ManualNetwork> {
        match self {
            Network::Manual(network) => Some(network),
            _ => None,
        }
    }

    fn ensure_own(&self, reservation: &Reservation) -> Result<()> {
        if reservation.network() == self.name() {
            return Ok(());
        }
        Err(NetworkError::NetworkReservationWrongNetwork {
            network: self.name().to_string(),
            requester: reservation.requester().clone(),
            reason: format!("reservation belongs to network '{}'", reservation.network()),
        })
    }
}
