//! Dynamic networks: the cloud assigns addresses at VM creation.

use std::net::Ipv4Addr;

use log::debug;
use serde_json::{Map, Value};

use super::settings::{DefaultRole, DynamicKind, DynamicSettings, NetworkSettings};
use super::zones::{collect_zones, ensure_zones_covered};
use crate::config::NetworkSpec;
use crate::error::{NetworkError, Result};
use crate::ip::{Reservation, ReservationState, ReservationType};

/// Network whose addresses are chosen by the cloud provider
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicNetwork {
    name: String,
    dns: Option<Vec<Ipv4Addr>>,
    cloud_properties: Map<String, Value>,
    availability_zones: Vec<String>,
}

impl DynamicNetwork {
    pub fn parse(spec: &NetworkSpec) -> Result<Self> {
        let dns = spec
            .dns
            .as_ref()
            .map(|servers| {
                servers
                    .iter()
                    .map(|value| {
                        value.trim().parse().map_err(|_| NetworkError::InvalidAddressFormat {
                            network: spec.name.clone(),
                            value: value.clone(),
                        })
                    })
                    .collect::<Result<Vec<Ipv4Addr>>>()
            })
            .transpose()?;

        Ok(DynamicNetwork {
            name: spec.name.clone(),
            dns,
            cloud_properties: spec.cloud_properties.clone(),
            availability_zones: collect_zones(spec.availability_zones.iter().map(String::as_str)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accept dynamic requests; the address is assigned out of band
    pub fn reserve(&self, reservation: &mut Reservation) -> Result<()> {
        reservation.begin(&self.name)?;

        let outcome = match reservation.requested() {
            ReservationType::Static(address) => Err(NetworkError::NetworkReservationWrongType {
                network: self.name.clone(),
                requester: reservation.requester().clone(),
                reason: format!("static IP {} cannot be reserved on a dynamic network", address),
            }),
            ReservationType::Dynamic | ReservationType::Any => self.check_zone(reservation),
        };

        reservation.settle(outcome)
    }

    fn check_zone(&self, reservation: &Reservation) -> Result<ReservationState> {
        match reservation.availability_zone() {
            Some(zone)
                if !self.availability_zones.is_empty()
                    && !self.availability_zones.iter().any(|known| known == zone) =>
            {
                Err(NetworkError::NetworkReservationWrongNetwork {
                    network: self.name.clone(),
                    requester: reservation.requester().clone(),
                    reason: format!("availability zone '{}' is not served", zone),
                })
            }
            _ => {
                debug!(
                    "Accepted cloud-assigned reservation on network '{}' for {}",
                    self.name,
                    reservation.requester()
                );
                Ok(ReservationState::CloudAssigned)
            }
        }
    }

    pub fn release(&self, reservation: &mut Reservation) -> Result<()> {
        if reservation.state() != &ReservationState::CloudAssigned {
            return Err(reservation.not_reserved("release"));
        }
        reservation.mark_released();
        Ok(())
    }

    pub fn network_settings(&self, reservation: &Reservation, defaults: &[DefaultRole]) -> Result<NetworkSettings> {
        if reservation.state() != &ReservationState::CloudAssigned {
            return Err(reservation.not_reserved("get network settings for"));
        }

        Ok(NetworkSettings::Dynamic(DynamicSettings {
            network_type: DynamicKind::Dynamic,
            cloud_properties: self.cloud_properties.clone(),
            dns: self.dns.clone(),
            default: defaults.to_vec(),
        }))
    }

    pub fn availability_zones(&self) -> Vec<String> {
        self.availability_zones.clone()
    }

    pub fn validate_has_job(&self, zones: &[String], job: &str) -> Result<()> {
        ensure_zones_covered(&self.name, &self.availability_zones, zones, job)
    }
}
