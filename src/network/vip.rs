//! VIP networks: externally routable addresses attached to VMs by the cloud.
//!
//! The director does not partition VIP address space, but it still records
//! each claimed VIP in the reservation store so that two instances can never
//! be configured with the same one.

use std::sync::Arc;

use log::info;
use serde_json::{Map, Value};

use super::settings::{NetworkSettings, VipKind, VipSettings};
use crate::config::NetworkSpec;
use crate::error::{NetworkError, Result, StoreError};
use crate::ip::{Reservation, ReservationState, ReservationStore, ReservationType};

#[derive(Debug)]
pub struct VipNetwork {
    name: String,
    cloud_properties: Map<String, Value>,
    store: Arc<dyn ReservationStore>,
}

impl VipNetwork {
    pub fn parse(spec: &NetworkSpec, store: Arc<dyn ReservationStore>) -> Self {
        VipNetwork {
            name: spec.name.clone(),
            cloud_properties: spec.cloud_properties.clone(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Only static requests are meaningful: the VIP must be named
    pub fn reserve(&self, reservation: &mut Reservation) -> Result<()> {
        reservation.begin(&self.name)?;

        let requester = reservation.requester().clone();
        let outcome = match reservation.requested() {
            ReservationType::Static(address) => {
                match self.store.try_commit(&self.name, address, &requester) {
                    Ok(()) => {
                        info!("Reserved VIP {} on network '{}' for {}", address, self.name, requester);
                        Ok(ReservationState::Reserved(address))
                    }
                    Err(StoreError::AlreadyReserved { .. }) => {
                        Err(NetworkError::NetworkReservationAlreadyInUse {
                            network: self.name.clone(),
                            requester,
                            address,
                        })
                    }
                    Err(e) => Err(e.into()),
                }
            }
            ReservationType::Dynamic | ReservationType::Any => {
                Err(NetworkError::NetworkReservationWrongType {
                    network: self.name.clone(),
                    requester,
                    reason: "VIP networks only accept static reservations".to_string(),
                })
            }
        };

        reservation.settle(outcome)
    }

    pub fn release(&self, reservation: &mut Reservation) -> Result<()> {
        let address = reservation
            .ip()
            .ok_or_else(|| reservation.not_reserved("release"))?;

        match self
            .store
            .release_owned(&self.name, address, reservation.requester())
        {
            Ok(()) => {}
            Err(StoreError::NotReserved { .. }) => return Err(reservation.not_reserved("release")),
            Err(StoreError::AlreadyReserved { .. }) => {
                return Err(NetworkError::NetworkReservationAlreadyInUse {
                    network: self.name.clone(),
                    requester: reservation.requester().clone(),
                    address,
                })
            }
            Err(e) => return Err(e.into()),
        }

        info!("Released VIP {} on network '{}'", address, self.name);
        reservation.mark_released();
        Ok(())
    }

    pub fn network_settings(&self, reservation: &Reservation) -> Result<NetworkSettings> {
        let address = reservation
            .ip()
            .ok_or_else(|| reservation.not_reserved("get network settings for"))?;

        Ok(NetworkSettings::Vip(VipSettings {
            network_type: VipKind::Vip,
            ip: address,
            cloud_properties: self.cloud_properties.clone(),
        }))
    }
}
