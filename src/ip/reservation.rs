//! Reservation request/result objects.
//!
//! A `Reservation` is created for one placement attempt, handed to
//! `Network::reserve`, and mutated exactly once from `Unresolved` to its
//! resolution. A resolved reservation is later passed back to
//! `Network::release` or `Network::network_settings`.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, Result};

/// Opaque identity of whoever owns a reservation, usually an instance handle
/// such as `web/0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Requester(String);

impl Requester {
    pub fn new(id: impl Into<String>) -> Self {
        Requester(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of address the caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationType {
    /// A specific address, which must come from a subnet's static pool
    Static(Ipv4Addr),
    /// Any free address outside the static pools
    Dynamic,
    /// Whatever the network can provide; treated as dynamic on manual networks
    Any,
}

/// Where a reservation is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationState {
    Unresolved,
    /// An address is committed in the reservation store
    Reserved(Ipv4Addr),
    /// The cloud assigns the address when the VM is created
    CloudAssigned,
    Failed(NetworkError),
    Released,
}

/// One address assignment attempt on a named network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    requester: Requester,
    network: String,
    requested: ReservationType,
    availability_zone: Option<String>,
    state: ReservationState,
}

impl Reservation {
    pub fn new(requester: Requester, network: impl Into<String>, requested: ReservationType) -> Self {
        Reservation {
            requester,
            network: network.into(),
            requested,
            availability_zone: None,
            state: ReservationState::Unresolved,
        }
    }

    pub fn new_static(requester: Requester, network: impl Into<String>, address: Ipv4Addr) -> Self {
        Self::new(requester, network, ReservationType::Static(address))
    }

    pub fn new_dynamic(requester: Requester, network: impl Into<String>) -> Self {
        Self::new(requester, network, ReservationType::Dynamic)
    }

    /// Restrict dynamic allocation to subnets tagged with `zone`
    pub fn with_availability_zone(mut self, zone: impl Into<String>) -> Self {
        self.availability_zone = Some(zone.into());
        self
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn requested(&self) -> ReservationType {
        self.requested
    }

    pub fn availability_zone(&self) -> Option<&str> {
        self.availability_zone.as_deref()
    }

    pub fn state(&self) -> &ReservationState {
        &self.state
    }

    /// True once the network has accepted the reservation and until it is released
    pub fn is_reserved(&self) -> bool {
        matches!(
            self.state,
            ReservationState::Reserved(_) | ReservationState::CloudAssigned
        )
    }

    /// The committed address, if any
    pub fn ip(&self) -> Option<Ipv4Addr> {
        match self.state {
            ReservationState::Reserved(address) => Some(address),
            _ => None,
        }
    }

    /// Check that this reservation may be resolved by `network`.
    ///
    /// A reservation addressed to another network is failed; one that was
    /// already resolved is left untouched.
    pub(crate) fn begin(&mut self, network: &str) -> Result<()> {
        if self.state != ReservationState::Unresolved {
            return Err(NetworkError::NetworkReservationAlreadyResolved {
                network: network.to_string(),
                requester: self.requester.clone(),
            });
        }

        if self.network != network {
            let error = NetworkError::NetworkReservationWrongNetwork {
                network: network.to_string(),
                requester: self.requester.clone(),
                reason: format!("reservation was made for network '{}'", self.network),
            };
            self.state = ReservationState::Failed(error.clone());
            return Err(error);
        }

        Ok(())
    }

    /// Record the outcome of a reserve attempt and hand the error back
    pub(crate) fn settle(&mut self, outcome: Result<ReservationState>) -> Result<()> {
        match outcome {
            Ok(state) => {
                self.state = state;
                Ok(())
            }
            Err(error) => {
                self.state = ReservationState::Failed(error.clone());
                Err(error)
            }
        }
    }

    pub(crate) fn mark_released(&mut self) {
        self.state = ReservationState::Released;
    }

    /// Error for operations that need a committed reservation
    pub(crate) fn not_reserved(&self, action: &'static str) -> NetworkError {
        NetworkError::NetworkReservationNotReserved {
            network: self.network.clone(),
            requester: self.requester.clone(),
            action,
        }
    }
}
