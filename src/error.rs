//! Error taxonomy for network planning and IP reservation.
//!
//! Every fallible operation in the crate reports one of these variants to its
//! immediate caller. Variants carry the network name, address, job name or
//! zone list needed to render an operator-facing message.

use std::net::Ipv4Addr;

use crate::ip::Requester;

/// Result type for network planning operations
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors raised while building networks or reserving addresses on them
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("Invalid range format '{value}': {reason}")]
    InvalidRangeFormat { value: String, reason: String },

    #[error("Invalid IP address '{value}' in network '{network}'")]
    InvalidAddressFormat { network: String, value: String },

    #[error("Gateway {gateway} is not a usable address of range {range} in network '{network}'")]
    GatewayOutOfRange {
        network: String,
        range: String,
        gateway: Ipv4Addr,
    },

    #[error("Static IP {address} is out of range {range} or collides with a reserved address in network '{network}'")]
    StaticPoolOutOfRange {
        network: String,
        range: String,
        address: Ipv4Addr,
    },

    #[error("Reserved IP {address} is out of range {range} in network '{network}'")]
    ReservedPoolOutOfRange {
        network: String,
        range: String,
        address: Ipv4Addr,
    },

    #[error("Network '{network}' has overlapping subnets: {first} and {second}")]
    OverlappingRange {
        network: String,
        first: String,
        second: String,
    },

    #[error("Subnet {first_range} of network '{first}' overlaps subnet {second_range} of network '{second}'")]
    NetworkOverlappingSubnets {
        first: String,
        first_range: String,
        second: String,
        second_range: String,
    },

    #[error("Duplicate network name '{name}'")]
    DuplicateNetworkName { name: String },

    #[error("Unknown network '{name}'")]
    UnknownNetwork { name: String },

    #[error("Reservation for '{requester}' does not fit network '{network}': {reason}")]
    NetworkReservationWrongNetwork {
        network: String,
        requester: Requester,
        reason: String,
    },

    #[error("Reservation for '{requester}' on network '{network}' has the wrong type: {reason}")]
    NetworkReservationWrongType {
        network: String,
        requester: Requester,
        reason: String,
    },

    #[error("IP {address} on network '{network}' is already in use, requested by '{requester}'")]
    NetworkReservationAlreadyInUse {
        network: String,
        requester: Requester,
        address: Ipv4Addr,
    },

    #[error("Network '{network}' does not have enough capacity for '{requester}'")]
    NetworkReservationNotEnoughCapacity {
        network: String,
        requester: Requester,
    },

    #[error("Cannot {action} reservation for '{requester}' on network '{network}' without an IP")]
    NetworkReservationNotReserved {
        network: String,
        requester: Requester,
        action: &'static str,
    },

    #[error("Reservation for '{requester}' on network '{network}' has already been resolved")]
    NetworkReservationAlreadyResolved {
        network: String,
        requester: Requester,
    },

    #[error("Job '{job}' refers to an availability zone(s) '{}' but '{network}' has no matching subnet(s).", format_zone_list(.zones))]
    JobNetworkMissingRequiredAvailabilityZone {
        job: String,
        network: String,
        zones: Vec<String>,
    },

    #[error("Job '{job}' has {instances} instance(s) but {static_ips} static IP(s) on network '{network}'")]
    JobStaticIpCountMismatch {
        job: String,
        network: String,
        instances: u32,
        static_ips: usize,
    },

    #[error("Reservation store failure: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by a reservation store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{address} on network '{network}' is already reserved by '{owner}'")]
    AlreadyReserved {
        network: String,
        address: Ipv4Addr,
        owner: Requester,
    },

    #[error("{address} on network '{network}' is not reserved")]
    NotReserved { network: String, address: Ipv4Addr },

    #[error("Ledger I/O failed at {path}: {message}")]
    Io { path: String, message: String },

    #[error("Ledger at {path} is corrupt: {message}")]
    Corrupt { path: String, message: String },
}

/// Render zones as a quoted, bracketed list: `["zone_3", "zone_4"]`
pub(crate) fn format_zone_list(zones: &[String]) -> String {
    let quoted: Vec<String> = zones.iter().map(|zone| format!("{:?}", zone)).collect();
    format!("[{}]", quoted.join(", "))
}
