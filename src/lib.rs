//! # Fleetnet - network partitioning and IP reservation for fleet deployments
//!
//! This library is the deployment-planning core of a fleet director: given a
//! deployment manifest describing networks and jobs, it assigns IP addresses
//! to instances without conflicts, honoring static pools, dynamic pools,
//! per-subnet capacity and availability-zone constraints.
//!
//! ## Architecture
//!
//! - `ip`: CIDR ranges, subnets, reservations and reservation stores
//! - `network`: manual, dynamic and VIP networks and their resolution
//! - `planner`: placement of job instances onto a deployment's networks
//! - `config`: manifest structures and validation
//! - `config_loader`: manifest file loading and CLI overrides
//! - `error`: the error taxonomy shared by all of the above
//!
//! ## Reservation flow
//!
//! A placement step builds a `Reservation` naming a network and optionally
//! an address, then calls `Network::reserve`. The network picks a subnet,
//! commits the address through the `ReservationStore`, and records the
//! outcome in the reservation. `Network::release` reverses it.
//!
//! The store is the single source of truth for which addresses are taken.
//! It is either transient (in memory, one process) or durable (a ledger
//! file that survives restarts), chosen when the networks are built.
//!
//! ## Example Usage
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//! use fleetnet::config::Manifest;
//! use fleetnet::ip::{Requester, Reservation, TransientStore};
//! use fleetnet::planner::NetworkPlanner;
//!
//! let manifest: Manifest = serde_yaml::from_str(r#"
//! name: fleet
//! networks:
//!   - name: default
//!     subnets:
//!       - range: 10.0.0.0/24
//!         gateway: 10.0.0.1
//! "#)?;
//!
//! let planner = NetworkPlanner::new(&manifest, Arc::new(TransientStore::new()))?;
//! let network = planner.network("default")?;
//!
//! let mut reservation = Reservation::new_dynamic(Requester::new("web/0"), "default");
//! network.reserve(&mut reservation)?;
//! assert_eq!(reservation.ip(), Some(Ipv4Addr::new(10, 0, 0, 2)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! Library operations return `Result<T, fleetnet::error::NetworkError>`;
//! every variant carries the network, address, job or zone data needed for
//! an operator-facing message. Manifest loading and the binary use
//! `color_eyre` for context-rich reporting.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod ip;
pub mod network;
pub mod planner;

pub use error::{NetworkError, Result, StoreError};
