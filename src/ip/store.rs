//! Reservation stores.
//!
//! The store is the only mutable shared state of the reservation engine:
//! subnets and networks consult it for every "is this address taken"
//! decision and never keep their own allocation table. Two variants share
//! the `ReservationStore` contract:
//!
//! - `TransientStore`: an in-process guarded table, used when reservations
//!   live no longer than one operation (e.g. compilation workers).
//! - `DurableStore`: every operation runs inside one transaction of a
//!   `ReservationLedger`, so reservations survive restarts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::ledger::{FileLedger, ReservationLedger, ReservationRecord};
use super::reservation::Requester;
use crate::error::StoreError;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Authoritative table of `(network, address) -> requester` bindings.
///
/// Implementations must be safe to share between threads. `try_commit` is
/// atomic: for a given `(network, address)` at most one caller succeeds
/// until the binding is released.
pub trait ReservationStore: Send + Sync + fmt::Debug {
    /// Bind `address` on `network` to `requester`, failing with
    /// `StoreError::AlreadyReserved` if someone already holds it
    fn try_commit(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()>;

    /// Remove a binding, failing with `StoreError::NotReserved` if absent
    fn release(&self, network: &str, address: Ipv4Addr) -> StoreResult<()>;

    /// Remove a binding only if `requester` holds it. Fails with
    /// `StoreError::NotReserved` if absent and `StoreError::AlreadyReserved`
    /// if another requester holds it.
    fn release_owned(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()>;

    fn is_reserved(&self, network: &str, address: Ipv4Addr) -> StoreResult<bool>;

    /// Who holds `address` on `network`
    fn owner(&self, network: &str, address: Ipv4Addr) -> StoreResult<Option<Requester>>;

    /// Snapshot of the addresses currently bound on `network`
    fn reserved_addresses(&self, network: &str) -> StoreResult<BTreeSet<Ipv4Addr>>;
}

/// In-memory store scoped to the lifetime of one process-local operation
#[derive(Debug, Default)]
pub struct TransientStore {
    table: Mutex<HashMap<String, BTreeMap<Ipv4Addr, Requester>>>,
}

impl TransientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of bindings across all networks
    pub fn len(&self) -> usize {
        self.table.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReservationStore for TransientStore {
    fn try_commit(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()> {
        let mut table = self.table.lock();
        let bindings = table.entry(network.to_string()).or_default();

        if let Some(owner) = bindings.get(&address) {
            return Err(StoreError::AlreadyReserved {
                network: network.to_string(),
                address,
                owner: owner.clone(),
            });
        }

        bindings.insert(address, requester.clone());
        debug!("Committed {} on network '{}' to {}", address, network, requester);
        Ok(())
    }

    fn release(&self, network: &str, address: Ipv4Addr) -> StoreResult<()> {
        let mut table = self.table.lock();
        let removed = table
            .get_mut(network)
            .and_then(|bindings| bindings.remove(&address));

        match removed {
            Some(owner) => {
                debug!("Released {} on network '{}' held by {}", address, network, owner);
                Ok(())
            }
            None => Err(StoreError::NotReserved {
                network: network.to_string(),
                address,
            }),
        }
    }

    fn release_owned(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()> {
        let mut table = self.table.lock();
        let bindings = table.get_mut(network);

        match bindings.as_ref().and_then(|bindings| bindings.get(&address)) {
            None => {
                return Err(StoreError::NotReserved {
                    network: network.to_string(),
                    address,
                })
            }
            Some(owner) if owner != requester => {
                return Err(StoreError::AlreadyReserved {
                    network: network.to_string(),
                    address,
                    owner: owner.clone(),
                })
            }
            Some(_) => {}
        }

        if let Some(bindings) = bindings {
            bindings.remove(&address);
        }
        debug!("Released {} on network '{}' held by {}", address, network, requester);
        Ok(())
    }

    fn is_reserved(&self, network: &str, address: Ipv4Addr) -> StoreResult<bool> {
        Ok(self.owner(network, address)?.is_some())
    }

    fn owner(&self, network: &str, address: Ipv4Addr) -> StoreResult<Option<Requester>> {
        let table = self.table.lock();
        Ok(table
            .get(network)
            .and_then(|bindings| bindings.get(&address))
            .cloned())
    }

    fn reserved_addresses(&self, network: &str) -> StoreResult<BTreeSet<Ipv4Addr>> {
        let table = self.table.lock();
        Ok(table
            .get(network)
            .map(|bindings| bindings.keys().copied().collect())
            .unwrap_or_default())
    }
}

/// Store whose every operation is one transaction against a ledger
#[derive(Debug)]
pub struct DurableStore<L: ReservationLedger> {
    ledger: L,
}

impl<L: ReservationLedger> DurableStore<L> {
    pub fn new(ledger: L) -> Self {
        DurableStore { ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

impl<L: ReservationLedger> ReservationStore for DurableStore<L> {
    fn try_commit(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()> {
        let mut tx = self.ledger.begin()?;

        if let Some(existing) = tx.find(network, address) {
            return Err(StoreError::AlreadyReserved {
                network: network.to_string(),
                address,
                owner: existing.requester.clone(),
            });
        }

        tx.insert(ReservationRecord {
            network: network.to_string(),
            address,
            requester: requester.clone(),
            reserved_at: Utc::now(),
        })?;
        tx.commit()?;

        debug!("Durably committed {} on network '{}' to {}", address, network, requester);
        Ok(())
    }

    fn release(&self, network: &str, address: Ipv4Addr) -> StoreResult<()> {
        let mut tx = self.ledger.begin()?;

        let record = tx.delete(network, address).ok_or_else(|| StoreError::NotReserved {
            network: network.to_string(),
            address,
        })?;
        tx.commit()?;

        debug!(
            "Durably released {} on network '{}' held by {}",
            address, network, record.requester
        );
        Ok(())
    }

    fn release_owned(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()> {
        let mut tx = self.ledger.begin()?;

        match tx.find(network, address) {
            None => {
                return Err(StoreError::NotReserved {
                    network: network.to_string(),
                    address,
                })
            }
            Some(record) if &record.requester != requester => {
                return Err(StoreError::AlreadyReserved {
                    network: network.to_string(),
                    address,
                    owner: record.requester.clone(),
                })
            }
            Some(_) => {}
        }

        tx.delete(network, address);
        tx.commit()?;

        debug!("Durably released {} on network '{}' held by {}", address, network, requester);
        Ok(())
    }

    fn is_reserved(&self, network: &str, address: Ipv4Addr) -> StoreResult<bool> {
        let tx = self.ledger.begin()?;
        Ok(tx.find(network, address).is_some())
    }

    fn owner(&self, network: &str, address: Ipv4Addr) -> StoreResult<Option<Requester>> {
        let tx = self.ledger.begin()?;
        Ok(tx.find(network, address).map(|record| record.requester.clone()))
    }

    fn reserved_addresses(&self, network: &str) -> StoreResult<BTreeSet<Ipv4Addr>> {
        let tx = self.ledger.begin()?;
        Ok(tx.records(network).into_iter().map(|record| record.address).collect())
    }
}

/// Which store backs a planning run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Reservations vanish with the process
    #[default]
    Transient,
    /// Reservations persist in a ledger file
    Durable { path: PathBuf },
}

impl StoreConfig {
    /// Open the configured store, ready to be shared by every network
    pub fn open(&self) -> StoreResult<Arc<dyn ReservationStore>> {
        match self {
            StoreConfig::Transient => {
                debug!("Using transient reservation store");
                Ok(Arc::new(TransientStore::new()))
            }
            StoreConfig::Durable { path } => {
                debug!("Using durable reservation store at {}", path.display());
                Ok(Arc::new(DurableStore::new(FileLedger::open(path)?)))
            }
        }
    }
}
