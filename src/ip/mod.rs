//! IP address ranges, subnets, reservations and reservation stores.
//!
//! This module holds the leaf components of the reservation engine: CIDR
//! arithmetic, the immutable subnet model, the reservation value object, and
//! the stores that record which `(network, address)` pairs are taken.

pub mod ledger;
pub mod range;
pub mod reservation;
pub mod store;
pub mod subnet;

// Re-export commonly used types
pub use ledger::{FileLedger, LedgerTransaction, ReservationLedger, ReservationRecord};
pub use range::AddressRange;
pub use reservation::{Requester, Reservation, ReservationState, ReservationType};
pub use store::{DurableStore, ReservationStore, StoreConfig, StoreResult, TransientStore};
pub use subnet::{AddressClass, AddressSpan, Subnet};
