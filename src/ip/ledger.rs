//! Transactional backing for the durable reservation store.
//!
//! A `ReservationLedger` is the narrow interface the durable store needs
//! from persistent storage: begin a transaction, look up or mutate records
//! keyed uniquely by `(network, address)`, and commit. Dropping a
//! transaction without committing discards its changes.
//!
//! `FileLedger` keeps the table in a JSON file. A transaction holds an
//! exclusive OS lock on a sidecar `.lock` file from `begin` until it is
//! committed or dropped, so every handle on the same path, in this process
//! or another, sees a serial history. The table is re-read under the lock
//! and commits replace the file atomically.

use std::collections::BTreeMap;
use std::fmt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::reservation::Requester;
use super::store::StoreResult;
use crate::error::StoreError;

const LEDGER_FORMAT_VERSION: u32 = 1;

/// One committed `(network, address) -> requester` binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub network: String,
    pub address: Ipv4Addr,
    pub requester: Requester,
    pub reserved_at: DateTime<Utc>,
}

/// Persistent table of reservation records with transactional access
pub trait ReservationLedger: Send + Sync + fmt::Debug {
    fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction + '_>>;
}

/// An open ledger transaction
pub trait LedgerTransaction {
    fn find(&self, network: &str, address: Ipv4Addr) -> Option<&ReservationRecord>;

    /// All records on `network`, ordered by address
    fn records(&self, network: &str) -> Vec<&ReservationRecord>;

    /// Insert a record, enforcing uniqueness of `(network, address)`
    fn insert(&mut self, record: ReservationRecord) -> StoreResult<()>;

    fn delete(&mut self, network: &str, address: Ipv4Addr) -> Option<ReservationRecord>;

    fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    records: Vec<ReservationRecord>,
}

type RecordTable = BTreeMap<(String, Ipv4Addr), ReservationRecord>;

/// Ledger stored as a JSON document on disk
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    lock_path: PathBuf,
    lock: Mutex<()>,
}

impl FileLedger {
    /// Open the ledger at `path`, creating an empty one if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let mut lock_name = OsString::from(path.as_os_str());
        lock_name.push(".lock");
        let ledger = FileLedger {
            lock_path: PathBuf::from(lock_name),
            path,
            lock: Mutex::new(()),
        };

        // Creation happens under the lock so a concurrent opener cannot
        // replace a ledger that already holds records
        let exclusive = ledger.lock_exclusive()?;
        if ledger.path.exists() {
            // Fail early on a corrupt file instead of at the first reservation
            let table = ledger.load()?;
            info!(
                "Opened reservation ledger {} with {} record(s)",
                ledger.path.display(),
                table.len()
            );
        } else {
            ledger.store(&RecordTable::new())?;
            info!("Created reservation ledger {}", ledger.path.display());
        }
        drop(exclusive);

        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until this handle owns the ledger's OS lock. The lock is
    /// released when the returned file is closed.
    fn lock_exclusive(&self) -> StoreResult<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| io_error(&self.lock_path, e))?;
        FileExt::lock_exclusive(&file).map_err(|e| io_error(&self.lock_path, e))?;
        Ok(file)
    }

    fn load(&self) -> StoreResult<RecordTable> {
        let file = File::open(&self.path).map_err(|e| io_error(&self.path, e))?;
        let contents: LedgerFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| StoreError::Corrupt {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;

        if contents.version != LEDGER_FORMAT_VERSION {
            return Err(StoreError::Corrupt {
                path: self.path.display().to_string(),
                message: format!("unsupported ledger version {}", contents.version),
            });
        }

        let mut table = RecordTable::new();
        for record in contents.records {
            let key = (record.network.clone(), record.address);
            if table.insert(key, record).is_some() {
                return Err(StoreError::Corrupt {
                    path: self.path.display().to_string(),
                    message: "duplicate (network, address) record".to_string(),
                });
            }
        }
        Ok(table)
    }

    fn store(&self, table: &RecordTable) -> StoreResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;

        let contents = LedgerFile {
            version: LEDGER_FORMAT_VERSION,
            records: table.values().cloned().collect(),
        };

        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, &contents).map_err(|e| StoreError::Io {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
            writer.flush().map_err(|e| io_error(&self.path, e))?;
        }
        temp.as_file().sync_all().map_err(|e| io_error(&self.path, e))?;
        temp.persist(&self.path).map_err(|e| io_error(&self.path, e.error))?;
        Ok(())
    }
}

impl ReservationLedger for FileLedger {
    fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction + '_>> {
        let guard = self.lock.lock();
        let exclusive = self.lock_exclusive()?;
        let table = self.load()?;
        Ok(Box::new(FileTransaction {
            ledger: self,
            _guard: guard,
            _exclusive: exclusive,
            table,
            dirty: false,
        }))
    }
}

struct FileTransaction<'a> {
    ledger: &'a FileLedger,
    _guard: MutexGuard<'a, ()>,
    _exclusive: File,
    table: RecordTable,
    dirty: bool,
}

impl LedgerTransaction for FileTransaction<'_> {
    fn find(&self, network: &str, address: Ipv4Addr) -> Option<&ReservationRecord> {
        self.table.get(&(network.to_string(), address))
    }

    fn records(&self, network: &str) -> Vec<&ReservationRecord> {
        self.table
            .values()
            .filter(|record| record.network == network)
            .collect()
    }

    fn insert(&mut self, record: ReservationRecord) -> StoreResult<()> {
        let key = (record.network.clone(), record.address);
        if let Some(existing) = self.table.get(&key) {
            return Err(StoreError::AlreadyReserved {
                network: record.network,
                address: record.address,
                owner: existing.requester.clone(),
            });
        }
        self.table.insert(key, record);
        self.dirty = true;
        Ok(())
    }

    fn delete(&mut self, network: &str, address: Ipv4Addr) -> Option<ReservationRecord> {
        let removed = self.table.remove(&(network.to_string(), address));
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.ledger.store(&self.table)?;
        debug!(
            "Committed ledger {} with {} record(s)",
            self.ledger.path.display(),
            self.table.len()
        );
        Ok(())
    }
}

fn io_error(path: &Path, error: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}
