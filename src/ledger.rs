// Reservation ledger: the single owner of every resource's unit counters.
// All rent, add and release paths go through here.

use crate::resource::ResourceRecord;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient capacity for {resource_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        resource_id: String,
        requested: u32,
        available: u32,
    },
}

// A successful claim on units of one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub resource_id: String,
    pub units_reserved: u32,
    pub timestamp: DateTime<Utc>,
}

// Read-only view handed to presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub available_units: u32,
    pub total_units: u32,
}

impl Snapshot {
    pub fn is_available(&self) -> bool {
        self.available_units > 0
    }
}

#[derive(Debug, Clone, Copy)]
struct UnitCounter {
    total: u32,
    available: u32,
}

// Running counters for the ledger
#[derive(Debug, Default)]
pub struct LedgerStats {
    pub reservations_granted: AtomicUsize,
    pub reservations_rejected: AtomicUsize,
    pub releases: AtomicUsize,
    pub units_reserved: AtomicU64,
    pub units_released: AtomicU64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LedgerStatsReport {
    pub resources: usize,
    pub reservations_granted: usize,
    pub reservations_rejected: usize,
    pub releases: usize,
    pub units_reserved: u64,
    pub units_released: u64,
}

#[derive(Debug, Default)]
pub struct ReservationLedger {
    counters: DashMap<String, UnitCounter>,
    stats: LedgerStats,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // Start tracking a record's counters. The record's current availability is taken as the
    // opening balance.
    pub fn register(&self, record: &ResourceRecord) -> Result<Snapshot, LedgerError> {
        match self.counters.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(LedgerError::InvalidRequest(format!(
                "resource {} is already registered",
                record.id
            ))),
            Entry::Vacant(slot) => {
                let counter = UnitCounter {
                    total: record.total_units(),
                    available: record.available_units().min(record.total_units()),
                };
                slot.insert(counter);
                debug!(resource_id = %record.id, total = counter.total, "registered resource");
                Ok(Snapshot {
                    available_units: counter.available,
                    total_units: counter.total,
                })
            }
        }
    }

    pub fn deregister(&self, resource_id: &str) -> Option<Snapshot> {
        self.counters.remove(resource_id).map(|(_, counter)| {
            info!(resource_id, "deregistered resource");
            Snapshot {
                available_units: counter.available,
                total_units: counter.total,
            }
        })
    }

    // The shard lock is held from the capacity check to the decrement, so two callers can
    // never both see enough units.
    pub fn reserve(&self, resource_id: &str, units: u32) -> Result<Reservation, LedgerError> {
        if units == 0 {
            self.stats.reservations_rejected.fetch_add(1, Ordering::SeqCst);
            return Err(LedgerError::InvalidRequest(
                "units to reserve must be positive".to_string(),
            ));
        }

        let mut counter = match self.counters.get_mut(resource_id) {
            Some(counter) => counter,
            None => {
                self.stats.reservations_rejected.fetch_add(1, Ordering::SeqCst);
                return Err(unknown_resource(resource_id));
            }
        };

        if units > counter.available {
            self.stats.reservations_rejected.fetch_add(1, Ordering::SeqCst);
            warn!(
                resource_id,
                requested = units,
                available = counter.available,
                "reservation rejected"
            );
            return Err(LedgerError::InsufficientCapacity {
                resource_id: resource_id.to_string(),
                requested: units,
                available: counter.available,
            });
        }

        counter.available -= units;
        let remaining = counter.available;
        drop(counter);

        self.stats.reservations_granted.fetch_add(1, Ordering::SeqCst);
        self.stats
            .units_reserved
            .fetch_add(units as u64, Ordering::SeqCst);
        info!(resource_id, units, remaining, "units reserved");

        Ok(Reservation {
            resource_id: resource_id.to_string(),
            units_reserved: units,
            timestamp: Utc::now(),
        })
    }

    pub fn release(&self, resource_id: &str, units: u32) -> Result<Snapshot, LedgerError> {
        if units == 0 {
            return Err(LedgerError::InvalidRequest(
                "units to release must be positive".to_string(),
            ));
        }

        let mut counter = self
            .counters
            .get_mut(resource_id)
            .ok_or_else(|| unknown_resource(resource_id))?;

        let restored = counter
            .available
            .checked_add(units)
            .filter(|restored| *restored <= counter.total)
            .ok_or_else(|| {
                LedgerError::InvalidRequest(format!(
                    "releasing {} units would exceed the {} units of {}",
                    units, counter.total, resource_id
                ))
            })?;

        counter.available = restored;
        let snapshot = Snapshot {
            available_units: counter.available,
            total_units: counter.total,
        };
        drop(counter);

        self.stats.releases.fetch_add(1, Ordering::SeqCst);
        self.stats
            .units_released
            .fetch_add(units as u64, Ordering::SeqCst);
        info!(resource_id, units, available = snapshot.available_units, "units released");

        Ok(snapshot)
    }

    pub fn snapshot(&self, resource_id: &str) -> Option<Snapshot> {
        self.counters.get(resource_id).map(|counter| Snapshot {
            available_units: counter.available,
            total_units: counter.total,
        })
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        self.counters.contains_key(resource_id)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn stats(&self) -> LedgerStatsReport {
        LedgerStatsReport {
            resources: self.counters.len(),
            reservations_granted: self.stats.reservations_granted.load(Ordering::SeqCst),
            reservations_rejected: self.stats.reservations_rejected.load(Ordering::SeqCst),
            releases: self.stats.releases.load(Ordering::SeqCst),
            units_reserved: self.stats.units_reserved.load(Ordering::SeqCst),
            units_released: self.stats.units_released.load(Ordering::SeqCst),
        }
    }
}

fn unknown_resource(resource_id: &str) -> LedgerError {
    LedgerError::InvalidRequest(format!("unknown resource {}", resource_id))
}
