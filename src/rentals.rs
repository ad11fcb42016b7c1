// Active rentals: what the user currently holds and what it has cost so far
use crate::ledger::Reservation;
use crate::query::Queryable;
use crate::resource::{ComputeRate, ResourceRecord};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rental {
    pub rental_id: String,
    pub resource_id: String,
    pub name: String,
    pub location: String,
    pub owner_id: String,
    pub owner_name: String,
    pub compute_rate: ComputeRate,
    pub hourly_rate: f64,
    pub daily_rate: f64,
    pub units: u32,
    pub started_at: DateTime<Utc>,
}

impl Rental {
    pub fn hours_used_at(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        seconds.max(0.0) / SECONDS_PER_HOUR
    }

    pub fn cost_at(&self, now: DateTime<Utc>) -> f64 {
        self.hours_used_at(now) * self.hourly_rate * self.units as f64
    }

    // What the rental costs per hour across all its units
    pub fn hourly_spend(&self) -> f64 {
        self.hourly_rate * self.units as f64
    }
}

impl Queryable for Rental {
    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.name.as_str(),
            self.resource_id.as_str(),
            self.owner_name.as_str(),
            self.owner_id.as_str(),
            self.location.as_str(),
        ]
    }

    fn price(&self) -> f64 {
        self.hourly_spend()
    }

    fn compute(&self) -> f64 {
        self.compute_rate.magnitude * self.units as f64
    }

    fn rate(&self) -> f64 {
        self.hourly_rate
    }
}

#[derive(Debug, Default)]
pub struct RentalBook {
    rentals: Mutex<Vec<Rental>>,
    next_id: AtomicU64,
}

impl RentalBook {
    pub fn new() -> Self {
        Self::default()
    }

    // Record a reservation the ledger already granted
    pub fn open(&self, record: &ResourceRecord, reservation: &Reservation) -> Rental {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let rental = Rental {
            rental_id: format!("rental-{}", seq),
            resource_id: reservation.resource_id.clone(),
            name: record.name.clone(),
            location: record.location.clone(),
            owner_id: record.owner_id.clone(),
            owner_name: record.owner_name.clone(),
            compute_rate: record.compute_rate.clone(),
            hourly_rate: record.hourly_rate,
            daily_rate: record.daily_rate,
            units: reservation.units_reserved,
            started_at: reservation.timestamp,
        };
        self.rentals.lock().push(rental.clone());
        rental
    }

    pub fn close(&self, rental_id: &str) -> Option<Rental> {
        let mut rentals = self.rentals.lock();
        let idx = rentals.iter().position(|r| r.rental_id == rental_id)?;
        Some(rentals.remove(idx))
    }

    pub fn get(&self, rental_id: &str) -> Option<Rental> {
        self.rentals
            .lock()
            .iter()
            .find(|r| r.rental_id == rental_id)
            .cloned()
    }

    pub fn active(&self) -> Vec<Rental> {
        self.rentals.lock().clone()
    }

    pub fn has_active_for(&self, resource_id: &str) -> bool {
        self.rentals.lock().iter().any(|r| r.resource_id == resource_id)
    }

    pub fn total_cost_at(&self, now: DateTime<Utc>) -> f64 {
        self.rentals.lock().iter().map(|r| r.cost_at(now)).sum()
    }

    pub fn len(&self) -> usize {
        self.rentals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rentals.lock().is_empty()
    }
}
