// Marketplace facade: catalog, ledger and rental book behind one handle.
//
// Lock order is catalog, then ledger, then rental book. No path holds the rental book and a
// ledger entry at the same time.

use crate::catalog::{normalize_submission, CatalogImport, SubmissionIds, UserSubmission};
use crate::ledger::{LedgerError, LedgerStatsReport, ReservationLedger, Snapshot};
use crate::query::{search_and_sort, SortKey};
use crate::recommendation::Recommendation;
use crate::rentals::{Rental, RentalBook};
use crate::resource::ResourceRecord;
use crate::source::{CatalogError, CatalogSource};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MarketStats {
    pub listings: usize,
    pub active_rentals: usize,
    pub ledger: LedgerStatsReport,
}

#[derive(Debug, Default)]
pub struct Marketplace {
    catalog: RwLock<Vec<ResourceRecord>>,
    ledger: ReservationLedger,
    rentals: RentalBook,
    submission_ids: SubmissionIds,
}

impl Marketplace {
    pub fn new() -> Self {
        Self::default()
    }

    // Fetch, normalize as one batch, register. Returns how many listings were added.
    pub async fn import(&self, source: &dyn CatalogSource) -> Result<usize, CatalogError> {
        let rows = source.fetch_rows().await?;
        let records = CatalogImport::new().normalize_rows(&rows);
        let added = self.admit(records);
        info!(source = source.name(), rows = rows.len(), added, "imported catalog");
        Ok(added)
    }

    // Sources are fetched concurrently; one that fails is logged and left out
    pub async fn import_all(&self, sources: &[&dyn CatalogSource]) -> usize {
        let results = join_all(sources.iter().map(|source| source.fetch_rows())).await;

        let mut batch = CatalogImport::new();
        let mut records = Vec::new();
        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok(rows) => records.extend(batch.normalize_rows(&rows)),
                Err(e) => warn!(source = source.name(), error = %e, "catalog source failed"),
            }
        }

        let added = self.admit(records);
        info!(sources = sources.len(), added, "imported catalogs");
        added
    }

    fn admit(&self, records: Vec<ResourceRecord>) -> usize {
        let mut catalog = self.catalog.write();
        let mut added = 0;
        for record in records {
            match self.ledger.register(&record) {
                Ok(_) => {
                    catalog.push(record);
                    added += 1;
                }
                Err(e) => warn!(resource_id = %record.id, error = %e, "skipping catalog row"),
            }
        }
        added
    }

    pub fn add_submission(&self, submission: UserSubmission) -> Result<ResourceRecord, LedgerError> {
        if submission.amount_available == 0 {
            return Err(LedgerError::InvalidRequest(
                "a listing needs at least one available unit".to_string(),
            ));
        }

        let record = normalize_submission(&submission, self.submission_ids.next_id());
        let mut catalog = self.catalog.write();
        self.ledger.register(&record)?;
        catalog.push(record.clone());
        info!(resource_id = %record.id, units = record.total_units(), "listing added");
        Ok(record)
    }

    pub fn remove(&self, resource_id: &str) -> Result<ResourceRecord, LedgerError> {
        let mut catalog = self.catalog.write();
        let idx = catalog
            .iter()
            .position(|r| r.id == resource_id)
            .ok_or_else(|| unknown_listing(resource_id))?;
        if self.rentals.has_active_for(resource_id) {
            return Err(LedgerError::InvalidRequest(format!(
                "{} has active rentals",
                resource_id
            )));
        }

        self.ledger.deregister(resource_id);
        info!(resource_id, "listing removed");
        Ok(catalog.remove(idx))
    }

    // Records carry the ledger's current availability, read at call time
    pub fn listings(&self) -> Vec<ResourceRecord> {
        self.catalog
            .read()
            .iter()
            .map(|record| self.with_current_availability(record))
            .collect()
    }

    pub fn get(&self, resource_id: &str) -> Option<ResourceRecord> {
        self.catalog
            .read()
            .iter()
            .find(|r| r.id == resource_id)
            .map(|record| self.with_current_availability(record))
    }

    pub fn browse(&self, term: &str, sort: Option<SortKey>) -> Vec<ResourceRecord> {
        search_and_sort(&self.listings(), term, sort)
    }

    pub fn snapshot(&self, resource_id: &str) -> Option<Snapshot> {
        self.ledger.snapshot(resource_id)
    }

    fn with_current_availability(&self, record: &ResourceRecord) -> ResourceRecord {
        let mut record = record.clone();
        let available = self
            .ledger
            .snapshot(&record.id)
            .map_or(0, |snapshot| snapshot.available_units);
        record.set_available_units(available);
        record
    }

    pub fn rent(&self, resource_id: &str, units: u32) -> Result<Rental, LedgerError> {
        let catalog = self.catalog.read();
        let record = catalog
            .iter()
            .find(|r| r.id == resource_id)
            .ok_or_else(|| unknown_listing(resource_id))?;
        self.open_rental(record, units)
    }

    fn open_rental(&self, record: &ResourceRecord, units: u32) -> Result<Rental, LedgerError> {
        let reservation = self.ledger.reserve(&record.id, units)?;
        let rental = self.rentals.open(record, &reservation);
        info!(rental_id = %rental.rental_id, resource_id = %record.id, units, "rental started");
        Ok(rental)
    }

    pub fn end_rental(&self, rental_id: &str) -> Result<Rental, LedgerError> {
        // Held so the listing can't be removed between closing and releasing
        let _catalog = self.catalog.read();
        let rental = self
            .rentals
            .close(rental_id)
            .ok_or_else(|| LedgerError::InvalidRequest(format!("unknown rental {}", rental_id)))?;
        self.ledger.release(&rental.resource_id, rental.units)?;
        info!(rental_id, resource_id = %rental.resource_id, units = rental.units, "rental ended");
        Ok(rental)
    }

    // Rent the model at `rank` (0 = top pick) from the first listing that can cover `units`
    pub fn rent_recommended(
        &self,
        recommendation: &Recommendation,
        rank: usize,
        units: u32,
    ) -> Result<Rental, LedgerError> {
        let model = recommendation.ranked_model_names.get(rank).ok_or_else(|| {
            LedgerError::InvalidRequest(format!(
                "rank {} is out of range for {} recommended models",
                rank,
                recommendation.ranked_model_names.len()
            ))
        })?;

        let catalog = self.catalog.read();
        let mut last_error = None;
        for record in catalog.iter().filter(|r| r.name.eq_ignore_ascii_case(model)) {
            match self.open_rental(record, units) {
                Ok(rental) => return Ok(rental),
                Err(e @ LedgerError::InsufficientCapacity { .. }) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LedgerError::InvalidRequest(format!("no listing for recommended model {}", model))
        }))
    }

    pub fn rentals(&self) -> Vec<Rental> {
        self.rentals.active()
    }

    pub fn browse_rentals(&self, term: &str, sort: Option<SortKey>) -> Vec<Rental> {
        search_and_sort(&self.rentals.active(), term, sort)
    }

    pub fn total_cost_at(&self, now: DateTime<Utc>) -> f64 {
        self.rentals.total_cost_at(now)
    }

    pub fn stats(&self) -> MarketStats {
        MarketStats {
            listings: self.catalog.read().len(),
            active_rentals: self.rentals.len(),
            ledger: self.ledger.stats(),
        }
    }
}

fn unknown_listing(resource_id: &str) -> LedgerError {
    LedgerError::InvalidRequest(format!("unknown listing {}", resource_id))
}
