// Search and sort over catalog listings and rentals. Pure functions; inputs are never touched.
use crate::resource::ResourceRecord;
use std::cmp::Ordering;

// What the query engine needs to know about a row
pub trait Queryable {
    // Text fields the search term is matched against
    fn search_fields(&self) -> Vec<&str>;
    fn price(&self) -> f64;
    fn compute(&self) -> f64;
    fn rate(&self) -> f64;
}

impl Queryable for ResourceRecord {
    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.name.as_str(),
            self.id.as_str(),
            self.owner_name.as_str(),
            self.owner_id.as_str(),
            self.location.as_str(),
        ]
    }

    fn price(&self) -> f64 {
        self.daily_rate
    }

    fn compute(&self) -> f64 {
        self.compute_rate.magnitude
    }

    fn rate(&self) -> f64 {
        self.hourly_rate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Price,
    Compute,
    Rate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

impl SortKey {
    pub const PRICE_ASC: SortKey = SortKey::asc(SortField::Price);
    pub const PRICE_DESC: SortKey = SortKey::desc(SortField::Price);
    pub const COMPUTE_ASC: SortKey = SortKey::asc(SortField::Compute);
    pub const COMPUTE_DESC: SortKey = SortKey::desc(SortField::Compute);
    pub const RATE_ASC: SortKey = SortKey::asc(SortField::Rate);
    pub const RATE_DESC: SortKey = SortKey::desc(SortField::Rate);

    pub const fn asc(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub const fn desc(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    // "price-asc", "compute-desc", ... plus the older "price-low" / "hashrate-high" spellings.
    // Anything unrecognised is None, which sorts as identity.
    pub fn parse(key: &str) -> Option<SortKey> {
        let key = key.trim().to_ascii_lowercase();
        let (field, direction) = key.rsplit_once('-')?;
        let field = match field {
            "price" => SortField::Price,
            "compute" | "hashrate" => SortField::Compute,
            "rate" => SortField::Rate,
            _ => return None,
        };
        match direction {
            "asc" | "low" => Some(SortKey::asc(field)),
            "desc" | "high" => Some(SortKey::desc(field)),
            _ => None,
        }
    }

    fn value<T: Queryable>(&self, item: &T) -> f64 {
        match self.field {
            SortField::Price => item.price(),
            SortField::Compute => item.compute(),
            SortField::Rate => item.rate(),
        }
    }

    fn compare<T: Queryable>(&self, a: &T, b: &T) -> Ordering {
        let ordering = self.value(a).total_cmp(&self.value(b));
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

// Case-insensitive substring match on any search field; a blank term keeps everything
pub fn search<T: Queryable + Clone>(items: &[T], term: &str) -> Vec<T> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return items.to_vec();
    }

    items
        .iter()
        .filter(|item| {
            item.search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&term))
        })
        .cloned()
        .collect()
}

// Stable, so ties keep their input order
pub fn sort<T: Queryable + Clone>(items: &[T], key: Option<SortKey>) -> Vec<T> {
    let mut sorted = items.to_vec();
    if let Some(key) = key {
        sorted.sort_by(|a, b| key.compare(a, b));
    }
    sorted
}

pub fn search_and_sort<T: Queryable + Clone>(items: &[T], term: &str, key: Option<SortKey>) -> Vec<T> {
    sort(&search(items, term), key)
}
