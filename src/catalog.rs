// Catalog normalization: untrusted rows and user forms in, canonical records out
use crate::resource::{ResourceRecord, DEFAULT_COMPUTE_UNIT, UNKNOWN_LABEL};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

// Tags given to rows that don't bring their own
pub const IMPORTED_TAGS: [&str; 2] = ["High Efficiency", "Mining Optimized"];
pub const SUBMITTED_TAGS: [&str; 2] = ["User Added", "Custom"];

const HOURS_PER_DAY: f64 = 24.0;

// Field names used by the live catalog feed, each with the snake_case alias we also accept
const ID_KEYS: &[&str] = &["id", "ID"];
const MODEL_KEYS: &[&str] = &["Model", "model", "name"];
const USERNAME_KEYS: &[&str] = &["Username", "username"];
const USER_ID_KEYS: &[&str] = &["User ID", "user_id", "userId"];
const LOCATION_KEYS: &[&str] = &["Location", "location"];
const HASHRATE_KEYS: &[&str] = &["Hashrate (TH/s)", "hashrate"];
const POWER_KEYS: &[&str] = &["Power (W)", "power"];
const EFFICIENCY_KEYS: &[&str] = &["Efficiency (J/TH)", "efficiency"];
const DAILY_PRICE_KEYS: &[&str] = &["Estimated Total Daily Rental Price ($)", "daily_rate"];
const HOURLY_PRICE_KEYS: &[&str] = &["Estimated Hourly Rental Price ($)", "hourly_rate"];
const QUANTITY_KEYS: &[&str] = &["Quantity Available", "quantity", "amount_available"];
const TAG_KEYS: &[&str] = &["Tags", "tags"];

// Form data for a user listing their own machine
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserSubmission {
    pub username: String,
    pub user_id: String,
    pub location: String,
    pub model: String,
    pub hashrate: f64,
    pub power: f64,
    // J/TH as typed on the form
    pub efficiency: f64,
    // Price per TH/s per day
    pub daily_rental_price: f64,
    pub amount_available: u32,
}

// One import batch. Synthetic ids (`asic-001`, `asic-002`, ...) are unique within the batch.
#[derive(Debug, Default)]
pub struct CatalogImport {
    next_seq: u64,
}

impl CatalogImport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize_row(&mut self, row: &Value) -> ResourceRecord {
        self.next_seq += 1;
        let id = text_field(row, ID_KEYS).unwrap_or_else(|| format!("asic-{:03}", self.next_seq));
        normalize_row_with_id(row, id)
    }

    pub fn normalize_rows(&mut self, rows: &[Value]) -> Vec<ResourceRecord> {
        rows.iter().map(|row| self.normalize_row(row)).collect()
    }
}

// Catalog-wide sequence for user submissions, which never carry an id
#[derive(Debug, Default)]
pub struct SubmissionIds {
    next: AtomicU64,
}

impl SubmissionIds {
    pub fn next_id(&self) -> String {
        let seq = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("asic-user-{}", seq)
    }
}

fn normalize_row_with_id(row: &Value, id: String) -> ResourceRecord {
    let hashrate = non_negative(number_field(row, HASHRATE_KEYS));
    let power = number_field(row, POWER_KEYS);
    let daily_rate = non_negative(number_field(row, DAILY_PRICE_KEYS));
    let hourly_rate = match lookup(row, HOURLY_PRICE_KEYS) {
        Some(value) => non_negative(as_number(value)),
        None => daily_rate / HOURS_PER_DAY,
    };
    let quantity = units_field(row, QUANTITY_KEYS);

    let mut record = ResourceRecord::new(id, text_or_unknown(row, MODEL_KEYS), quantity)
        .with_compute(hashrate, DEFAULT_COMPUTE_UNIT)
        .with_rates(hourly_rate, daily_rate)
        .with_owner(text_or_unknown(row, USER_ID_KEYS), text_or_unknown(row, USERNAME_KEYS))
        .with_location(text_or_unknown(row, LOCATION_KEYS));
    record.power_watts = non_negative(power);
    record.efficiency = efficiency(hashrate, power);
    record.rated_efficiency = lookup(row, EFFICIENCY_KEYS).map(as_number).and_then(positive);
    record.tags = tags_field(row).unwrap_or_else(|| IMPORTED_TAGS.iter().map(|t| t.to_string()).collect());

    debug!(id = %record.id, name = %record.name, units = quantity, "normalized catalog row");
    record
}

pub fn normalize_submission(submission: &UserSubmission, id: String) -> ResourceRecord {
    let hashrate = non_negative(submission.hashrate);
    let daily_rate = non_negative(hashrate * submission.daily_rental_price);

    let mut record = ResourceRecord::new(id, or_unknown(&submission.model), submission.amount_available)
        .with_compute(hashrate, DEFAULT_COMPUTE_UNIT)
        .with_rates(daily_rate / HOURS_PER_DAY, daily_rate)
        .with_owner(or_unknown(&submission.user_id), or_unknown(&submission.username))
        .with_location(or_unknown(&submission.location));
    record.power_watts = non_negative(submission.power);
    record.efficiency = efficiency(hashrate, submission.power);
    record.rated_efficiency = positive(submission.efficiency);
    record.tags = SUBMITTED_TAGS.iter().map(|t| t.to_string()).collect();
    record
}

// Compute per kW. Without a usable power figure this is 0, whatever the source claimed.
pub fn efficiency(hashrate: f64, power_watts: f64) -> f64 {
    if hashrate > 0.0 && power_watts.is_finite() && power_watts > 0.0 {
        hashrate / (power_watts / 1000.0)
    } else {
        0.0
    }
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn lookup<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| row.get(*key))
        .find(|value| !value.is_null())
}

fn text_field(row: &Value, keys: &[&str]) -> Option<String> {
    let text = match lookup(row, keys)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn text_or_unknown(row: &Value, keys: &[&str]) -> String {
    text_field(row, keys).unwrap_or_else(|| UNKNOWN_LABEL.to_string())
}

fn or_unknown(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        text.to_string()
    }
}

fn number_field(row: &Value, keys: &[&str]) -> f64 {
    lookup(row, keys).map(as_number).unwrap_or(0.0)
}

fn units_field(row: &Value, keys: &[&str]) -> u32 {
    let units = number_field(row, keys);
    if units.is_finite() && units > 0.0 {
        units.floor().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

fn tags_field(row: &Value) -> Option<Vec<String>> {
    let tags: Vec<String> = match lookup(row, TAG_KEYS)? {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => return None,
    };
    (!tags.is_empty()).then_some(tags)
}

// Lenient numeric coercion: JSON numbers as-is, strings by their leading numeric prefix
// ("104 TH/s" -> 104, "$0.05" -> 0.05). Anything else is 0.
pub fn as_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_leading_number(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn parse_leading_number(text: &str) -> Option<f64> {
    let trimmed = text
        .trim()
        .trim_start_matches(|c: char| matches!(c, '$' | '£' | '€'))
        .trim_start();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, c) in trimmed.char_indices() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            '-' | '+' if i == 0 => {}
            ',' if seen_digit => {}
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    trimmed[..end].replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}
