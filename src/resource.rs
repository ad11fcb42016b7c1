// Canonical resource record shared by the catalog, the ledger and the query views
use serde::{Deserialize, Serialize};

// Label used for any descriptive field the source left empty
pub const UNKNOWN_LABEL: &str = "Unknown";

// Unit label assumed when a source gives a bare hashrate number
pub const DEFAULT_COMPUTE_UNIT: &str = "TH/s";

// Throughput of one unit, kept as magnitude + unit so nobody has to re-parse "100 TH/s".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRate {
    pub magnitude: f64,
    pub unit: String,
}

impl ComputeRate {
    pub fn new(magnitude: f64, unit: impl Into<String>) -> Self {
        Self {
            magnitude,
            unit: unit.into(),
        }
    }
}

impl Default for ComputeRate {
    fn default() -> Self {
        Self::new(0.0, DEFAULT_COMPUTE_UNIT)
    }
}

impl std::fmt::Display for ComputeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}

// A rentable ASIC system type. `available_units` is only ever written by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResourceRecordData")]
pub struct ResourceRecord {
    pub id: String,
    pub name: String,
    pub location: String,
    pub owner_id: String,
    pub owner_name: String,
    pub compute_rate: ComputeRate,
    pub power_watts: f64,
    // Compute per kW, derived from hashrate and power; 0 without a power figure
    pub efficiency: f64,
    // J/TH as stated by the source, never used for derived values
    pub rated_efficiency: Option<f64>,
    pub hourly_rate: f64,
    pub daily_rate: f64,
    pub tags: Vec<String>,
    total_units: u32,
    available_units: u32,
}

impl ResourceRecord {
    // Fresh record with every unit available
    pub fn new(id: impl Into<String>, name: impl Into<String>, total_units: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: UNKNOWN_LABEL.to_string(),
            owner_id: UNKNOWN_LABEL.to_string(),
            owner_name: UNKNOWN_LABEL.to_string(),
            compute_rate: ComputeRate::default(),
            power_watts: 0.0,
            efficiency: 0.0,
            rated_efficiency: None,
            hourly_rate: 0.0,
            daily_rate: 0.0,
            tags: Vec::new(),
            total_units,
            available_units: total_units,
        }
    }

    pub fn total_units(&self) -> u32 {
        self.total_units
    }

    pub fn available_units(&self) -> u32 {
        self.available_units
    }

    // Derived on read so it can never disagree with the counter
    pub fn is_available(&self) -> bool {
        self.available_units > 0
    }

    pub(crate) fn set_available_units(&mut self, available_units: u32) {
        self.available_units = available_units.min(self.total_units);
    }

    // Builder-style helpers used by the catalog and by tests
    pub fn with_compute(mut self, magnitude: f64, unit: impl Into<String>) -> Self {
        self.compute_rate = ComputeRate::new(magnitude, unit);
        self
    }

    pub fn with_rates(mut self, hourly_rate: f64, daily_rate: f64) -> Self {
        self.hourly_rate = hourly_rate;
        self.daily_rate = daily_rate;
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>, owner_name: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self.owner_name = owner_name.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

// Wire shape of a record; the unit bound is checked before a ResourceRecord exists
#[derive(Deserialize)]
struct ResourceRecordData {
    id: String,
    name: String,
    location: String,
    owner_id: String,
    owner_name: String,
    compute_rate: ComputeRate,
    power_watts: f64,
    efficiency: f64,
    #[serde(default)]
    rated_efficiency: Option<f64>,
    hourly_rate: f64,
    daily_rate: f64,
    #[serde(default)]
    tags: Vec<String>,
    total_units: u32,
    available_units: u32,
}

impl TryFrom<ResourceRecordData> for ResourceRecord {
    type Error = String;

    fn try_from(data: ResourceRecordData) -> Result<Self, Self::Error> {
        if data.available_units > data.total_units {
            return Err(format!(
                "{} has {} available units but only {} in total",
                data.id, data.available_units, data.total_units
            ));
        }
        Ok(Self {
            id: data.id,
            name: data.name,
            location: data.location,
            owner_id: data.owner_id,
            owner_name: data.owner_name,
            compute_rate: data.compute_rate,
            power_watts: data.power_watts,
            efficiency: data.efficiency,
            rated_efficiency: data.rated_efficiency,
            hourly_rate: data.hourly_rate,
            daily_rate: data.daily_rate,
            tags: data.tags,
            total_units: data.total_units,
            available_units: data.available_units,
        })
    }
}
