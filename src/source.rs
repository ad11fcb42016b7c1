// Where catalog rows come from. The live feed is authoritative; fixtures and files plug into
// the same trait so the marketplace only ever has one import path.

use crate::client::{ApiError, ClientConfig, ClientError, HttpTransport};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

pub const CATALOG_PATH: &str = "asic-data";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Catalog source error: {0}")]
    SourceError(String),

    #[error(transparent)]
    Transport(#[from] ApiError),
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    // Used in logs
    fn name(&self) -> &str;

    async fn fetch_rows(&self) -> Result<Vec<Value>, CatalogError>;
}

// Fixture rows held in memory; also the demo fallback when the live feed is down
#[derive(Debug, Clone)]
pub struct StaticCatalogSource {
    name: String,
    rows: Vec<Value>,
}

impl StaticCatalogSource {
    pub fn new(name: impl Into<String>, rows: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn from_text(name: impl Into<String>, text: &str) -> Result<Self, CatalogError> {
        Ok(Self::new(name, parse_rows(text)?))
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rows(&self) -> Result<Vec<Value>, CatalogError> {
        Ok(self.rows.clone())
    }
}

// JSON-lines (or JSON array) file on disk, re-read on every fetch
#[derive(Debug, Clone)]
pub struct FileCatalogSource {
    name: String,
    path: PathBuf,
}

impl FileCatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
        }
    }
}

#[async_trait]
impl CatalogSource for FileCatalogSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rows(&self) -> Result<Vec<Value>, CatalogError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let rows = parse_rows(&text)?;
        info!(source = %self.name, rows = rows.len(), "read catalog file");
        Ok(rows)
    }
}

// The live feed: GET {base_url}/asic-data returning a JSON array of rows
pub struct HttpCatalogSource {
    name: String,
    transport: HttpTransport,
}

impl HttpCatalogSource {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let name = config.base_url.clone();
        Ok(Self {
            name,
            transport: HttpTransport::new(config)?,
        })
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rows(&self) -> Result<Vec<Value>, CatalogError> {
        let body: Value = self.transport.get_json(CATALOG_PATH).await?;
        match body {
            Value::Array(rows) => {
                info!(source = %self.name, rows = rows.len(), "fetched live catalog");
                Ok(rows)
            }
            Value::Object(ref fields) => match fields.get("error").and_then(Value::as_str) {
                Some(message) => Err(CatalogError::SourceError(message.to_string())),
                None => Err(CatalogError::InvalidFormat(
                    "expected an array of catalog rows".to_string(),
                )),
            },
            _ => Err(CatalogError::InvalidFormat(
                "expected an array of catalog rows".to_string(),
            )),
        }
    }
}

// Accepts a JSON array or one JSON object per line. Bad lines are skipped, not fatal.
pub fn parse_rows(text: &str) -> Result<Vec<Value>, CatalogError> {
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<Value>>(trimmed)
            .map_err(|e| CatalogError::InvalidFormat(e.to_string()));
    }

    let mut rows = Vec::new();
    for (line_no, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(row) => rows.push(row),
            Err(e) => warn!(line = line_no + 1, error = %e, "skipping malformed catalog line"),
        }
    }
    Ok(rows)
}
