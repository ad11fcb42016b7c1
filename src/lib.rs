// Core of the ASIC rental marketplace: catalog, reservation ledger, rentals and the
// recommendation assistant.

pub mod assistant;
pub mod catalog;
pub mod client;
pub mod ledger;
pub mod market;
pub mod query;
pub mod recommendation;
pub mod rentals;
pub mod resource;
pub mod source;

// Re-export key types for convenience
pub use assistant::{
    AssistantError, AssistantService, ChatMessage, ChatRequest, Conversation,
    HttpAssistantClient, ScriptedAssistant, Speaker,
};
pub use catalog::{CatalogImport, UserSubmission};
pub use client::{ApiError, ClientConfig, ClientError, RetryConfig};
pub use ledger::{LedgerError, LedgerStatsReport, Reservation, ReservationLedger, Snapshot};
pub use market::{MarketStats, Marketplace};
pub use query::{search, search_and_sort, sort, Queryable, SortField, SortKey};
pub use recommendation::{
    extract, parse_reply, AssistantReply, ModelMetrics, Recommendation, ReplyContent,
};
pub use rentals::{Rental, RentalBook};
pub use resource::{ComputeRate, ResourceRecord};
pub use source::{
    CatalogError, CatalogSource, FileCatalogSource, HttpCatalogSource, StaticCatalogSource,
};
