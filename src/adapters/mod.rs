//! Event log accessors.
//!
//! The durable append-only log lives outside the projection engine. Accessors
//! provide a unified interface to it: appends, ordered history per aggregate,
//! and the "latest per aggregate" relation with grouped counts.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::core::categorization::ProjectionCategories;
use crate::core::error::AccessorError;
use crate::core::query::SummaryQuery;
use crate::domain::{AggregateKey, Event, EventId, InstanceFlowSummary, PageRequest, StoredEvent};

pub use memory::MemoryEventLog;
pub use sqlite::SqliteEventLog;

/// One page of the latest-per-aggregate relation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryPage {
    pub summaries: Vec<InstanceFlowSummary>,

    /// More matches exist past this page
    pub has_next: bool,

    /// Set when the page request asked for it
    pub total: Option<u64>,
}

/// Counts keyed by the latest status event name (`None`: no status event yet)
pub type StatusCounts = HashMap<Option<String>, u64>;

/// Status counts keyed by integration id (`None`: integration unknown)
pub type IntegrationStatusCounts = HashMap<Option<i64>, StatusCounts>;

/// Trait for event log accessors.
///
/// Ordering contract: histories are ascending by `(timestamp, id)` and ids
/// grow in insertion order. Timestamps are kept at microsecond precision
/// ([`log_precision`](crate::domain::log_precision)). Summary pages are ordered by `latestUpdate`
/// (direction per the page request) with ties broken by aggregate key.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Human-readable accessor name
    fn name(&self) -> &str;

    /// Append one event and return its assigned id
    async fn append_event(&self, event: Event) -> Result<EventId, AccessorError>;

    /// Full history of one aggregate
    async fn events_for_aggregate(
        &self,
        key: &AggregateKey,
    ) -> Result<Vec<StoredEvent>, AccessorError>;

    /// Projected summaries matching `query`
    async fn query_latest_per_aggregate(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
        page: &PageRequest,
    ) -> Result<SummaryPage, AccessorError>;

    /// Matching aggregates grouped by latest status event name
    async fn count_grouped_by_status(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
    ) -> Result<StatusCounts, AccessorError>;

    /// Matching aggregates grouped by integration, then latest status event name
    async fn count_grouped_by_integration(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
    ) -> Result<IntegrationStatusCounts, AccessorError>;
}
