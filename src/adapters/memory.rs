//! In-memory event log.
//!
//! Keeps every history in a map and answers summary queries by projecting
//! each aggregate on demand. Used by tests and as the reference behavior the
//! SQLite accessor is checked against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::categorization::ProjectionCategories;
use crate::core::error::{AccessorError, FlowError};
use crate::core::projector::SummaryProjector;
use crate::core::query::SummaryQuery;
use crate::domain::{
    log_precision, AggregateKey, Event, EventId, InstanceFlowSummary, PageRequest, SortOrder,
    StoredEvent,
};

use super::{EventLog, IntegrationStatusCounts, StatusCounts, SummaryPage};

#[derive(Debug, Default)]
pub struct MemoryEventLog {
    histories: RwLock<HashMap<AggregateKey, Vec<StoredEvent>>>,
    next_id: AtomicI64,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project every aggregate and keep the ones matching `query`
    async fn matching(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
    ) -> Result<Vec<InstanceFlowSummary>, AccessorError> {
        let histories = self.histories.read().await;
        let projector = SummaryProjector::new(categories);

        let mut summaries = Vec::new();
        for history in histories.values() {
            let summary = match projector.project(history) {
                Ok(Some(summary)) => summary,
                Ok(None) => continue,
                Err(FlowError::UnknownCategory(name)) => {
                    return Err(AccessorError::UnknownEventName(name))
                }
                Err(other) => return Err(AccessorError::Corrupt(other.to_string())),
            };
            if query.matches(&summary, history) {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append_event(&self, mut event: Event) -> Result<EventId, AccessorError> {
        event.timestamp = log_precision(event.timestamp);
        let mut histories = self.histories.write().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let history = histories.entry(event.key.clone()).or_default();
        history.push(StoredEvent { id, event });
        history.sort_by_key(StoredEvent::position);

        Ok(id)
    }

    async fn events_for_aggregate(
        &self,
        key: &AggregateKey,
    ) -> Result<Vec<StoredEvent>, AccessorError> {
        let histories = self.histories.read().await;
        Ok(histories.get(key).cloned().unwrap_or_default())
    }

    async fn query_latest_per_aggregate(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
        page: &PageRequest,
    ) -> Result<SummaryPage, AccessorError> {
        let mut summaries = self.matching(query, categories).await?;

        summaries.sort_by(|a, b| {
            let by_update = match page.sort {
                SortOrder::LatestUpdateDesc => b.latest_update.cmp(&a.latest_update),
                SortOrder::LatestUpdateAsc => a.latest_update.cmp(&b.latest_update),
            };
            by_update.then_with(|| a.key.cmp(&b.key))
        });

        let matched = summaries.len();
        let total = page.include_total.then_some(matched as u64);
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let summaries: Vec<_> = summaries
            .into_iter()
            .skip(offset)
            .take(page.size as usize)
            .collect();
        let has_next = offset.saturating_add(summaries.len()) < matched;

        Ok(SummaryPage {
            summaries,
            has_next,
            total,
        })
    }

    async fn count_grouped_by_status(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
    ) -> Result<StatusCounts, AccessorError> {
        let mut counts = StatusCounts::new();
        for summary in self.matching(query, categories).await? {
            *counts.entry(summary.latest_status_event_name).or_default() += 1;
        }
        Ok(counts)
    }

    async fn count_grouped_by_integration(
        &self,
        query: &SummaryQuery,
        categories: &ProjectionCategories,
    ) -> Result<IntegrationStatusCounts, AccessorError> {
        let mut counts = IntegrationStatusCounts::new();
        for summary in self.matching(query, categories).await? {
            *counts
                .entry(summary.integration_id)
                .or_default()
                .entry(summary.latest_status_event_name)
                .or_default() += 1;
        }
        Ok(counts)
    }
}
