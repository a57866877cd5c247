//! Upward-facing operations over the event log.
//!
//! Requests are validated in full before the store is touched. Every accessor
//! call runs under the configured query timeout, and accessor failures are
//! passed upward unchanged: no retries, no partial results.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, instrument, warn};

use crate::adapters::EventLog;
use crate::domain::{
    log_precision, AggregateKey, Event, EventId, InstanceFlowSummary, InstanceStatistics,
    IntegrationStatistics, PageRequest, Slice, StoredEvent,
};

use super::categorization::CategorizationService;
use super::error::{AccessorError, FlowError, ValidationError, Violations};
use super::filter::{Filter, FilterRequest};
use super::projector::SummaryProjector;
use super::query::{QueryBuilder, SummaryQuery};
use super::statistics::StatisticsAggregator;

/// Query behavior knobs, usually taken from the resolved configuration
#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
    /// Zone used for period filters without an explicit `timeZone`
    pub time_zone: Tz,
    pub timeout: Duration,
    pub max_page_size: u32,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            time_zone: chrono_tz::Europe::Oslo,
            timeout: Duration::from_secs(30),
            max_page_size: 500,
        }
    }
}

/// Source of "now" for resolving relative time filters
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct FlowService {
    log: Arc<dyn EventLog>,
    categorization: &'static CategorizationService,
    settings: QuerySettings,
    clock: Clock,
}

impl FlowService {
    pub fn new(log: Arc<dyn EventLog>, settings: QuerySettings) -> Self {
        Self {
            log,
            categorization: CategorizationService::global(),
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, e.g. to pin "today" in tests
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    pub fn categorization(&self) -> &'static CategorizationService {
        self.categorization
    }

    /// Validate a raw filter against the catalog
    pub fn validate(&self, request: FilterRequest) -> Result<Filter, ValidationError> {
        Filter::from_request(request, self.categorization)
    }

    /// Filtered, paged summaries ordered by latest update
    #[instrument(skip(self, request), fields(page = page.page, size = page.size))]
    pub async fn get_summaries(
        &self,
        request: FilterRequest,
        page: PageRequest,
    ) -> Result<Slice<InstanceFlowSummary>, FlowError> {
        let filter = self.validate_with_page(request, Some(&page))?;
        let query = self.build_query(&filter);
        let categories = self.categorization.projection_categories();

        let result = self
            .call("query_latest_per_aggregate", || {
                self.log.query_latest_per_aggregate(&query, categories, &page)
            })
            .await?;
        debug!(count = result.summaries.len(), "Fetched summaries");

        Ok(Slice {
            content: result.summaries,
            page: page.page,
            size: page.size,
            total_elements: result.total,
            has_next: result.has_next,
        })
    }

    /// Current state of one instance, `None` if it has no events
    #[instrument(skip(self), fields(aggregate = %key))]
    pub async fn get_summary(
        &self,
        key: &AggregateKey,
    ) -> Result<Option<InstanceFlowSummary>, FlowError> {
        let history = self.get_events(key).await?;
        SummaryProjector::new(self.categorization.projection_categories()).project(&history)
    }

    /// Status bucket counts over every matching instance
    #[instrument(skip(self, request))]
    pub async fn get_statistics(
        &self,
        request: FilterRequest,
    ) -> Result<InstanceStatistics, FlowError> {
        let filter = self.validate_with_page(request, None)?;
        let query = self.build_query(&filter);
        let categories = self.categorization.projection_categories();

        let counts = self
            .call("count_grouped_by_status", || {
                self.log.count_grouped_by_status(&query, categories)
            })
            .await?;
        StatisticsAggregator::new(self.categorization).fold(&counts)
    }

    /// Status bucket counts per integration, ordered by integration id
    #[instrument(skip(self, request), fields(page = page.page, size = page.size))]
    pub async fn get_integration_statistics(
        &self,
        request: FilterRequest,
        page: PageRequest,
    ) -> Result<Slice<IntegrationStatistics>, FlowError> {
        let filter = self.validate_with_page(request, Some(&page))?;
        let query = self.build_query(&filter);
        let categories = self.categorization.projection_categories();

        let counts = self
            .call("count_grouped_by_integration", || {
                self.log.count_grouped_by_integration(&query, categories)
            })
            .await?;
        let per_integration =
            StatisticsAggregator::new(self.categorization).fold_per_integration(&counts)?;
        Ok(Slice::from_vec(per_integration, &page))
    }

    /// Full history of one instance, oldest first
    #[instrument(skip(self), fields(aggregate = %key))]
    pub async fn get_events(&self, key: &AggregateKey) -> Result<Vec<StoredEvent>, FlowError> {
        let history = self
            .call("events_for_aggregate", || self.log.events_for_aggregate(key))
            .await?;
        Ok(history)
    }

    /// Append an event. The name must be in the catalog.
    #[instrument(skip(self, event), fields(aggregate = %event.key, event_name = %event.name))]
    pub async fn append_event(&self, mut event: Event) -> Result<EventId, FlowError> {
        self.categorization.category_of(&event.name)?;
        event.timestamp = log_precision(event.timestamp);
        let id = self
            .call("append_event", || self.log.append_event(event))
            .await?;
        debug!(event_id = id, "Appended event");
        Ok(id)
    }

    fn validate_with_page(
        &self,
        request: FilterRequest,
        page: Option<&PageRequest>,
    ) -> Result<Filter, ValidationError> {
        let mut violations = Violations::default();
        if let Some(page) = page {
            if page.size == 0 || page.size > self.settings.max_page_size {
                violations.push(
                    "page.size",
                    format!("must be between 1 and {}", self.settings.max_page_size),
                );
            }
        }

        match self.validate(request) {
            Ok(filter) => violations.into_result(filter),
            Err(mut err) => {
                if let Err(page_err) = violations.into_result(()) {
                    err.violations.extend(page_err.violations);
                }
                Err(err)
            }
        }
    }

    fn build_query(&self, filter: &Filter) -> SummaryQuery {
        QueryBuilder::new(self.categorization, self.settings.time_zone)
            .build(filter, (self.clock)())
    }

    /// Run one accessor call under the query timeout
    async fn call<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AccessorError>>,
    {
        let outcome = match tokio::time::timeout(self.settings.timeout, f()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AccessorError::Timeout(self.settings.timeout)),
        };

        outcome.map_err(|err| {
            if let AccessorError::UnknownEventName(ref name) = err {
                error!(
                    operation,
                    accessor = self.log.name(),
                    event_name = %name,
                    "Event log holds an event missing from category catalog"
                );
            } else {
                warn!(operation, accessor = self.log.name(), error = %err, "Event log call failed");
            }
            FlowError::from(err)
        })
    }
}
