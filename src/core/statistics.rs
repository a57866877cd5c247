//! Folding grouped counts into status buckets.

use std::cmp::Ordering;

use crate::adapters::{IntegrationStatusCounts, StatusCounts};
use crate::domain::{InstanceStatistics, IntegrationStatistics};

use super::categorization::CategorizationService;
use super::error::FlowError;

#[derive(Debug, Clone, Copy)]
pub struct StatisticsAggregator<'a> {
    categorization: &'a CategorizationService,
}

impl<'a> StatisticsAggregator<'a> {
    pub fn new(categorization: &'a CategorizationService) -> Self {
        Self { categorization }
    }

    /// Bucket counts keyed by latest status event name.
    ///
    /// A `None` key (no status event yet) only contributes to `total`.
    pub fn fold(&self, counts: &StatusCounts) -> Result<InstanceStatistics, FlowError> {
        let mut statistics = InstanceStatistics::default();
        for (name, count) in counts {
            let status = match name {
                Some(name) => Some(self.categorization.status_of(name)?),
                None => None,
            };
            statistics.record(status, *count);
        }
        Ok(statistics)
    }

    /// One entry per integration, ordered by integration id with the
    /// unknown integration last
    pub fn fold_per_integration(
        &self,
        counts: &IntegrationStatusCounts,
    ) -> Result<Vec<IntegrationStatistics>, FlowError> {
        let mut per_integration = counts
            .iter()
            .map(|(integration_id, counts)| {
                Ok(IntegrationStatistics {
                    integration_id: *integration_id,
                    statistics: self.fold(counts)?,
                })
            })
            .collect::<Result<Vec<_>, FlowError>>()?;

        per_integration.sort_by(|a, b| match (a.integration_id, b.integration_id) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        Ok(per_integration)
    }
}
