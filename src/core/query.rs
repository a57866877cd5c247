//! Translation of a validated [`Filter`] into a store-agnostic predicate.
//!
//! The builder resolves everything that depends on the catalog or the clock
//! (status to event names, active periods to instants) so that accessors only
//! compare names, ids and instants. Every populated field is AND-ed.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::domain::{InstanceFlowSummary, StorageStatus, StoredEvent};

use super::categorization::CategorizationService;
use super::filter::{Filter, StatusFilter, TimeRange};

/// Constraint on the latest storage-bearing event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConstraint {
    /// Accepted latest storage status event names
    pub event_names: BTreeSet<&'static str>,

    /// Also accept instances without any storage event
    pub include_never_stored: bool,
}

impl StorageConstraint {
    pub fn accepts(&self, latest_storage_event: Option<&str>) -> bool {
        match latest_storage_event {
            Some(name) => self.event_names.contains(name),
            None => self.include_never_stored,
        }
    }
}

/// Resolved predicate over the latest-per-aggregate relation.
///
/// `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryQuery {
    /// Bounds on `latestUpdate`
    pub latest_update: TimeRange,
    pub source_application_ids: Option<BTreeSet<i64>>,
    pub source_application_integration_ids: Option<BTreeSet<String>>,
    pub source_application_instance_ids: Option<BTreeSet<String>>,
    pub integration_ids: Option<BTreeSet<i64>>,
    pub latest_status_event_names: Option<BTreeSet<&'static str>>,
    pub latest_storage_status: Option<StorageConstraint>,
    /// The instance has at least one event with one of these names
    pub associated_event_names: Option<BTreeSet<&'static str>>,
    /// Any of these ids appears in the full destination history
    pub destination_instance_ids: Option<BTreeSet<String>>,
}

impl SummaryQuery {
    /// Evaluate against a projected summary and the history it came from
    pub fn matches(&self, summary: &InstanceFlowSummary, history: &[StoredEvent]) -> bool {
        let key = &summary.key;

        self.latest_update.contains(summary.latest_update)
            && contains(&self.source_application_ids, &key.source_application_id)
            && contains(
                &self.source_application_integration_ids,
                &key.source_application_integration_id,
            )
            && contains(
                &self.source_application_instance_ids,
                &key.source_application_instance_id,
            )
            && self
                .integration_ids
                .as_ref()
                .map_or(true, |ids| summary.integration_id.is_some_and(|id| ids.contains(&id)))
            && self.latest_status_event_names.as_ref().map_or(true, |names| {
                summary
                    .latest_status_event_name
                    .as_deref()
                    .is_some_and(|name| names.contains(name))
            })
            && self.latest_storage_status.as_ref().map_or(true, |constraint| {
                constraint.accepts(summary.latest_storage_status_event_name.as_deref())
            })
            && self.associated_event_names.as_ref().map_or(true, |names| {
                history.iter().any(|e| names.contains(e.event.name.as_str()))
            })
            && self.destination_instance_ids.as_ref().map_or(true, |ids| {
                summary.destination_instance_ids.iter().any(|id| ids.contains(id))
            })
    }
}

fn contains<T: Ord>(set: &Option<BTreeSet<T>>, value: &T) -> bool {
    set.as_ref().map_or(true, |set| set.contains(value))
}

/// Builds [`SummaryQuery`] values from validated filters
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    categorization: &'a CategorizationService,
    default_time_zone: Tz,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(categorization: &'a CategorizationService, default_time_zone: Tz) -> Self {
        Self {
            categorization,
            default_time_zone,
        }
    }

    pub fn build(&self, filter: &Filter, now: DateTime<Utc>) -> SummaryQuery {
        let tz = filter.time_zone.unwrap_or(self.default_time_zone);

        let latest_status_event_names = filter.status.as_ref().map(|status| match status {
            StatusFilter::Statuses(statuses) => {
                self.categorization.event_names_for_statuses(statuses)
            }
            StatusFilter::LatestStatusEvents(names) => names.clone(),
        });

        let latest_storage_status = filter.storage_statuses.as_ref().map(|statuses| {
            StorageConstraint {
                event_names: self.categorization.event_names_for_storage_statuses(statuses),
                include_never_stored: statuses.contains(&StorageStatus::NeverStored),
            }
        });

        SummaryQuery {
            latest_update: filter
                .time
                .map(|time| time.resolve(now, tz))
                .unwrap_or_default(),
            source_application_ids: filter.source_application_ids.clone(),
            source_application_integration_ids: filter.source_application_integration_ids.clone(),
            source_application_instance_ids: filter.source_application_instance_ids.clone(),
            integration_ids: filter.integration_ids.clone(),
            latest_status_event_names,
            latest_storage_status,
            associated_event_names: filter.associated_events.clone(),
            destination_instance_ids: filter.destination_ids.clone(),
        }
    }
}
