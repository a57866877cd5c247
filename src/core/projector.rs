//! Projection of an event history into an [`InstanceFlowSummary`].
//!
//! The projection is a pure fold. "Latest" always means the greatest
//! `(timestamp, id)` pair, so the result does not depend on the order in
//! which the events are handed in.

use std::collections::BTreeSet;

use tracing::error;

use crate::domain::{InstanceFlowSummary, StoredEvent};

use super::categorization::{CategorizationService, ProjectionCategories};
use super::error::FlowError;

/// Derives per-instance state from ordered event histories
#[derive(Debug, Clone, Copy)]
pub struct SummaryProjector<'a> {
    categories: &'a ProjectionCategories,
}

impl Default for SummaryProjector<'static> {
    fn default() -> Self {
        Self::new(CategorizationService::global().projection_categories())
    }
}

impl<'a> SummaryProjector<'a> {
    pub fn new(categories: &'a ProjectionCategories) -> Self {
        Self { categories }
    }

    /// Project the events of one aggregate.
    ///
    /// Returns `Ok(None)` for an empty history. Every event name must resolve
    /// in the catalog; an unknown name fails the whole projection.
    pub fn project(&self, events: &[StoredEvent]) -> Result<Option<InstanceFlowSummary>, FlowError> {
        let mut latest: Option<&StoredEvent> = None;
        let mut latest_status: Option<&StoredEvent> = None;
        let mut latest_storage: Option<&StoredEvent> = None;
        let mut latest_with_instance: Option<&StoredEvent> = None;
        let mut latest_with_integration: Option<&StoredEvent> = None;
        let mut destination_instance_ids = BTreeSet::new();

        for stored in events {
            let name = stored.event.name.as_str();
            if !self.categories.known_event_names.contains(name) {
                error!(
                    event_id = stored.id,
                    event_name = %name,
                    aggregate = %stored.event.key,
                    "Event name missing from category catalog"
                );
                return Err(FlowError::UnknownCategory(name.to_string()));
            }

            keep_latest(&mut latest, stored);
            if self.categories.status_event_names.contains(name) {
                keep_latest(&mut latest_status, stored);
            }
            if self.categories.storage_event_names.contains(name) {
                keep_latest(&mut latest_storage, stored);
            }
            if stored.event.flow_headers.instance_id.is_some() {
                keep_latest(&mut latest_with_instance, stored);
            }
            if stored.event.flow_headers.integration_id.is_some() {
                keep_latest(&mut latest_with_integration, stored);
            }
            if self.categories.dispatch_event_names.contains(name) {
                if let Some(ref destination) = stored.event.flow_headers.destination_instance_id {
                    destination_instance_ids.insert(destination.clone());
                }
            }
        }

        let Some(latest) = latest else {
            return Ok(None);
        };

        Ok(Some(InstanceFlowSummary {
            key: latest.event.key.clone(),
            integration_id: latest_with_integration.and_then(|e| e.event.flow_headers.integration_id),
            latest_instance_id: latest_with_instance.and_then(|e| e.event.flow_headers.instance_id),
            latest_event_id: latest.id,
            latest_update: latest.event.timestamp,
            latest_status_event_name: latest_status.map(|e| e.event.name.clone()),
            latest_storage_status_event_name: latest_storage.map(|e| e.event.name.clone()),
            destination_instance_ids,
        }))
    }
}

fn keep_latest<'e>(slot: &mut Option<&'e StoredEvent>, candidate: &'e StoredEvent) {
    match slot {
        Some(current) if current.position() >= candidate.position() => {}
        _ => *slot = Some(candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::category::*;
    use crate::domain::{AggregateKey, Event, EventKind, FlowHeaders};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn stored(id: i64, name: &str, at: DateTime<Utc>) -> StoredEvent {
        let kind = if name.ends_with("-error") {
            EventKind::Error
        } else {
            EventKind::Info
        };
        StoredEvent {
            id,
            event: Event::new(AggregateKey::new(1, "INT-1", "a-1"), name, kind, "test").at(at),
        }
    }

    fn project(events: &[StoredEvent]) -> InstanceFlowSummary {
        SummaryProjector::default().project(events).unwrap().unwrap()
    }

    #[test]
    fn test_empty_history_has_no_summary() {
        assert_eq!(SummaryProjector::default().project(&[]).unwrap(), None);
    }

    #[test]
    fn test_retry_after_dispatch_error() {
        let events = vec![
            stored(1, INSTANCE_RECEIVED, t(1)),
            stored(2, INSTANCE_MAPPED, t(2)),
            stored(3, INSTANCE_DISPATCHED, t(3)).with_destination("D1"),
            stored(4, INSTANCE_DISPATCHING_ERROR, t(4)),
            stored(5, INSTANCE_DISPATCHED, t(5)).with_destination("D2"),
        ];

        let summary = project(&events);
        assert_eq!(summary.latest_status_event_name.as_deref(), Some(INSTANCE_DISPATCHED));
        assert_eq!(summary.latest_update, t(5));
        assert_eq!(summary.latest_event_id, 5);
        assert_eq!(
            summary.destination_instance_ids.into_iter().collect::<Vec<_>>(),
            vec!["D1".to_string(), "D2".to_string()]
        );
    }

    #[test]
    fn test_storage_event_does_not_move_status() {
        let events = vec![
            stored(1, INSTANCE_RECEIVED, t(1)),
            stored(2, INSTANCE_REGISTERED, t(2)),
            stored(3, INSTANCE_DISPATCHED, t(3)),
            stored(4, INSTANCE_DELETED, t(4)),
        ];

        let summary = project(&events);
        assert_eq!(summary.latest_status_event_name.as_deref(), Some(INSTANCE_DISPATCHED));
        assert_eq!(summary.latest_storage_status_event_name.as_deref(), Some(INSTANCE_DELETED));
        assert_eq!(summary.latest_update, t(4));
    }

    #[test]
    fn test_equal_timestamps_higher_id_wins() {
        let events = vec![
            stored(10, INSTANCE_MAPPING_ERROR, t(1)),
            stored(11, INSTANCE_MAPPED, t(1)),
        ];
        let summary = project(&events);
        assert_eq!(summary.latest_status_event_name.as_deref(), Some(INSTANCE_MAPPED));
        assert_eq!(summary.latest_event_id, 11);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let events = vec![
            stored(1, INSTANCE_RECEIVED, t(1)),
            stored(2, INSTANCE_REGISTERED, t(1)),
            stored(3, INSTANCE_DISPATCHED, t(2)).with_destination("D1"),
            stored(4, INSTANCE_MANUALLY_PROCESSED, t(2)).with_destination("D9"),
        ];
        let mut reversed = events.clone();
        reversed.reverse();
        let mut rotated = events.clone();
        rotated.rotate_left(2);

        let expected = project(&events);
        assert_eq!(project(&reversed), expected);
        assert_eq!(project(&rotated), expected);
    }

    #[test]
    fn test_no_dispatch_means_no_destinations() {
        let mut received = stored(1, INSTANCE_RECEIVED, t(1));
        // destination header on a non-dispatch category is ignored
        received.event.flow_headers.destination_instance_id = Some("stray".into());
        let events = vec![received, stored(2, INSTANCE_MAPPING_ERROR, t(2))];

        assert!(project(&events).destination_instance_ids.is_empty());
    }

    #[test]
    fn test_header_ids_come_from_latest_event_carrying_them() {
        let mut first = stored(1, INSTANCE_RECEIVED, t(1));
        first.event.flow_headers = FlowHeaders {
            integration_id: Some(7),
            instance_id: Some(100),
            ..Default::default()
        };
        let mut second = stored(2, INSTANCE_MAPPED, t(2));
        second.event.flow_headers.instance_id = Some(101);
        let third = stored(3, INSTANCE_DELETED, t(3));

        let summary = project(&[first, second, third]);
        assert_eq!(summary.integration_id, Some(7));
        assert_eq!(summary.latest_instance_id, Some(101));
        assert_eq!(summary.latest_event_id, 3);
    }

    #[test]
    fn test_unknown_event_name_fails_projection() {
        let events = vec![stored(1, INSTANCE_RECEIVED, t(1)), stored(2, "instance-lost", t(2))];
        let err = SummaryProjector::default().project(&events).unwrap_err();
        assert!(matches!(err, FlowError::UnknownCategory(name) if name == "instance-lost"));
    }

    trait WithDestination {
        fn with_destination(self, destination: &str) -> Self;
    }

    impl WithDestination for StoredEvent {
        fn with_destination(mut self, destination: &str) -> Self {
            self.event = self.event.with_destination(destination);
            self
        }
    }
}
