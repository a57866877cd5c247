//! Projection Integration Tests
//!
//! Per-instance summaries derived through the service from appended events.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use flowtrack::core::FlowService;
use flowtrack::domain::category::*;
use flowtrack::domain::{AggregateKey, Event, EventKind, FlowHeaders, InstanceStatus, StorageStatus};
use flowtrack::{FlowError, MemoryEventLog, QuerySettings};

fn key() -> AggregateKey {
    AggregateKey::new(7, "INT-77", "order-1")
}

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn event(name: &str, minutes: i64) -> Event {
    let kind = if name.ends_with("-error") {
        EventKind::Error
    } else {
        EventKind::Info
    };
    Event::new(key(), name, kind, "fint-flyt-test").at(t(minutes))
}

fn service() -> FlowService {
    FlowService::new(Arc::new(MemoryEventLog::new()), QuerySettings::default())
}

#[tokio::test]
async fn test_dispatch_retry_keeps_every_destination() {
    let service = service();
    for e in [
        event(INSTANCE_RECEIVED, 1),
        event(INSTANCE_MAPPED, 2),
        event(INSTANCE_DISPATCHED, 3).with_destination("D1"),
        event(INSTANCE_DISPATCHING_ERROR, 4),
        event(INSTANCE_DISPATCHED, 5).with_destination("D2"),
    ] {
        service.append_event(e).await.unwrap();
    }

    let summary = service.get_summary(&key()).await.unwrap().unwrap();
    assert_eq!(summary.latest_status_event_name.as_deref(), Some(INSTANCE_DISPATCHED));
    assert_eq!(summary.status(), Some(InstanceStatus::Transferred));
    assert_eq!(summary.latest_update, t(5));
    assert_eq!(
        summary.destination_instance_ids.iter().cloned().collect::<Vec<_>>(),
        vec!["D1".to_string(), "D2".to_string()]
    );
}

#[tokio::test]
async fn test_deletion_moves_storage_but_not_status() {
    let service = service();
    for e in [
        event(INSTANCE_RECEIVED, 1),
        event(INSTANCE_REGISTERED, 2),
        event(INSTANCE_DISPATCHED, 3),
        event(INSTANCE_DELETED, 4),
    ] {
        service.append_event(e).await.unwrap();
    }

    let summary = service.get_summary(&key()).await.unwrap().unwrap();
    assert_eq!(summary.status(), Some(InstanceStatus::Transferred));
    assert_eq!(summary.storage_status(), StorageStatus::StoredAndDeleted);
    assert_eq!(summary.latest_update, t(4));
}

#[tokio::test]
async fn test_deletion_error_is_recorded_without_status() {
    let service = service();
    service.append_event(event(INSTANCE_REGISTERED, 1)).await.unwrap();
    service
        .append_event(event(INSTANCE_DELETION_ERROR, 2))
        .await
        .unwrap();

    let summary = service.get_summary(&key()).await.unwrap().unwrap();
    assert_eq!(summary.status(), None);
    assert_eq!(summary.storage_status(), StorageStatus::Stored);
    assert_eq!(summary.latest_update, t(2));
}

#[tokio::test]
async fn test_late_arriving_event_does_not_override_newer_state() {
    let service = service();
    service.append_event(event(INSTANCE_MAPPED, 10)).await.unwrap();
    // appended later, but happened earlier
    service.append_event(event(INSTANCE_RECEIVAL_ERROR, 1)).await.unwrap();

    let summary = service.get_summary(&key()).await.unwrap().unwrap();
    assert_eq!(summary.latest_status_event_name.as_deref(), Some(INSTANCE_MAPPED));
    assert_eq!(summary.latest_update, t(10));

    let history = service.get_events(&key()).await.unwrap();
    assert_eq!(history[0].event.name, INSTANCE_RECEIVAL_ERROR);
}

#[tokio::test]
async fn test_equal_timestamps_resolve_by_insertion_order() {
    let service = service();
    service.append_event(event(INSTANCE_MAPPING_ERROR, 1)).await.unwrap();
    service.append_event(event(INSTANCE_MAPPED, 1)).await.unwrap();

    let summary = service.get_summary(&key()).await.unwrap().unwrap();
    assert_eq!(summary.status(), Some(InstanceStatus::InProgress));
}

#[tokio::test]
async fn test_header_ids_survive_events_without_headers() {
    let service = service();
    service
        .append_event(event(INSTANCE_RECEIVED, 1).with_headers(FlowHeaders {
            integration_id: Some(42),
            instance_id: Some(9001),
            ..Default::default()
        }))
        .await
        .unwrap();
    service.append_event(event(INSTANCE_MAPPED, 2)).await.unwrap();

    let summary = service.get_summary(&key()).await.unwrap().unwrap();
    assert_eq!(summary.integration_id, Some(42));
    assert_eq!(summary.latest_instance_id, Some(9001));
}

#[tokio::test]
async fn test_unknown_instance_is_not_found() {
    let summary = service()
        .get_summary(&AggregateKey::new(1, "nope", "nope"))
        .await
        .unwrap();
    assert!(summary.is_none());
}

#[tokio::test]
async fn test_unknown_event_name_is_rejected_on_append() {
    let err = service()
        .append_event(event("instance-archived", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::UnknownCategory(ref name) if name == "instance-archived"));
    assert!(err.is_internal());
}
