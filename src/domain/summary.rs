//! Derived per-instance state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::categorization::CategorizationService;

use super::category::{InstanceStatus, StorageStatus};
use super::events::{AggregateKey, EventId};

/// Current state of one instance, derived from its event history.
///
/// This is never a source of truth: it is recomputed from the log on every
/// read and is a pure function of the events recorded for `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceFlowSummary {
    #[serde(flatten)]
    pub key: AggregateKey,

    /// Flow-header integration id of the most recent event carrying one
    pub integration_id: Option<i64>,

    /// Flow-header instance id of the most recent event carrying one
    pub latest_instance_id: Option<i64>,

    /// Store id of the overall most recent event
    pub latest_event_id: EventId,

    /// Timestamp of the overall most recent event
    pub latest_update: DateTime<Utc>,

    pub latest_status_event_name: Option<String>,

    pub latest_storage_status_event_name: Option<String>,

    /// Every destination id any dispatch event has reported
    pub destination_instance_ids: BTreeSet<String>,
}

impl InstanceFlowSummary {
    /// Lifecycle status, `None` until a status-bearing event has been seen
    pub fn status(&self) -> Option<InstanceStatus> {
        let name = self.latest_status_event_name.as_deref()?;
        CategorizationService::global().status_of(name).ok()
    }

    /// Storage status. No storage-bearing event means never stored.
    pub fn storage_status(&self) -> StorageStatus {
        self.latest_storage_status_event_name
            .as_deref()
            .and_then(|name| CategorizationService::global().storage_status_of(name).ok())
            .unwrap_or(StorageStatus::NeverStored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::category::*;
    use chrono::TimeZone;

    fn summary(status: Option<&str>, storage: Option<&str>) -> InstanceFlowSummary {
        InstanceFlowSummary {
            key: AggregateKey::new(1, "INT-1", "a-1"),
            integration_id: None,
            latest_instance_id: None,
            latest_event_id: 1,
            latest_update: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            latest_status_event_name: status.map(str::to_string),
            latest_storage_status_event_name: storage.map(str::to_string),
            destination_instance_ids: BTreeSet::new(),
        }
    }

    #[test]
    fn test_status_accessors() {
        let s = summary(Some(INSTANCE_DISPATCHING_ERROR), Some(INSTANCE_REGISTERED));
        assert_eq!(s.status(), Some(InstanceStatus::Failed));
        assert_eq!(s.storage_status(), StorageStatus::Stored);

        let fresh = summary(None, None);
        assert_eq!(fresh.status(), None);
        assert_eq!(fresh.storage_status(), StorageStatus::NeverStored);
    }

    #[test]
    fn test_serializes_key_inline() {
        let json = serde_json::to_value(summary(Some(INSTANCE_MAPPED), None)).unwrap();
        assert_eq!(json["sourceApplicationId"], 1);
        assert_eq!(json["latestStatusEventName"], INSTANCE_MAPPED);
    }
}
