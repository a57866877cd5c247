//! Event categories: the closed vocabulary of event names.
//!
//! Each event name maps to exactly one [`EventCategory`] which tells the
//! projection whether the event moves the lifecycle status, the storage
//! status, or records a dispatch to a destination.

use serde::{Deserialize, Serialize};

use super::events::EventKind;

/// Coarse lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    InProgress,
    Transferred,
    Aborted,
    Failed,
}

impl InstanceStatus {
    pub const ALL: [InstanceStatus; 4] = [
        Self::InProgress,
        Self::Transferred,
        Self::Aborted,
        Self::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Transferred => "TRANSFERRED",
            Self::Aborted => "ABORTED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown instance status: {}", s))
    }
}

/// Whether the instance payload is retained by the intermediate storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageStatus {
    Stored,
    StoredAndDeleted,
    /// No storage event was ever recorded. Never carried by a category.
    NeverStored,
}

impl StorageStatus {
    pub const ALL: [StorageStatus; 3] = [Self::Stored, Self::StoredAndDeleted, Self::NeverStored];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "STORED",
            Self::StoredAndDeleted => "STORED_AND_DELETED",
            Self::NeverStored => "NEVER_STORED",
        }
    }
}

impl std::fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown storage status: {}", s))
    }
}

/// Static classification of an event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCategory {
    pub event_name: &'static str,
    pub kind: EventKind,
    pub status: Option<InstanceStatus>,
    pub storage_status: Option<StorageStatus>,
    /// Events of this category carry the destination instance id
    pub dispatch: bool,
}

impl EventCategory {
    const fn new(
        event_name: &'static str,
        kind: EventKind,
        status: Option<InstanceStatus>,
        storage_status: Option<StorageStatus>,
        dispatch: bool,
    ) -> Self {
        Self {
            event_name,
            kind,
            status,
            storage_status,
            dispatch,
        }
    }
}

pub const INSTANCE_RECEIVED: &str = "instance-received";
pub const INSTANCE_REGISTERED: &str = "instance-registered";
pub const INSTANCE_REQUESTED_FOR_RETRY: &str = "instance-requested-for-retry";
pub const INSTANCE_MAPPED: &str = "instance-mapped";
pub const INSTANCE_READY_FOR_DISPATCH: &str = "instance-ready-for-dispatch";
pub const INSTANCE_DISPATCHED: &str = "instance-dispatched";
pub const INSTANCE_MANUALLY_PROCESSED: &str = "instance-manually-processed";
pub const INSTANCE_MANUALLY_REJECTED: &str = "instance-manually-rejected";
pub const INSTANCE_STATUS_OVERRIDDEN_AS_TRANSFERRED: &str = "instance-status-overridden-as-transferred";
pub const INSTANCE_DELETED: &str = "instance-deleted";
pub const INSTANCE_RECEIVAL_ERROR: &str = "instance-receival-error";
pub const INSTANCE_REGISTRATION_ERROR: &str = "instance-registration-error";
pub const INSTANCE_RETRY_REQUEST_ERROR: &str = "instance-retry-request-error";
pub const INSTANCE_MAPPING_ERROR: &str = "instance-mapping-error";
pub const INSTANCE_READY_FOR_DISPATCH_ERROR: &str = "instance-ready-for-dispatch-error";
pub const INSTANCE_DISPATCHING_ERROR: &str = "instance-dispatching-error";
pub const INSTANCE_DELETION_ERROR: &str = "instance-deletion-error";

use EventKind::{Error, Info};
use InstanceStatus::{Aborted, Failed, InProgress, Transferred};

/// Every known event category. Event names are unique.
pub const CATALOG: &[EventCategory] = &[
    EventCategory::new(INSTANCE_RECEIVED, Info, Some(InProgress), None, false),
    EventCategory::new(INSTANCE_REGISTERED, Info, None, Some(StorageStatus::Stored), false),
    EventCategory::new(INSTANCE_REQUESTED_FOR_RETRY, Info, Some(InProgress), None, false),
    EventCategory::new(INSTANCE_MAPPED, Info, Some(InProgress), None, false),
    EventCategory::new(INSTANCE_READY_FOR_DISPATCH, Info, Some(InProgress), None, false),
    EventCategory::new(INSTANCE_DISPATCHED, Info, Some(Transferred), None, true),
    EventCategory::new(INSTANCE_MANUALLY_PROCESSED, Info, Some(Transferred), None, true),
    EventCategory::new(INSTANCE_MANUALLY_REJECTED, Info, Some(Aborted), None, false),
    EventCategory::new(INSTANCE_STATUS_OVERRIDDEN_AS_TRANSFERRED, Info, Some(Transferred), None, false),
    EventCategory::new(INSTANCE_DELETED, Info, None, Some(StorageStatus::StoredAndDeleted), false),
    EventCategory::new(INSTANCE_RECEIVAL_ERROR, Error, Some(Failed), None, false),
    EventCategory::new(INSTANCE_REGISTRATION_ERROR, Error, Some(Failed), None, false),
    EventCategory::new(INSTANCE_RETRY_REQUEST_ERROR, Error, Some(Failed), None, false),
    EventCategory::new(INSTANCE_MAPPING_ERROR, Error, Some(Failed), None, false),
    EventCategory::new(INSTANCE_READY_FOR_DISPATCH_ERROR, Error, Some(Failed), None, false),
    EventCategory::new(INSTANCE_DISPATCHING_ERROR, Error, Some(Failed), None, false),
    EventCategory::new(INSTANCE_DELETION_ERROR, Error, None, None, false),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_names_are_unique() {
        let names: HashSet<_> = CATALOG.iter().map(|c| c.event_name).collect();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn test_no_category_carries_both_statuses() {
        assert!(CATALOG
            .iter()
            .all(|c| !(c.status.is_some() && c.storage_status.is_some())));
    }

    #[test]
    fn test_never_stored_is_not_in_catalog() {
        assert!(CATALOG
            .iter()
            .all(|c| c.storage_status != Some(StorageStatus::NeverStored)));
    }

    #[test]
    fn test_error_kind_matches_failed_status() {
        for category in CATALOG {
            if category.status == Some(InstanceStatus::Failed) {
                assert_eq!(category.kind, EventKind::Error, "{}", category.event_name);
            }
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("failed".parse::<InstanceStatus>(), Ok(InstanceStatus::Failed));
        assert_eq!(
            "STORED_AND_DELETED".parse::<StorageStatus>(),
            Ok(StorageStatus::StoredAndDeleted)
        );
        assert!("DONE".parse::<InstanceStatus>().is_err());
    }
}
