//! Lookups over the category catalog.
//!
//! The service is built once from [`CATALOG`] and is read-only afterwards, so
//! it can be shared freely between concurrent queries. Inverse indices
//! (status to event names) are computed at construction time.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use crate::domain::{EventCategory, InstanceStatus, StorageStatus, CATALOG};

use super::error::FlowError;

static GLOBAL: OnceLock<CategorizationService> = OnceLock::new();

/// Event-name sets the projection needs to know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionCategories {
    /// Every name in the catalog
    pub known_event_names: BTreeSet<&'static str>,

    /// Names whose category carries a lifecycle status
    pub status_event_names: BTreeSet<&'static str>,

    /// Names whose category carries a storage status
    pub storage_event_names: BTreeSet<&'static str>,

    /// Names whose events report a destination id
    pub dispatch_event_names: BTreeSet<&'static str>,
}

#[derive(Debug)]
pub struct CategorizationService {
    by_name: HashMap<&'static str, &'static EventCategory>,
    names_by_status: HashMap<InstanceStatus, BTreeSet<&'static str>>,
    names_by_storage_status: HashMap<StorageStatus, BTreeSet<&'static str>>,
    projection: ProjectionCategories,
}

impl CategorizationService {
    /// Build the lookup tables from a catalog
    pub fn new(catalog: &'static [EventCategory]) -> Self {
        let mut by_name = HashMap::with_capacity(catalog.len());
        let mut names_by_status: HashMap<InstanceStatus, BTreeSet<&'static str>> = HashMap::new();
        let mut names_by_storage_status: HashMap<StorageStatus, BTreeSet<&'static str>> =
            HashMap::new();
        let mut projection = ProjectionCategories {
            known_event_names: BTreeSet::new(),
            status_event_names: BTreeSet::new(),
            storage_event_names: BTreeSet::new(),
            dispatch_event_names: BTreeSet::new(),
        };

        for category in catalog {
            by_name.insert(category.event_name, category);
            projection.known_event_names.insert(category.event_name);

            if let Some(status) = category.status {
                names_by_status
                    .entry(status)
                    .or_default()
                    .insert(category.event_name);
                projection.status_event_names.insert(category.event_name);
            }
            if let Some(storage_status) = category.storage_status {
                names_by_storage_status
                    .entry(storage_status)
                    .or_default()
                    .insert(category.event_name);
                projection.storage_event_names.insert(category.event_name);
            }
            if category.dispatch {
                projection.dispatch_event_names.insert(category.event_name);
            }
        }

        Self {
            by_name,
            names_by_status,
            names_by_storage_status,
            projection,
        }
    }

    /// The process-wide service over the built-in catalog
    pub fn global() -> &'static CategorizationService {
        GLOBAL.get_or_init(|| CategorizationService::new(CATALOG))
    }

    pub fn category_of(&self, name: &str) -> Result<&'static EventCategory, FlowError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| FlowError::UnknownCategory(name.to_string()))
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Lifecycle status of an event name. Fails if the category has none.
    pub fn status_of(&self, name: &str) -> Result<InstanceStatus, FlowError> {
        self.category_of(name)?
            .status
            .ok_or_else(|| FlowError::InvalidCategory {
                event_name: name.to_string(),
                expected: "lifecycle status",
            })
    }

    /// Storage status of an event name. Fails if the category has none.
    pub fn storage_status_of(&self, name: &str) -> Result<StorageStatus, FlowError> {
        self.category_of(name)?
            .storage_status
            .ok_or_else(|| FlowError::InvalidCategory {
                event_name: name.to_string(),
                expected: "storage status",
            })
    }

    /// All event names whose category carries one of `statuses`
    pub fn event_names_for_statuses<'a>(
        &self,
        statuses: impl IntoIterator<Item = &'a InstanceStatus>,
    ) -> BTreeSet<&'static str> {
        statuses
            .into_iter()
            .filter_map(|status| self.names_by_status.get(status))
            .flatten()
            .copied()
            .collect()
    }

    /// All event names whose category carries one of `storage_statuses`
    pub fn event_names_for_storage_statuses<'a>(
        &self,
        storage_statuses: impl IntoIterator<Item = &'a StorageStatus>,
    ) -> BTreeSet<&'static str> {
        storage_statuses
            .into_iter()
            .filter_map(|status| self.names_by_storage_status.get(status))
            .flatten()
            .copied()
            .collect()
    }

    pub fn projection_categories(&self) -> &ProjectionCategories {
        &self.projection
    }

    /// Catalog entries in name order
    pub fn categories(&self) -> Vec<&'static EventCategory> {
        let mut categories: Vec<_> = self.by_name.values().copied().collect();
        categories.sort_by_key(|c| c.event_name);
        categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::category::*;

    #[test]
    fn test_category_lookup() {
        let service = CategorizationService::global();
        let category = service.category_of(INSTANCE_DISPATCHED).unwrap();
        assert_eq!(category.status, Some(InstanceStatus::Transferred));
        assert!(category.dispatch);
    }

    #[test]
    fn test_unknown_name() {
        let err = CategorizationService::global()
            .category_of("instance-teleported")
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownCategory(name) if name == "instance-teleported"));
    }

    #[test]
    fn test_status_of_storage_only_category_is_invalid() {
        let service = CategorizationService::global();
        let err = service.status_of(INSTANCE_DELETED).unwrap_err();
        assert!(matches!(err, FlowError::InvalidCategory { expected: "lifecycle status", .. }));

        assert_eq!(
            service.storage_status_of(INSTANCE_DELETED).unwrap(),
            StorageStatus::StoredAndDeleted
        );
        assert!(service.storage_status_of(INSTANCE_MAPPED).is_err());
    }

    #[test]
    fn test_inverse_lookup_for_statuses() {
        let service = CategorizationService::global();
        let names = service.event_names_for_statuses(&[InstanceStatus::Aborted]);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec![INSTANCE_MANUALLY_REJECTED]);

        let transferred = service.event_names_for_statuses(&[InstanceStatus::Transferred]);
        assert!(transferred.contains(INSTANCE_DISPATCHED));
        assert!(transferred.contains(INSTANCE_MANUALLY_PROCESSED));
        assert!(transferred.contains(INSTANCE_STATUS_OVERRIDDEN_AS_TRANSFERRED));
    }

    #[test]
    fn test_inverse_lookup_is_consistent_with_forward_lookup() {
        let service = CategorizationService::global();
        for status in InstanceStatus::ALL {
            for name in service.event_names_for_statuses(&[status]) {
                assert_eq!(service.status_of(name).unwrap(), status);
            }
        }
        for status in StorageStatus::ALL {
            for name in service.event_names_for_storage_statuses(&[status]) {
                assert_eq!(service.storage_status_of(name).unwrap(), status);
            }
        }
    }

    #[test]
    fn test_never_stored_has_no_event_names() {
        let service = CategorizationService::global();
        assert!(service
            .event_names_for_storage_statuses(&[StorageStatus::NeverStored])
            .is_empty());
    }

    #[test]
    fn test_projection_categories() {
        let projection = CategorizationService::global().projection_categories();
        assert!(projection.status_event_names.contains(INSTANCE_RECEIVED));
        assert!(!projection.status_event_names.contains(INSTANCE_REGISTERED));
        assert!(projection.storage_event_names.contains(INSTANCE_REGISTERED));
        assert!(!projection.status_event_names.contains(INSTANCE_DELETION_ERROR));
        assert_eq!(projection.dispatch_event_names.len(), 2);
        assert_eq!(projection.known_event_names.len(), CATALOG.len());
    }
}
