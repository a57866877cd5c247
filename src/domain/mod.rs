//! Domain types for instance flow tracking.
//!
//! This module contains the core data structures:
//! - Events: Immutable lifecycle facts appended to the log
//! - Categories: The closed event-name vocabulary
//! - Summary: Per-instance state derived from events
//! - Statistics and paging types returned by queries

pub mod category;
pub mod events;
pub mod page;
pub mod statistics;
pub mod summary;

// Re-export commonly used types
pub use category::{EventCategory, InstanceStatus, StorageStatus, CATALOG};
pub use events::{
    log_precision, AggregateKey, ErrorEntry, Event, EventId, EventKind, FlowHeaders, StoredEvent,
};
pub use page::{PageRequest, Slice, SortOrder};
pub use statistics::{InstanceStatistics, IntegrationStatistics};
pub use summary::InstanceFlowSummary;
