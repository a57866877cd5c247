//! Projection and query engine.
//!
//! This module contains:
//! - Categorization: Catalog lookups and inverse indices
//! - Projector: Event history to per-instance summary
//! - Filter: Request validation
//! - Query: Filter to store-agnostic predicate
//! - Statistics: Grouped counts to status buckets
//! - Service: The operations exposed upward

pub mod categorization;
pub mod error;
pub mod filter;
pub mod projector;
pub mod query;
pub mod service;
pub mod statistics;

// Re-export commonly used types
pub use categorization::{CategorizationService, ProjectionCategories};
pub use error::{AccessorError, FieldViolation, FlowError, ValidationError};
pub use filter::{
    ActivePeriod, Filter, FilterRequest, ManualTimeFilter, ManualTimeRequest, StatusFilter,
    TimeFilter, TimeFilterRequest, TimeOffset, TimeRange,
};
pub use projector::SummaryProjector;
pub use query::{QueryBuilder, StorageConstraint, SummaryQuery};
pub use service::{Clock, FlowService, QuerySettings};
pub use statistics::StatisticsAggregator;
