//! flowtrack - Instance flow tracking over an append-only event log
//!
//! Pipeline stages (receival, mapping, dispatch, deletion) append lifecycle
//! events per instance. This crate projects those events into per-instance
//! summaries and status statistics, with filtering and paging.
//!
//! # Architecture
//!
//! The system is built around event sourcing:
//! - Events are immutable and never updated in place
//! - Current state is derived from the log on every read
//! - "Latest" is the greatest `(timestamp, id)` pair
//!
//! # Modules
//!
//! - `adapters`: Event log accessors (SQLite, in-memory)
//! - `core`: Categorization, projection, filters, statistics, service
//! - `domain`: Data structures (Event, categories, summaries, paging)
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Append events
//! flowtrack append --input events.jsonl
//!
//! # Failed instances this week
//! flowtrack summaries --status FAILED --period this-week
//!
//! # Status counts per integration
//! flowtrack integration-stats --offset-days 1
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::adapters::{EventLog, MemoryEventLog, SqliteEventLog};
pub use crate::core::{FilterRequest, FlowError, FlowService, QuerySettings};
pub use crate::domain::{
    AggregateKey, Event, EventKind, InstanceFlowSummary, InstanceStatistics, InstanceStatus,
    IntegrationStatistics, PageRequest, Slice, StorageStatus,
};
