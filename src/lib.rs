//! pgshift - PostgreSQL schema diffing
//!
//! Computes the DDL that turns one schema state into another and applies it
//! safely. A schema state comes from a live database, a schema definition
//! file, or a set of migrations replayed into a scratch database.
//!
//! - Stage 1 (Load): each endpoint becomes a [`snapshot::Snapshot`]
//! - Stage 2 (Diff): [`diff::DiffEngine`] emits an ordered, classified change list
//! - Stage 3 (Filter): [`safety::SafetyFilter`] applies the run's safety policy
//! - Stage 4 (Execute): [`executor::Executor`] applies it in one transaction

pub mod config;
pub mod connection;
pub mod diff;
pub mod error;
pub mod executor;
pub mod files;
pub mod introspection;
pub mod loader;
pub mod migrations;
pub mod pipeline;
pub mod policy;
pub mod quote;
pub mod safety;
pub mod scratch;
pub mod snapshot;

pub use config::Settings;
pub use diff::{ChangeList, ChangeStatement, DiffEngine};
pub use error::{ShiftError, ShiftResult};
pub use executor::ExecutionResult;
pub use loader::{Endpoint, StateLoader};
pub use pipeline::{DiffOutcome, Pipeline};
pub use policy::DiffPolicy;
pub use safety::{SafetyFilter, SafetyMode};
pub use tokio_util::sync::CancellationToken;
