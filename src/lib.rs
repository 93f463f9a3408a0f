//! nexapro - client-side data synchronization for a project/task dashboard
//!
//! This library keeps in-memory project and task collections consistent
//! with a remote REST gateway and with each other.
//!
//! # Core Concepts
//!
//! - **Entity stores**: per-type collections with fetch/create/update/delete
//! - **Reconciliation**: status and progress kept coupled on every read and write
//! - **Aggregation**: project progress and task counters derived from tasks
//! - **Event bus**: typed publish/subscribe keeping sibling stores in sync
//! - **Activity log**: best-effort audit entries for every mutation
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.nexapro.toml`
//! - `error`: Error types and result aliases
//! - `gateway`: REST client for the `{success, data, message}` envelope
//! - `entity`, `project`, `task`, `user`: Data model
//! - `reconcile`, `stats`: Pure consistency rules and derived statistics
//! - `aggregate`: Task to project aggregation
//! - `store`, `task_store`: Entity stores
//! - `activity`: Activity logger
//! - `events`: Event bus and JSONL event output
//! - `session`, `permissions`: Explicit session context and permission policy
//! - `output`: Shared human/JSON output formatting

pub mod activity;
pub mod aggregate;
pub mod cli;
pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod gateway;
pub mod output;
pub mod permissions;
pub mod project;
pub mod reconcile;
pub mod session;
pub mod stats;
pub mod store;
pub mod task;
pub mod task_store;
pub mod user;

pub use error::{Error, Result};
pub use store::{EntityStore, ProjectStore, StoreContext};
pub use task_store::TaskStore;
