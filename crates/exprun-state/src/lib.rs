//! exprun-state: SurrealDB Backend for exprun
//!
//! This crate provides the persistence layer for experiment result snapshots.
//! It handles all I/O with SurrealDB and exposes a backend-agnostic
//! [`SnapshotStore`] trait so the orchestration layer never touches the
//! database directly.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: document upserts with optimistic versioning.
//!
//! ## Key Components
//!
//! - `SurrealHandle`: Manages the connection and schema setup
//! - `SnapshotStore`: Versioned document operations for snapshots
//! - `MemorySnapshotStore`: In-memory fake satisfying the same contract

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_snapshot_store;

pub use error::{StateError, StorageError};
pub use handle::{CloudConfig, SurrealHandle};
pub use schema::SnapshotRow;
pub use storage_traits::{SnapshotDocument, SnapshotStore, StorageResult};
pub use surreal_snapshot_store::SurrealSnapshotStore;

/// Result type for exprun-state operations
pub type Result<T> = std::result::Result<T, StateError>;
