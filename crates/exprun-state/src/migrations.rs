//! SurrealDB schema migrations and initialization
//!
//! Sets up the snapshot table with its uniqueness constraint and lookup
//! indexes.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all exprun tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing exprun SurrealDB schema");

    init_snapshots_table(db).await?;

    info!("exprun schema initialization complete");
    Ok(())
}

/// Initialize `snapshots` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE snapshots {
///   organization:   STRING (part of unique key)
///   snapshot_id:    STRING (part of unique key)
///   experiment_id:  STRING (indexed)
///   version:        INT    (optimistic concurrency counter)
///   body:           OBJECT (snapshot fields, owned by exprun-core)
///   created_at:     DATETIME
///   updated_at:     DATETIME
/// }
/// ```
///
/// Constraints:
/// - `(organization, snapshot_id)` is unique
/// - `version` only moves forward (enforced via compare-and-set updates)
/// - snapshots are never deleted by exprun
async fn init_snapshots_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing snapshots table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS snapshots
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_org_snapshot ON TABLE snapshots COLUMNS organization, snapshot_id UNIQUE;

        -- Latest snapshot per experiment
        DEFINE INDEX IF NOT EXISTS idx_org_experiment_created ON TABLE snapshots COLUMNS organization, experiment_id, created_at;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ snapshots table initialized");
    Ok(())
}
