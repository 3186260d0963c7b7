//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Node keys are stored denormalized on the
//! `asset_node` relation table so subtree existence checks are prefix
//! matches on one table.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1 — initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Tenants (global scope)
-- =======================================================================
DEFINE TABLE tenant SCHEMAFULL;
DEFINE FIELD name ON TABLE tenant TYPE string;
DEFINE FIELD slug ON TABLE tenant TYPE string;
DEFINE FIELD created_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_tenant_slug ON TABLE tenant COLUMNS slug UNIQUE;

-- =======================================================================
-- Users (tenant scope)
-- =======================================================================
DEFINE TABLE user SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE user TYPE string;
DEFINE FIELD username ON TABLE user TYPE string;
DEFINE FIELD is_active ON TABLE user TYPE bool DEFAULT true;
DEFINE FIELD created_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_user_tenant_username ON TABLE user \
    COLUMNS tenant_id, username UNIQUE;

-- =======================================================================
-- Groups and membership (tenant scope)
-- =======================================================================
DEFINE TABLE usergroup SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE usergroup TYPE string;
DEFINE FIELD name ON TABLE usergroup TYPE string;
DEFINE FIELD comment ON TABLE usergroup TYPE string DEFAULT '';
DEFINE FIELD created_at ON TABLE usergroup TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE usergroup TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_group_tenant_name ON TABLE usergroup \
    COLUMNS tenant_id, name UNIQUE;

DEFINE TABLE user_group SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE user_group TYPE string;
DEFINE FIELD user_id ON TABLE user_group TYPE string;
DEFINE FIELD group_id ON TABLE user_group TYPE string;
DEFINE INDEX idx_user_group_pair ON TABLE user_group \
    COLUMNS user_id, group_id UNIQUE;

-- =======================================================================
-- Nodes (tenant scope, hierarchical path keys)
-- =======================================================================
DEFINE TABLE node SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE node TYPE string;
DEFINE FIELD key ON TABLE node TYPE string;
DEFINE FIELD value ON TABLE node TYPE string;
DEFINE FIELD assets_amount ON TABLE node TYPE int DEFAULT 0;
DEFINE FIELD created_at ON TABLE node TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE node TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_node_tenant_key ON TABLE node \
    COLUMNS tenant_id, key UNIQUE;

-- =======================================================================
-- Assets (tenant scope)
-- =======================================================================
DEFINE TABLE asset SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE asset TYPE string;
DEFINE FIELD name ON TABLE asset TYPE string;
DEFINE FIELD address ON TABLE asset TYPE string;
DEFINE FIELD platform ON TABLE asset TYPE string;
DEFINE FIELD is_active ON TABLE asset TYPE bool DEFAULT true;
DEFINE FIELD comment ON TABLE asset TYPE string DEFAULT '';
DEFINE FIELD created_at ON TABLE asset TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE asset TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_asset_tenant_name ON TABLE asset \
    COLUMNS tenant_id, name UNIQUE;

-- =======================================================================
-- Asset <-> Node relation (tenant scope)
--
-- node_key is denormalized from the node row: node keys are immutable
-- once created, and carrying them here turns every subtree existence
-- check into a single prefix match.
-- =======================================================================
DEFINE TABLE asset_node SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE asset_node TYPE string;
DEFINE FIELD asset_id ON TABLE asset_node TYPE string;
DEFINE FIELD node_id ON TABLE asset_node TYPE string;
DEFINE FIELD node_key ON TABLE asset_node TYPE string;
DEFINE INDEX idx_asset_node_pair ON TABLE asset_node \
    COLUMNS asset_id, node_id UNIQUE;
DEFINE INDEX idx_asset_node_key ON TABLE asset_node \
    COLUMNS tenant_id, node_key;

-- =======================================================================
-- Grants (tenant scope)
-- =======================================================================
DEFINE TABLE grant SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE grant TYPE string;
DEFINE FIELD name ON TABLE grant TYPE string;
DEFINE FIELD user_ids ON TABLE grant TYPE array DEFAULT [];
DEFINE FIELD user_ids.* ON TABLE grant TYPE string;
DEFINE FIELD group_ids ON TABLE grant TYPE array DEFAULT [];
DEFINE FIELD group_ids.* ON TABLE grant TYPE string;
DEFINE FIELD node_ids ON TABLE grant TYPE array DEFAULT [];
DEFINE FIELD node_ids.* ON TABLE grant TYPE string;
DEFINE FIELD asset_ids ON TABLE grant TYPE array DEFAULT [];
DEFINE FIELD asset_ids.* ON TABLE grant TYPE string;
DEFINE FIELD accounts ON TABLE grant TYPE array DEFAULT [];
DEFINE FIELD accounts.* ON TABLE grant TYPE string;
DEFINE FIELD actions ON TABLE grant TYPE int DEFAULT 1;
DEFINE FIELD date_start ON TABLE grant TYPE datetime;
DEFINE FIELD date_expired ON TABLE grant TYPE datetime;
DEFINE FIELD is_active ON TABLE grant TYPE bool DEFAULT true;
DEFINE FIELD created_at ON TABLE grant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE grant TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_grant_tenant_name ON TABLE grant \
    COLUMNS tenant_id, name UNIQUE;
DEFINE INDEX idx_grant_date_expired ON TABLE grant \
    COLUMNS date_expired;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
/// All DEFINE statements are idempotent so re-running is safe.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    // Ensure migration tracking table exists (idempotent).
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    // Determine current schema version.
    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            db.query(migration.sql).await?.check().map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

            // Record the applied migration.
            db.query("CREATE _migration SET version = $version, name = $name")
                .bind(("version", migration.version))
                .bind(("name", migration.name))
                .await?
                .check()
                .map_err(|e| {
                    DbError::Migration(format!(
                        "Failed to record migration v{}: {}",
                        migration.version, e,
                    ))
                })?;

            info!(
                version = migration.version,
                "Migration applied successfully"
            );
        }
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
///
/// Exposed for testing with in-memory SurrealDB instances that
/// bypass the migration runner.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
