//! Database schema migrations.
//!
//! Applies the initial schema: customers, instances, groups, the
//! groups_instances link table, route_tables, subnets, and the
//! schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use stratus_core::error::{Result, StratusError};

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| StratusError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StratusError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// Identity keys are composite with the customer id, so colliding raw
/// external ids from different tenants never conflict. `updated_at` columns
/// are unix seconds and feed the expiry sweep exclusively.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS customers (
            id          TEXT PRIMARY KEY NOT NULL,
            last_sync   INTEGER NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS instances (
            id          TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            type        TEXT NOT NULL DEFAULT '',
            data        TEXT NOT NULL DEFAULT 'null',
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (customer_id, id)
        );

        CREATE INDEX IF NOT EXISTS idx_instances_type
            ON instances (customer_id, type);

        CREATE INDEX IF NOT EXISTS idx_instances_updated_at
            ON instances (customer_id, updated_at);

        CREATE TABLE IF NOT EXISTS groups (
            name        TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            type        TEXT NOT NULL DEFAULT '',
            data        TEXT NOT NULL DEFAULT 'null',
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (customer_id, name)
        );

        CREATE INDEX IF NOT EXISTS idx_groups_type
            ON groups (customer_id, type);

        CREATE INDEX IF NOT EXISTS idx_groups_updated_at
            ON groups (customer_id, updated_at);

        -- Many-to-many membership; one row per (customer, group, instance).
        CREATE TABLE IF NOT EXISTS groups_instances (
            customer_id TEXT NOT NULL,
            group_name  TEXT NOT NULL,
            instance_id TEXT NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (customer_id, group_name, instance_id)
        );

        CREATE INDEX IF NOT EXISTS idx_groups_instances_instance
            ON groups_instances (customer_id, instance_id);

        CREATE TABLE IF NOT EXISTS route_tables (
            id          TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            data        TEXT NOT NULL DEFAULT 'null',
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (customer_id, id)
        );

        CREATE TABLE IF NOT EXISTS subnets (
            id          TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            data        TEXT NOT NULL DEFAULT 'null',
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (customer_id, id)
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| StratusError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
