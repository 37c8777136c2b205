//! The entity repository: idempotent upserts, relationship maintenance,
//! point lookups, filtered lists, and counts, all customer-scoped.
//!
//! Writes follow a uniform upsert protocol: a single
//! `INSERT ... ON CONFLICT ... DO UPDATE` per entity row, atomic with
//! respect to concurrent writers of the same key. Relationship rows are
//! maintained best-effort after the row upsert; there is deliberately no
//! enclosing transaction across an entity and its links.

use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use stratus_core::error::{Result, StratusError};
use stratus_core::types::{
    Customer, Entity, Group, GroupFilter, GroupRef, GroupView, Instance, InstanceFilter,
    InstanceRef, RouteTable, Subnet,
};

use crate::clock::Clock;
use crate::db::Database;
use crate::expiry::ExpireRequest;

/// Repository over the snapshot tables.
///
/// Cheap to share behind an `Arc`; every operation borrows a pooled
/// connection for its duration. Each successful write advances the
/// customer's sync timestamp and hands an evaluation request to the
/// expiry worker.
pub struct EntityRepository {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    expire_tx: SyncSender<ExpireRequest>,
}

impl EntityRepository {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, expire_tx: SyncSender<ExpireRequest>) -> Self {
        Self {
            db,
            clock,
            expire_tx,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Upsert one entity and its declared relationships, then advance the
    /// customer's sync timestamp and enqueue an expiry evaluation.
    ///
    /// Returns the entity as persisted (with `updated_at` stamped). Putting
    /// the same entity twice yields exactly one stored row.
    pub fn put_entity(&self, mut entity: Entity) -> Result<Entity> {
        if entity.customer_id().is_empty() {
            return Err(StratusError::MissingCustomerId);
        }

        let now = self.clock.now().timestamp();
        match &mut entity {
            Entity::Instance(instance) => {
                self.put_instance(instance, now)?;
                instance.updated_at = Some(ts_to_datetime(now));
            }
            Entity::Group(group) => {
                self.put_group(group, now)?;
                group.updated_at = Some(ts_to_datetime(now));
            }
            Entity::RouteTable(route_table) => {
                self.put_route_table(route_table, now)?;
                route_table.updated_at = Some(ts_to_datetime(now));
            }
            Entity::Subnet(subnet) => {
                self.put_subnet(subnet, now)?;
                subnet.updated_at = Some(ts_to_datetime(now));
            }
        }

        self.put_customer(entity.customer_id(), now)?;

        // After shutdown the evaluation channel is closed; the write itself
        // has already succeeded, so a failed handoff is not an error.
        if self
            .expire_tx
            .send(ExpireRequest {
                customer_id: entity.customer_id().to_string(),
                timestamp: now,
            })
            .is_err()
        {
            debug!(
                customer_id = entity.customer_id(),
                "expiry channel closed; skipping evaluation"
            );
        }

        Ok(entity)
    }

    fn put_instance(&self, instance: &Instance, now: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO instances (id, customer_id, type, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (customer_id, id) DO UPDATE
                 SET type = excluded.type, data = excluded.data, updated_at = excluded.updated_at",
                rusqlite::params![
                    instance.id,
                    instance.customer_id,
                    instance.kind,
                    instance.data.to_string(),
                    now,
                ],
            )
            .map_err(|e| StratusError::Storage(format!("Failed to upsert instance: {}", e)))?;

            for group in &instance.groups {
                ensure_group(conn, &instance.customer_id, group, now)?;
                link(conn, &instance.customer_id, &group.name, &instance.id)?;
            }
            Ok(())
        })
    }

    fn put_group(&self, group: &Group, now: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO groups (name, customer_id, type, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (customer_id, name) DO UPDATE
                 SET type = excluded.type, data = excluded.data, updated_at = excluded.updated_at",
                rusqlite::params![
                    group.name,
                    group.customer_id,
                    group.kind,
                    group.data.to_string(),
                    now,
                ],
            )
            .map_err(|e| StratusError::Storage(format!("Failed to upsert group: {}", e)))?;

            for instance in &group.instances {
                ensure_instance(conn, &group.customer_id, instance, now)?;
                link(conn, &group.customer_id, &group.name, &instance.id)?;
            }
            Ok(())
        })
    }

    fn put_route_table(&self, route_table: &RouteTable, now: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO route_tables (id, customer_id, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (customer_id, id) DO UPDATE
                 SET data = excluded.data, updated_at = excluded.updated_at",
                rusqlite::params![
                    route_table.id,
                    route_table.customer_id,
                    route_table.data.to_string(),
                    now,
                ],
            )
            .map_err(|e| StratusError::Storage(format!("Failed to upsert route table: {}", e)))?;
            Ok(())
        })
    }

    fn put_subnet(&self, subnet: &Subnet, now: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO subnets (id, customer_id, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (customer_id, id) DO UPDATE
                 SET data = excluded.data, updated_at = excluded.updated_at",
                rusqlite::params![
                    subnet.id,
                    subnet.customer_id,
                    subnet.data.to_string(),
                    now,
                ],
            )
            .map_err(|e| StratusError::Storage(format!("Failed to upsert subnet: {}", e)))?;
            Ok(())
        })
    }

    fn put_customer(&self, customer_id: &str, now: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            // last_sync only ever advances.
            conn.execute(
                "INSERT INTO customers (id, last_sync) VALUES (?1, ?2)
                 ON CONFLICT (id) DO UPDATE
                 SET last_sync = MAX(last_sync, excluded.last_sync)",
                rusqlite::params![customer_id, now],
            )
            .map_err(|e| StratusError::Storage(format!("Failed to upsert customer: {}", e)))?;
            Ok(())
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Point lookup of one instance.
    pub fn get_instance(&self, customer_id: &str, instance_id: &str) -> Result<Option<Instance>> {
        if customer_id.is_empty() {
            return Err(StratusError::MissingCustomerId);
        }
        if instance_id.is_empty() {
            return Err(StratusError::MissingInstanceId);
        }

        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, customer_id, type, data, updated_at
                 FROM instances WHERE customer_id = ?1 AND id = ?2",
                rusqlite::params![customer_id, instance_id],
                row_to_instance,
            )
            .optional()
            .map_err(|e| StratusError::Storage(e.to_string()))
        })
    }

    /// All instances for a customer, optionally narrowed by type and/or to
    /// the members of one group.
    pub fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        if filter.customer_id.is_empty() {
            return Err(StratusError::MissingCustomerId);
        }

        self.db.with_conn(|conn| {
            let (sql, params) = instance_query("SELECT id, customer_id, type, data, updated_at FROM instances", filter);
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StratusError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(&params[..], row_to_instance)
                .map_err(|e| StratusError::Storage(e.to_string()))?;

            let mut instances = Vec::new();
            for row in rows {
                instances.push(row.map_err(|e| StratusError::Storage(e.to_string()))?);
            }
            Ok(instances)
        })
    }

    /// Count of instances matching the same filters as `list_instances`.
    pub fn count_instances(&self, filter: &InstanceFilter) -> Result<u64> {
        if filter.customer_id.is_empty() {
            return Err(StratusError::MissingCustomerId);
        }

        self.db.with_conn(|conn| {
            let (sql, params) = instance_query("SELECT COUNT(id) FROM instances", filter);
            let count: i64 = conn
                .query_row(&sql, &params[..], |row| row.get(0))
                .map_err(|e| StratusError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Point lookup of one group, including its current member instances
    /// (optionally narrowed by instance type) and their distinct count.
    pub fn get_group(
        &self,
        customer_id: &str,
        group_name: &str,
        kind: Option<&str>,
    ) -> Result<Option<GroupView>> {
        if customer_id.is_empty() {
            return Err(StratusError::MissingCustomerId);
        }
        if group_name.is_empty() {
            return Err(StratusError::MissingGroupId);
        }

        let group = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT name, customer_id, type, data, updated_at
                 FROM groups WHERE customer_id = ?1 AND name = ?2",
                rusqlite::params![customer_id, group_name],
                row_to_group,
            )
            .optional()
            .map_err(|e| StratusError::Storage(e.to_string()))
        })?;

        let Some(group) = group else {
            return Ok(None);
        };

        let members = self.list_instances(&InstanceFilter {
            customer_id: customer_id.to_string(),
            kind: kind.map(str::to_string),
            group_id: Some(group_name.to_string()),
        })?;

        Ok(Some(GroupView {
            group,
            instance_count: members.len() as u64,
            members,
        }))
    }

    /// All groups for a customer with their derived distinct member counts,
    /// optionally filtered by type.
    pub fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<GroupView>> {
        if filter.customer_id.is_empty() {
            return Err(StratusError::MissingCustomerId);
        }

        self.db.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT groups.name, groups.customer_id, groups.type, groups.data, groups.updated_at,
                        COUNT(DISTINCT groups_instances.instance_id) AS instance_count
                 FROM groups
                 LEFT OUTER JOIN groups_instances
                   ON groups_instances.group_name = groups.name
                  AND groups_instances.customer_id = groups.customer_id
                 WHERE groups.customer_id = ?1",
            );
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&filter.customer_id];
            if let Some(kind) = &filter.kind {
                sql.push_str(" AND groups.type = ?2");
                params.push(kind);
            }
            sql.push_str(" GROUP BY groups.customer_id, groups.name");

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StratusError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(&params[..], |row| {
                    let group = row_to_group(row)?;
                    let instance_count: i64 = row.get(5)?;
                    Ok(GroupView {
                        group,
                        instance_count: instance_count as u64,
                        members: Vec::new(),
                    })
                })
                .map_err(|e| StratusError::Storage(e.to_string()))?;

            let mut groups = Vec::new();
            for row in rows {
                groups.push(row.map_err(|e| StratusError::Storage(e.to_string()))?);
            }
            Ok(groups)
        })
    }

    /// Count of groups for a customer, optionally filtered by type.
    pub fn count_groups(&self, filter: &GroupFilter) -> Result<u64> {
        if filter.customer_id.is_empty() {
            return Err(StratusError::MissingCustomerId);
        }

        self.db.with_conn(|conn| {
            let mut sql = String::from("SELECT COUNT(name) FROM groups WHERE customer_id = ?1");
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&filter.customer_id];
            if let Some(kind) = &filter.kind {
                sql.push_str(" AND type = ?2");
                params.push(kind);
            }
            let count: i64 = conn
                .query_row(&sql, &params[..], |row| row.get(0))
                .map_err(|e| StratusError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Point lookup of one customer's sync record.
    pub fn get_customer(&self, id: &str) -> Result<Option<Customer>> {
        if id.is_empty() {
            return Err(StratusError::MissingCustomerId);
        }

        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, last_sync FROM customers WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(Customer {
                        id: row.get(0)?,
                        last_sync: ts_to_datetime(row.get(1)?),
                    })
                },
            )
            .optional()
            .map_err(|e| StratusError::Storage(e.to_string()))
        })
    }

    // =========================================================================
    // Administrative deletes
    // =========================================================================

    /// Delete every instance row across all customers. Link rows are left
    /// in place; this is an administrative/test operation, not lifecycle.
    pub fn delete_instances(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM instances", [])
                .map_err(|e| StratusError::Storage(e.to_string()))
        })
    }

    /// Delete every group row across all customers.
    pub fn delete_groups(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM groups", [])
                .map_err(|e| StratusError::Storage(e.to_string()))
        })
    }
}

// =============================================================================
// Statement helpers
// =============================================================================

/// Insert a stub group row for a relationship reference unless the group
/// already exists. A stub never overwrites a fuller record.
fn ensure_group(conn: &Connection, customer_id: &str, group: &GroupRef, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO groups (name, customer_id, type, data, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (customer_id, name) DO NOTHING",
        rusqlite::params![group.name, customer_id, group.kind, group.data.to_string(), now],
    )
    .map_err(|e| StratusError::Storage(format!("Failed to ensure group: {}", e)))?;
    Ok(())
}

/// Insert a stub instance row for a relationship reference unless the
/// instance already exists.
fn ensure_instance(
    conn: &Connection,
    customer_id: &str,
    instance: &InstanceRef,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO instances (id, customer_id, type, data, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (customer_id, id) DO NOTHING",
        rusqlite::params![
            instance.id,
            customer_id,
            instance.kind,
            instance.data.to_string(),
            now
        ],
    )
    .map_err(|e| StratusError::Storage(format!("Failed to ensure instance: {}", e)))?;
    Ok(())
}

/// Idempotently record group membership for one (customer, group, instance).
fn link(conn: &Connection, customer_id: &str, group_name: &str, instance_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO groups_instances (customer_id, group_name, instance_id)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (customer_id, group_name, instance_id) DO NOTHING",
        rusqlite::params![customer_id, group_name, instance_id],
    )
    .map_err(|e| StratusError::Storage(format!("Failed to link instance to group: {}", e)))?;
    Ok(())
}

/// Build the WHERE clause shared by instance list and count queries.
fn instance_query<'a>(
    prefix: &str,
    filter: &'a InstanceFilter,
) -> (String, Vec<&'a dyn rusqlite::ToSql>) {
    let mut sql = format!("{} WHERE customer_id = ?1", prefix);
    let mut params: Vec<&dyn rusqlite::ToSql> = vec![&filter.customer_id];

    if let Some(group) = &filter.group_id {
        params.push(group);
        sql.push_str(&format!(
            " AND id IN (SELECT instance_id FROM groups_instances
               WHERE customer_id = ?1 AND group_name = ?{})",
            params.len()
        ));
    }
    if let Some(kind) = &filter.kind {
        params.push(kind);
        sql.push_str(&format!(" AND type = ?{}", params.len()));
    }

    (sql, params)
}

// =============================================================================
// Row conversion
// =============================================================================

fn ts_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn row_to_instance(row: &rusqlite::Row<'_>) -> rusqlite::Result<Instance> {
    let data: String = row.get(3)?;
    Ok(Instance {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        kind: row.get(2)?,
        data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        updated_at: Some(ts_to_datetime(row.get(4)?)),
        groups: Vec::new(),
    })
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let data: String = row.get(3)?;
    Ok(Group {
        name: row.get(0)?,
        customer_id: row.get(1)?,
        kind: row.get(2)?,
        data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        updated_at: Some(ts_to_datetime(row.get(4)?)),
        instances: Vec::new(),
    })
}
