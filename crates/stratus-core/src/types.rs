//! Shared entity model for the inventory snapshot.
//!
//! Every entity is scoped by an opaque customer identifier; identity keys
//! and query predicates are always customer-scoped. The `data` payload is
//! carried through storage untouched; its schema belongs to the ingestion
//! layer that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Entities
// =============================================================================

/// A compute instance (EC2 or RDS) discovered for a customer.
///
/// Identity key is `(customer_id, id)`. The `groups` field declares
/// relationships to carry along with a write; it is not populated on reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub customer_id: String,
    /// Instance flavor, e.g. "ec2" or "rds".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupRef>,
}

/// A logical grouping of instances (security group, load balancer, or RDS
/// security group). Identity key is `(customer_id, name)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub customer_id: String,
    /// Group flavor, e.g. "security", "elb", or "rds-security".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceRef>,
}

/// A relationship declaration from an instance write to a group.
///
/// When the referenced group does not exist yet, a stub row is created from
/// this reference; a stub never overwrites a fuller existing record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupRef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A relationship declaration from a group write to a member instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A VPC route table. No relationships; same upsert discipline as Instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteTable {
    pub id: String,
    pub customer_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A VPC subnet. No relationships; same upsert discipline as Instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub customer_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One row per tenant. `last_sync` is the timestamp of the most recent
/// successful write of any entity belonging to that customer, and only ever
/// advances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub last_sync: DateTime<Utc>,
}

/// The closed set of storable entity kinds.
///
/// Write dispatch matches on this enum rather than inspecting types at
/// runtime; adding a kind is a compile-time change at every match site.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    Instance(Instance),
    Group(Group),
    RouteTable(RouteTable),
    Subnet(Subnet),
}

impl Entity {
    /// The customer this entity belongs to.
    pub fn customer_id(&self) -> &str {
        match self {
            Entity::Instance(i) => &i.customer_id,
            Entity::Group(g) => &g.customer_id,
            Entity::RouteTable(rt) => &rt.customer_id,
            Entity::Subnet(s) => &s.customer_id,
        }
    }

    /// The identity key within the customer scope (id or name).
    pub fn key(&self) -> &str {
        match self {
            Entity::Instance(i) => &i.id,
            Entity::Group(g) => &g.name,
            Entity::RouteTable(rt) => &rt.id,
            Entity::Subnet(s) => &s.id,
        }
    }

    /// A short label for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Entity::Instance(_) => "instance",
            Entity::Group(_) => "group",
            Entity::RouteTable(_) => "route_table",
            Entity::Subnet(_) => "subnet",
        }
    }
}

// =============================================================================
// Query filters and read views
// =============================================================================

/// Filter for instance list/count operations. `customer_id` is required;
/// `kind` narrows by instance flavor; `group_id` restricts to members of
/// one group via the link table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstanceFilter {
    #[serde(default)]
    pub customer_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Filter for group list/count operations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroupFilter {
    #[serde(default)]
    pub customer_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A group as served by read queries: the row plus the derived distinct
/// member count, and (for point lookups only) the member instances.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupView {
    #[serde(flatten)]
    pub group: Group,
    pub instance_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Instance>,
}
