//! Vendor payload normalization.
//!
//! Maps each message type onto the entity model: identity fields are pulled
//! out of the vendor document, relationship declarations become stub
//! references, and the document itself becomes the opaque `data` payload.

use serde_json::Value;

use stratus_core::error::{Result, StratusError};
use stratus_core::types::{Entity, Group, GroupRef, Instance, InstanceRef, RouteTable, Subnet};

use crate::envelope::{DiscoveryEvent, MessageType};

/// Decode the envelope's vendor JSON and normalize it into an entity record.
pub fn normalize(event: &DiscoveryEvent) -> Result<Entity> {
    let body: Value = serde_json::from_str(&event.message_body)
        .map_err(|e| StratusError::Decode(format!("Invalid message body: {}", e)))?;

    let entity = match event.message_type {
        MessageType::Instance => Entity::Instance(Instance {
            id: required_str(&body, "InstanceId")?,
            customer_id: event.customer_id.clone(),
            kind: "ec2".to_string(),
            groups: str_list(&body, "SecurityGroups", "GroupName")
                .into_iter()
                .map(|name| GroupRef {
                    name,
                    kind: "security".to_string(),
                    data: Value::Null,
                })
                .collect(),
            data: body,
            updated_at: None,
        }),

        MessageType::DbInstance => Entity::Instance(Instance {
            id: required_str(&body, "DBInstanceIdentifier")?,
            customer_id: event.customer_id.clone(),
            kind: "rds".to_string(),
            groups: str_list(&body, "DBSecurityGroups", "DBSecurityGroupName")
                .into_iter()
                .map(|name| GroupRef {
                    name,
                    kind: "rds-security".to_string(),
                    data: Value::Null,
                })
                .collect(),
            data: body,
            updated_at: None,
        }),

        MessageType::SecurityGroup => Entity::Group(Group {
            name: required_str(&body, "GroupName")?,
            customer_id: event.customer_id.clone(),
            kind: "security".to_string(),
            instances: Vec::new(),
            data: body,
            updated_at: None,
        }),

        MessageType::LoadBalancerDescription => Entity::Group(Group {
            name: required_str(&body, "LoadBalancerName")?,
            customer_id: event.customer_id.clone(),
            kind: "elb".to_string(),
            instances: str_list(&body, "Instances", "InstanceId")
                .into_iter()
                .map(|id| InstanceRef {
                    id,
                    kind: "ec2".to_string(),
                    data: Value::Null,
                })
                .collect(),
            data: body,
            updated_at: None,
        }),

        MessageType::DbSecurityGroup => Entity::Group(Group {
            name: required_str(&body, "DBSecurityGroupName")?,
            customer_id: event.customer_id.clone(),
            kind: "rds-security".to_string(),
            instances: Vec::new(),
            data: body,
            updated_at: None,
        }),

        MessageType::RouteTable => Entity::RouteTable(RouteTable {
            id: required_str(&body, "RouteTableId")?,
            customer_id: event.customer_id.clone(),
            data: body,
            updated_at: None,
        }),

        MessageType::Subnet => Entity::Subnet(Subnet {
            id: required_str(&body, "SubnetId")?,
            customer_id: event.customer_id.clone(),
            data: body,
            updated_at: None,
        }),
    };

    Ok(entity)
}

fn required_str(body: &Value, field: &str) -> Result<String> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| StratusError::Decode(format!("Message body missing {}", field)))
}

/// Collect `field` from every element of the array at `list`, skipping
/// elements that lack it.
fn str_list(body: &Value, list: &str, field: &str) -> Vec<String> {
    body.get(list)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(field).and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(message_type: MessageType, body: &str) -> DiscoveryEvent {
        DiscoveryEvent {
            customer_id: "cust-1".to_string(),
            message_type,
            message_body: body.to_string(),
        }
    }

    #[test]
    fn test_ec2_instance_with_security_groups() {
        let body = r#"{
            "InstanceId": "i-0123456789abcdef0",
            "InstanceType": "m4.large",
            "State": {"Name": "running"},
            "SecurityGroups": [
                {"GroupId": "sg-1", "GroupName": "web"},
                {"GroupId": "sg-2", "GroupName": "ssh"}
            ]
        }"#;

        let entity = normalize(&event(MessageType::Instance, body)).unwrap();
        let Entity::Instance(instance) = entity else {
            panic!("expected instance");
        };
        assert_eq!(instance.id, "i-0123456789abcdef0");
        assert_eq!(instance.customer_id, "cust-1");
        assert_eq!(instance.kind, "ec2");
        assert_eq!(instance.groups.len(), 2);
        assert_eq!(instance.groups[0].name, "web");
        assert_eq!(instance.groups[0].kind, "security");
        // The whole vendor document survives as the payload.
        assert_eq!(instance.data["InstanceType"], "m4.large");
    }

    #[test]
    fn test_rds_instance() {
        let body = r#"{
            "DBInstanceIdentifier": "prod-db",
            "Engine": "postgres",
            "DBSecurityGroups": [{"DBSecurityGroupName": "db-access", "Status": "active"}]
        }"#;

        let entity = normalize(&event(MessageType::DbInstance, body)).unwrap();
        let Entity::Instance(instance) = entity else {
            panic!("expected instance");
        };
        assert_eq!(instance.id, "prod-db");
        assert_eq!(instance.kind, "rds");
        assert_eq!(instance.groups.len(), 1);
        assert_eq!(instance.groups[0].kind, "rds-security");
    }

    #[test]
    fn test_security_group() {
        let body = r#"{"GroupId": "sg-1", "GroupName": "web", "Description": "web tier"}"#;

        let entity = normalize(&event(MessageType::SecurityGroup, body)).unwrap();
        let Entity::Group(group) = entity else {
            panic!("expected group");
        };
        assert_eq!(group.name, "web");
        assert_eq!(group.kind, "security");
        assert!(group.instances.is_empty());
    }

    #[test]
    fn test_load_balancer_with_members() {
        let body = r#"{
            "LoadBalancerName": "frontend",
            "DNSName": "frontend.example.com",
            "Instances": [{"InstanceId": "i-a"}, {"InstanceId": "i-b"}]
        }"#;

        let entity = normalize(&event(MessageType::LoadBalancerDescription, body)).unwrap();
        let Entity::Group(group) = entity else {
            panic!("expected group");
        };
        assert_eq!(group.name, "frontend");
        assert_eq!(group.kind, "elb");
        assert_eq!(group.instances.len(), 2);
        assert_eq!(group.instances[1].id, "i-b");
        assert_eq!(group.instances[1].kind, "ec2");
    }

    #[test]
    fn test_db_security_group() {
        let body = r#"{"DBSecurityGroupName": "db-access", "OwnerId": "123456789012"}"#;

        let entity = normalize(&event(MessageType::DbSecurityGroup, body)).unwrap();
        let Entity::Group(group) = entity else {
            panic!("expected group");
        };
        assert_eq!(group.name, "db-access");
        assert_eq!(group.kind, "rds-security");
    }

    #[test]
    fn test_route_table_and_subnet() {
        let entity = normalize(&event(
            MessageType::RouteTable,
            r#"{"RouteTableId": "rtb-1", "VpcId": "vpc-1"}"#,
        ))
        .unwrap();
        assert!(matches!(entity, Entity::RouteTable(ref rt) if rt.id == "rtb-1"));

        let entity = normalize(&event(
            MessageType::Subnet,
            r#"{"SubnetId": "subnet-1", "CidrBlock": "10.0.0.0/24"}"#,
        ))
        .unwrap();
        assert!(matches!(entity, Entity::Subnet(ref s) if s.id == "subnet-1"));
    }

    #[test]
    fn test_invalid_body_is_a_decode_error() {
        let err = normalize(&event(MessageType::Instance, "not json")).unwrap_err();
        assert!(matches!(err, StratusError::Decode(_)));
    }

    #[test]
    fn test_missing_identity_field_is_a_decode_error() {
        let err = normalize(&event(MessageType::Instance, r#"{"InstanceType": "m4.large"}"#))
            .unwrap_err();
        assert!(matches!(err, StratusError::Decode(_)));
        assert!(err.to_string().contains("InstanceId"));
    }

    #[test]
    fn test_group_elements_without_names_are_skipped() {
        let body = r#"{
            "InstanceId": "i-1",
            "SecurityGroups": [{"GroupId": "sg-1"}, {"GroupName": "web"}]
        }"#;

        let entity = normalize(&event(MessageType::Instance, body)).unwrap();
        let Entity::Instance(instance) = entity else {
            panic!("expected instance");
        };
        assert_eq!(instance.groups.len(), 1);
        assert_eq!(instance.groups[0].name, "web");
    }
}
