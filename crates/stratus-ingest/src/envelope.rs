//! The discovery event envelope as it arrives off the message bus.

use serde::{Deserialize, Serialize};

/// Vendor message kinds carried by the discovery feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// An EC2 instance description.
    Instance,
    /// An RDS database instance description.
    #[serde(rename = "DBInstance")]
    DbInstance,
    /// An EC2 security group.
    SecurityGroup,
    /// A classic load balancer description.
    LoadBalancerDescription,
    /// An RDS security group.
    #[serde(rename = "DBSecurityGroup")]
    DbSecurityGroup,
    /// A VPC route table.
    RouteTable,
    /// A VPC subnet.
    Subnet,
}

/// One discovery event: the tenant it belongs to, what kind of document the
/// body is, and the raw vendor JSON itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    #[serde(rename = "customerId")]
    pub customer_id: String,
    #[serde(rename = "messageType")]
    pub message_type: MessageType,
    #[serde(rename = "messageBody")]
    pub message_body: String,
}
