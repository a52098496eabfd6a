//! OpenStack API models
//!
//! These models match the Networking v2.0 and Compute v2.1 JSON bodies.
//! Only the fields the floating IP subsystem reads are modelled; unknown
//! fields are ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Floating IP (`/v2.0/floatingips`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: String,
    pub floating_network_id: String,
    /// Port the floating IP is associated with, if any
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub fixed_ip_address: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FloatingIp {
    /// Whether the floating IP is currently associated with a port.
    pub fn is_bound(&self) -> bool {
        self.port_id.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Network (`/v2.0/networks`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `router:external` flag; external networks are the floating IP source
    #[serde(rename = "router:external", default)]
    pub router_external: bool,
    #[serde(default)]
    pub status: Option<String>,
}

/// Allocation pool of a subnet, inclusive on both ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPool {
    pub start: String,
    pub end: String,
}

/// Subnet (`/v2.0/subnets`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub network_id: String,
    pub ip_version: u8, // 4 or 6
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub allocation_pools: Vec<AllocationPool>,
}

/// Fixed IP entry of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: String,
}

/// Port (`/v2.0/ports`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub network_id: String,
    /// Owning device (server id for VM ports), empty when unbound
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Server (`/servers/{id}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Request body for creating a floating IP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFloatingIpRequest {
    pub floating_network_id: String,
    pub floating_ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// Request body for associating/disassociating a floating IP.
/// `port_id: None` serializes as `null`, which disassociates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFloatingIpRequest {
    pub port_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_ip_address: Option<String>,
}

/// Request body for creating a port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePortRequest {
    pub network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
