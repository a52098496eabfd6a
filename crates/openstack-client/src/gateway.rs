//! CloudNetworkGateway trait for mocking
//!
//! This trait abstracts the OpenStack client to enable mocking in unit tests.
//! The concrete `OpenStackClient` implements this trait, and tests can use the
//! in-memory `MockCloudClient`.

use std::net::IpAddr;

use crate::error::CloudError;
use crate::models::*;

/// Floating IP related operations of the cloud's network/compute APIs.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Implementations must surface every remote failure as an error; callers rely
/// on that to avoid acting on stale or partial data.
#[async_trait::async_trait]
pub trait CloudNetworkGateway: Send + Sync {
    /// Validate the token/connectivity (used once at startup)
    async fn validate_token(&self) -> Result<(), CloudError>;

    // Floating IPs
    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>, CloudError>;
    async fn find_floating_ip(&self, address: IpAddr) -> Result<Option<FloatingIp>, CloudError>;
    /// Fails with [`CloudError::Conflict`] if the address already exists
    async fn create_floating_ip(&self, network_id: &str, address: IpAddr, project_id: Option<&str>) -> Result<FloatingIp, CloudError>;
    async fn attach_floating_ip(&self, vm_id: &str, address: IpAddr, port_id: &str, fixed_ip: IpAddr) -> Result<(), CloudError>;
    /// Fails with [`CloudError::NotAttached`] if the address is not bound to one of `vm_id`'s ports
    async fn detach_floating_ip(&self, vm_id: &str, address: IpAddr) -> Result<(), CloudError>;

    // Networks
    async fn list_external_networks(&self) -> Result<Vec<Network>, CloudError>;
    async fn list_subnets(&self, network_id: &str) -> Result<Vec<Subnet>, CloudError>;

    // Ports
    async fn list_ports(&self) -> Result<Vec<Port>, CloudError>;
    async fn get_vm_ports(&self, vm_id: &str) -> Result<Vec<Port>, CloudError>;
    async fn create_port(&self, network_id: &str) -> Result<Port, CloudError>;
    async fn attach_port_to_vm(&self, vm_id: &str, port_id: &str) -> Result<(), CloudError>;

    // Compute
    async fn get_server(&self, vm_id: &str) -> Result<Server, CloudError>;
}
