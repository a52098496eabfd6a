//! Mock cloud client for unit testing
//!
//! This module provides an in-memory implementation of `CloudNetworkGateway`
//! that can be used in unit tests without a running OpenStack deployment.
//!
//! The mock is organized into domain-specific modules:
//! - `network.rs` - floating IPs, networks, subnets and ports
//! - `compute.rs` - servers and interface attachment
//!
//! Every gateway call is appended to a call log so tests can assert ordering,
//! and any operation can be made to fail on demand.

mod compute;
mod network;

use crate::error::CloudError;
use crate::gateway::CloudNetworkGateway;
use crate::models::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Gateway operations, used for the call log and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ValidateToken,
    ListFloatingIps,
    FindFloatingIp,
    CreateFloatingIp,
    AttachFloatingIp,
    DetachFloatingIp,
    ListExternalNetworks,
    ListSubnets,
    ListPorts,
    GetVmPorts,
    CreatePort,
    AttachPortToVm,
    GetServer,
}

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: Operation,
    /// VM the call targeted, when the operation takes one
    pub vm_id: Option<String>,
    /// Floating IP address the call targeted, when the operation takes one
    pub address: Option<IpAddr>,
}

/// Mock cloud client for testing
///
/// Stores resources in memory; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MockCloudClient {
    pub(crate) floating_ips: Arc<Mutex<BTreeMap<String, FloatingIp>>>,
    pub(crate) networks: Arc<Mutex<BTreeMap<String, Network>>>,
    pub(crate) subnets: Arc<Mutex<Vec<Subnet>>>,
    pub(crate) ports: Arc<Mutex<BTreeMap<String, Port>>>,
    pub(crate) servers: Arc<Mutex<HashMap<String, Server>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    failing: Arc<Mutex<HashSet<Operation>>>,
    latency: Arc<Mutex<Option<Duration>>>,
    // Counter for generating IDs
    next_id: Arc<Mutex<u64>>,
}

impl MockCloudClient {
    /// Create a new, empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network (for test setup)
    pub fn add_network(&self, id: &str, external: bool) {
        self.networks.lock().insert(
            id.to_string(),
            Network {
                id: id.to_string(),
                name: Some(id.to_string()),
                router_external: external,
                status: Some("ACTIVE".to_string()),
            },
        );
    }

    /// Add a subnet with the given allocation pools (for test setup)
    pub fn add_subnet(&self, id: &str, network_id: &str, ip_version: u8, pools: &[(&str, &str)]) {
        self.subnets.lock().push(Subnet {
            id: id.to_string(),
            network_id: network_id.to_string(),
            ip_version,
            cidr: None,
            name: Some(id.to_string()),
            allocation_pools: pools
                .iter()
                .map(|(start, end)| AllocationPool {
                    start: (*start).to_string(),
                    end: (*end).to_string(),
                })
                .collect(),
        });
    }

    /// Add a server (for test setup)
    pub fn add_server(&self, id: &str, name: &str) {
        self.servers.lock().insert(
            id.to_string(),
            Server {
                id: id.to_string(),
                name: name.to_string(),
                status: Some("ACTIVE".to_string()),
            },
        );
    }

    /// Add a port owned by `device_id` with the given fixed IPs (for test setup)
    pub fn add_port(&self, id: &str, network_id: &str, device_id: &str, fixed_ips: &[&str]) {
        self.ports.lock().insert(
            id.to_string(),
            Port {
                id: id.to_string(),
                network_id: network_id.to_string(),
                device_id: device_id.to_string(),
                fixed_ips: fixed_ips
                    .iter()
                    .map(|ip| FixedIp {
                        subnet_id: format!("{network_id}-subnet"),
                        ip_address: (*ip).to_string(),
                    })
                    .collect(),
                status: Some("ACTIVE".to_string()),
            },
        );
    }

    /// Add a floating IP record, optionally bound to a port (for test setup)
    pub fn add_floating_ip(
        &self,
        address: &str,
        network_id: &str,
        project_id: Option<&str>,
        binding: Option<(&str, &str)>,
    ) {
        let id = format!("fip-{}", self.next_id());
        self.floating_ips.lock().insert(
            address.to_string(),
            FloatingIp {
                id,
                floating_ip_address: address.to_string(),
                floating_network_id: network_id.to_string(),
                port_id: binding.map(|(port, _)| port.to_string()),
                fixed_ip_address: binding.map(|(_, fixed)| fixed.to_string()),
                project_id: project_id.map(str::to_string),
                status: Some(if binding.is_some() { "ACTIVE" } else { "DOWN" }.to_string()),
                description: None,
            },
        );
    }

    /// Current floating IP record for an address
    pub fn floating_ip(&self, address: &str) -> Option<FloatingIp> {
        self.floating_ips.lock().get(address).cloned()
    }

    /// Delete a floating IP record, as an out-of-band deletion would
    pub fn remove_floating_ip(&self, address: &str) -> Option<FloatingIp> {
        self.floating_ips.lock().remove(address)
    }

    /// Make every subsequent call of `operation` fail with a 503-style API error
    pub fn fail_on(&self, operation: Operation) {
        self.failing.lock().insert(operation);
    }

    /// Stop failing `operation`
    pub fn recover(&self, operation: Operation) {
        self.failing.lock().remove(&operation);
    }

    /// Delay every call by `latency` (lets concurrent tests interleave)
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Snapshot of the call log
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Operations in call order
    pub fn operations(&self) -> Vec<Operation> {
        self.calls.lock().iter().map(|c| c.operation).collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Generate next ID
    pub(crate) fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock();
        *id += 1;
        *id
    }

    /// Record the call, wait out the configured latency, then apply failure injection
    pub(crate) async fn enter(
        &self,
        operation: Operation,
        vm_id: Option<&str>,
        address: Option<IpAddr>,
    ) -> Result<(), CloudError> {
        self.calls.lock().push(RecordedCall {
            operation,
            vm_id: vm_id.map(str::to_string),
            address,
        });
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.lock().contains(&operation) {
            return Err(CloudError::Api(format!("{operation:?} failed: 503 Service Unavailable")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CloudNetworkGateway for MockCloudClient {
    async fn validate_token(&self) -> Result<(), CloudError> {
        self.enter(Operation::ValidateToken, None, None).await
    }

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>, CloudError> {
        network::list_floating_ips(self).await
    }

    async fn find_floating_ip(&self, address: IpAddr) -> Result<Option<FloatingIp>, CloudError> {
        network::find_floating_ip(self, address).await
    }

    async fn create_floating_ip(&self, network_id: &str, address: IpAddr, project_id: Option<&str>) -> Result<FloatingIp, CloudError> {
        network::create_floating_ip(self, network_id, address, project_id).await
    }

    async fn attach_floating_ip(&self, vm_id: &str, address: IpAddr, port_id: &str, fixed_ip: IpAddr) -> Result<(), CloudError> {
        network::attach_floating_ip(self, vm_id, address, port_id, fixed_ip).await
    }

    async fn detach_floating_ip(&self, vm_id: &str, address: IpAddr) -> Result<(), CloudError> {
        network::detach_floating_ip(self, vm_id, address).await
    }

    async fn list_external_networks(&self) -> Result<Vec<Network>, CloudError> {
        network::list_external_networks(self).await
    }

    async fn list_subnets(&self, network_id: &str) -> Result<Vec<Subnet>, CloudError> {
        network::list_subnets(self, network_id).await
    }

    async fn list_ports(&self) -> Result<Vec<Port>, CloudError> {
        network::list_ports(self).await
    }

    async fn get_vm_ports(&self, vm_id: &str) -> Result<Vec<Port>, CloudError> {
        network::get_vm_ports(self, vm_id).await
    }

    async fn create_port(&self, network_id: &str) -> Result<Port, CloudError> {
        network::create_port(self, network_id).await
    }

    async fn attach_port_to_vm(&self, vm_id: &str, port_id: &str) -> Result<(), CloudError> {
        compute::attach_port_to_vm(self, vm_id, port_id).await
    }

    async fn get_server(&self, vm_id: &str) -> Result<Server, CloudError> {
        compute::get_server(self, vm_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn seeded() -> MockCloudClient {
        let mock = MockCloudClient::new();
        mock.add_network("ext-net", true);
        mock.add_network("private", false);
        mock.add_server("vm-1", "web-1");
        mock.add_port("port-1", "private", "vm-1", &["10.0.0.5"]);
        mock
    }

    #[tokio::test]
    async fn test_create_then_attach_and_detach() {
        let mock = seeded();
        let address = ip("203.0.113.10");

        mock.create_floating_ip("ext-net", address, Some("proj-a")).await.unwrap();
        mock.attach_floating_ip("vm-1", address, "port-1", ip("10.0.0.5")).await.unwrap();
        let fip = mock.floating_ip("203.0.113.10").unwrap();
        assert_eq!(fip.port_id.as_deref(), Some("port-1"));
        assert!(fip.is_bound());

        mock.detach_floating_ip("vm-1", address).await.unwrap();
        assert!(!mock.floating_ip("203.0.113.10").unwrap().is_bound());

        assert_eq!(
            mock.operations(),
            vec![Operation::CreateFloatingIp, Operation::AttachFloatingIp, Operation::DetachFloatingIp]
        );
    }

    #[tokio::test]
    async fn test_create_existing_address_conflicts() {
        let mock = seeded();
        mock.add_floating_ip("203.0.113.10", "ext-net", None, None);

        let err = mock
            .create_floating_ip("ext-net", ip("203.0.113.10"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_detach_from_other_vm_is_not_attached() {
        let mock = seeded();
        mock.add_server("vm-2", "web-2");
        mock.add_floating_ip("203.0.113.10", "ext-net", Some("proj-a"), Some(("port-1", "10.0.0.5")));

        let err = mock.detach_floating_ip("vm-2", ip("203.0.113.10")).await.unwrap_err();
        assert!(matches!(err, CloudError::NotAttached(_)));
        assert!(mock.floating_ip("203.0.113.10").unwrap().is_bound());
    }

    #[tokio::test]
    async fn test_failure_injection_and_recovery() {
        let mock = seeded();
        mock.fail_on(Operation::ListFloatingIps);
        assert!(matches!(mock.list_floating_ips().await, Err(CloudError::Api(_))));

        mock.recover(Operation::ListFloatingIps);
        assert!(mock.list_floating_ips().await.unwrap().is_empty());
        // failed calls are still logged
        assert_eq!(mock.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_created_port_attaches_to_server() {
        let mock = seeded();
        let port = mock.create_port("private").await.unwrap();
        assert!(port.device_id.is_empty());

        mock.attach_port_to_vm("vm-1", &port.id).await.unwrap();
        let vm_ports = mock.get_vm_ports("vm-1").await.unwrap();
        assert_eq!(vm_ports.len(), 2);

        let err = mock.attach_port_to_vm("vm-missing", &port.id).await.unwrap_err();
        assert!(matches!(err, CloudError::NotFound(_)));
    }
}
