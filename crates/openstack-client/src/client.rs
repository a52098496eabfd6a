//! OpenStack API client
//!
//! Implements the floating IP, network, port and server calls against the
//! Networking v2.0 (`/v2.0/...`) and Compute v2.1 (`/servers/...`) REST APIs.

use crate::common::HttpClient;
use crate::common::query::query_resources;
use crate::error::CloudError;
use crate::gateway::CloudNetworkGateway;
use crate::models::*;
use reqwest::Client;
use serde_json::json;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

/// OpenStack API client
#[derive(Debug, Clone)]
pub struct OpenStackClient {
    network: HttpClient,
    compute: HttpClient,
}

impl OpenStackClient {
    /// Create a new OpenStack client
    ///
    /// # Arguments
    /// * `network_url` - Networking endpoint (e.g., "http://neutron:9696")
    /// * `compute_url` - Compute endpoint including version (e.g., "http://nova:8774/v2.1")
    /// * `token` - Pre-issued Keystone token
    /// * `timeout` - Per-request timeout applied to every call
    pub fn new(
        network_url: String,
        compute_url: String,
        token: String,
        timeout: Duration,
    ) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CloudError::Http)?;

        Ok(Self {
            network: HttpClient::new(client.clone(), network_url, token.clone()),
            compute: HttpClient::new(client, compute_url, token),
        })
    }

    /// Networking endpoint base URL
    pub fn network_url(&self) -> &str {
        self.network.base_url()
    }

    /// Compute endpoint base URL
    pub fn compute_url(&self) -> &str {
        self.compute.base_url()
    }

    async fn floating_ip_by_address(&self, address: IpAddr) -> Result<FloatingIp, CloudError> {
        self.find_floating_ip(address)
            .await?
            .ok_or_else(|| CloudError::NotFound(format!("Floating IP {} not found", address)))
    }
}

#[async_trait::async_trait]
impl CloudNetworkGateway for OpenStackClient {
    /// Validate the token by listing networks with a limit of one.
    ///
    /// # Returns
    /// * `Ok(())` - Token is valid and the Networking API is reachable
    /// * `Err(CloudError)` - Token is invalid or the endpoint is unreachable
    async fn validate_token(&self) -> Result<(), CloudError> {
        debug!("Validating OpenStack token and connectivity");
        let url = self.network.build_url("/v2.0/networks?limit=1");
        let _: Vec<Network> = self.network.fetch_all_pages(url, "networks").await?;
        debug!("Token validated successfully");
        Ok(())
    }

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>, CloudError> {
        query_resources(&self.network, "floatingips", &[]).await
    }

    async fn find_floating_ip(&self, address: IpAddr) -> Result<Option<FloatingIp>, CloudError> {
        let address = address.to_string();
        let mut found: Vec<FloatingIp> =
            query_resources(&self.network, "floatingips", &[("floating_ip_address", &address)]).await?;
        // the filter is exact, more than one hit means the cloud is confused
        if found.len() > 1 {
            return Err(CloudError::Conflict(format!(
                "{} floating IP records exist for {}",
                found.len(),
                address
            )));
        }
        Ok(found.pop())
    }

    async fn create_floating_ip(
        &self,
        network_id: &str,
        address: IpAddr,
        project_id: Option<&str>,
    ) -> Result<FloatingIp, CloudError> {
        info!("Creating floating IP {} on network {}", address, network_id);
        let request = CreateFloatingIpRequest {
            floating_network_id: network_id.to_string(),
            floating_ip_address: address.to_string(),
            project_id: project_id.map(str::to_string),
        };
        let body = json!({ "floatingip": request });
        self.network.post("/v2.0/floatingips", &body, "floatingip").await
    }

    async fn attach_floating_ip(
        &self,
        vm_id: &str,
        address: IpAddr,
        port_id: &str,
        fixed_ip: IpAddr,
    ) -> Result<(), CloudError> {
        let fip = self.floating_ip_by_address(address).await?;
        info!("Associating floating IP {} with port {} ({}) of VM {}", address, port_id, fixed_ip, vm_id);
        let request = UpdateFloatingIpRequest {
            port_id: Some(port_id.to_string()),
            fixed_ip_address: Some(fixed_ip.to_string()),
        };
        let body = json!({ "floatingip": request });
        self.network.put(&format!("/v2.0/floatingips/{}", fip.id), &body).await
    }

    async fn detach_floating_ip(&self, vm_id: &str, address: IpAddr) -> Result<(), CloudError> {
        let fip = self.floating_ip_by_address(address).await?;
        let Some(port_id) = fip.port_id.clone().filter(|p| !p.is_empty()) else {
            return Err(CloudError::NotAttached(format!("{} has no port association", address)));
        };

        let vm_ports = self.get_vm_ports(vm_id).await?;
        if !vm_ports.iter().any(|p| p.id == port_id) {
            return Err(CloudError::NotAttached(format!(
                "{} is bound to port {} which does not belong to VM {}",
                address, port_id, vm_id
            )));
        }

        info!("Disassociating floating IP {} from port {} of VM {}", address, port_id, vm_id);
        let request = UpdateFloatingIpRequest {
            port_id: None,
            fixed_ip_address: None,
        };
        let body = json!({ "floatingip": request });
        self.network.put(&format!("/v2.0/floatingips/{}", fip.id), &body).await
    }

    async fn list_external_networks(&self) -> Result<Vec<Network>, CloudError> {
        let networks: Vec<Network> =
            query_resources(&self.network, "networks", &[("router:external", "true")]).await?;
        // the filter is advisory on some deployments, so re-check the flag
        Ok(networks.into_iter().filter(|n| n.router_external).collect())
    }

    async fn list_subnets(&self, network_id: &str) -> Result<Vec<Subnet>, CloudError> {
        query_resources(&self.network, "subnets", &[("network_id", network_id)]).await
    }

    async fn list_ports(&self) -> Result<Vec<Port>, CloudError> {
        query_resources(&self.network, "ports", &[]).await
    }

    async fn get_vm_ports(&self, vm_id: &str) -> Result<Vec<Port>, CloudError> {
        query_resources(&self.network, "ports", &[("device_id", vm_id)]).await
    }

    async fn create_port(&self, network_id: &str) -> Result<Port, CloudError> {
        info!("Creating port on network {}", network_id);
        let request = CreatePortRequest {
            network_id: network_id.to_string(),
            name: Some(format!("fip-port-{}", uuid::Uuid::new_v4())),
        };
        let body = json!({ "port": request });
        self.network.post("/v2.0/ports", &body, "port").await
    }

    async fn attach_port_to_vm(&self, vm_id: &str, port_id: &str) -> Result<(), CloudError> {
        info!("Attaching port {} to VM {}", port_id, vm_id);
        let body = json!({ "interfaceAttachment": { "port_id": port_id } });
        let _: serde_json::Value = self
            .compute
            .post(&format!("/servers/{}/os-interface", vm_id), &body, "interfaceAttachment")
            .await?;
        Ok(())
    }

    async fn get_server(&self, vm_id: &str) -> Result<Server, CloudError> {
        self.compute.get(&format!("/servers/{}", vm_id), "server").await
    }
}
