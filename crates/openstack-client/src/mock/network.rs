//! Network operations for MockCloudClient
//!
//! Handles floating IPs, external networks, subnets and ports

use super::{MockCloudClient, Operation};
use crate::error::CloudError;
use crate::models::*;
use std::net::IpAddr;

pub async fn list_floating_ips(client: &MockCloudClient) -> Result<Vec<FloatingIp>, CloudError> {
    client.enter(Operation::ListFloatingIps, None, None).await?;
    Ok(client.floating_ips.lock().values().cloned().collect())
}

pub async fn find_floating_ip(client: &MockCloudClient, address: IpAddr) -> Result<Option<FloatingIp>, CloudError> {
    client.enter(Operation::FindFloatingIp, None, Some(address)).await?;
    Ok(client.floating_ips.lock().get(&address.to_string()).cloned())
}

pub async fn create_floating_ip(
    client: &MockCloudClient,
    network_id: &str,
    address: IpAddr,
    project_id: Option<&str>,
) -> Result<FloatingIp, CloudError> {
    client.enter(Operation::CreateFloatingIp, None, Some(address)).await?;

    if !client.networks.lock().contains_key(network_id) {
        return Err(CloudError::NotFound(format!("Network {} not found", network_id)));
    }

    let id = format!("fip-{}", client.next_id());
    let mut floating_ips = client.floating_ips.lock();
    let key = address.to_string();
    if floating_ips.contains_key(&key) {
        return Err(CloudError::Conflict(format!("IP address {} already allocated", address)));
    }

    let fip = FloatingIp {
        id,
        floating_ip_address: key.clone(),
        floating_network_id: network_id.to_string(),
        port_id: None,
        fixed_ip_address: None,
        project_id: project_id.map(str::to_string),
        status: Some("DOWN".to_string()),
        description: None,
    };
    floating_ips.insert(key, fip.clone());
    Ok(fip)
}

pub async fn attach_floating_ip(
    client: &MockCloudClient,
    vm_id: &str,
    address: IpAddr,
    port_id: &str,
    fixed_ip: IpAddr,
) -> Result<(), CloudError> {
    client.enter(Operation::AttachFloatingIp, Some(vm_id), Some(address)).await?;

    {
        let ports = client.ports.lock();
        let port = ports
            .get(port_id)
            .ok_or_else(|| CloudError::NotFound(format!("Port {} not found", port_id)))?;
        let fixed = fixed_ip.to_string();
        if !port.fixed_ips.iter().any(|f| f.ip_address == fixed) {
            return Err(CloudError::InvalidRequest(format!(
                "Port {} has no fixed IP {}",
                port_id, fixed_ip
            )));
        }
    }

    let mut floating_ips = client.floating_ips.lock();
    let fip = floating_ips
        .get_mut(&address.to_string())
        .ok_or_else(|| CloudError::NotFound(format!("Floating IP {} not found", address)))?;
    fip.port_id = Some(port_id.to_string());
    fip.fixed_ip_address = Some(fixed_ip.to_string());
    fip.status = Some("ACTIVE".to_string());
    Ok(())
}

pub async fn detach_floating_ip(client: &MockCloudClient, vm_id: &str, address: IpAddr) -> Result<(), CloudError> {
    client.enter(Operation::DetachFloatingIp, Some(vm_id), Some(address)).await?;

    let vm_port_ids: Vec<String> = client
        .ports
        .lock()
        .values()
        .filter(|p| p.device_id == vm_id)
        .map(|p| p.id.clone())
        .collect();

    let mut floating_ips = client.floating_ips.lock();
    let fip = floating_ips
        .get_mut(&address.to_string())
        .ok_or_else(|| CloudError::NotFound(format!("Floating IP {} not found", address)))?;

    match fip.port_id.as_deref() {
        Some(port) if vm_port_ids.iter().any(|p| p == port) => {
            fip.port_id = None;
            fip.fixed_ip_address = None;
            fip.status = Some("DOWN".to_string());
            Ok(())
        }
        _ => Err(CloudError::NotAttached(format!("{} is not attached to VM {}", address, vm_id))),
    }
}

pub async fn list_external_networks(client: &MockCloudClient) -> Result<Vec<Network>, CloudError> {
    client.enter(Operation::ListExternalNetworks, None, None).await?;
    Ok(client
        .networks
        .lock()
        .values()
        .filter(|n| n.router_external)
        .cloned()
        .collect())
}

pub async fn list_subnets(client: &MockCloudClient, network_id: &str) -> Result<Vec<Subnet>, CloudError> {
    client.enter(Operation::ListSubnets, None, None).await?;
    Ok(client
        .subnets
        .lock()
        .iter()
        .filter(|s| s.network_id == network_id)
        .cloned()
        .collect())
}

pub async fn list_ports(client: &MockCloudClient) -> Result<Vec<Port>, CloudError> {
    client.enter(Operation::ListPorts, None, None).await?;
    Ok(client.ports.lock().values().cloned().collect())
}

pub async fn get_vm_ports(client: &MockCloudClient, vm_id: &str) -> Result<Vec<Port>, CloudError> {
    client.enter(Operation::GetVmPorts, Some(vm_id), None).await?;
    Ok(client
        .ports
        .lock()
        .values()
        .filter(|p| p.device_id == vm_id)
        .cloned()
        .collect())
}

pub async fn create_port(client: &MockCloudClient, network_id: &str) -> Result<Port, CloudError> {
    client.enter(Operation::CreatePort, None, None).await?;

    let id = client.next_id();
    let port = Port {
        id: format!("port-{}", uuid::Uuid::new_v4()),
        network_id: network_id.to_string(),
        device_id: String::new(),
        fixed_ips: vec![FixedIp {
            subnet_id: format!("{network_id}-subnet"),
            ip_address: format!("10.0.{}.{}", (id / 250) % 250, id % 250 + 2),
        }],
        status: Some("DOWN".to_string()),
    };
    client.ports.lock().insert(port.id.clone(), port.clone());
    Ok(port)
}
