//! Compute operations for MockCloudClient

use super::{MockCloudClient, Operation};
use crate::error::CloudError;
use crate::models::*;

pub async fn get_server(client: &MockCloudClient, vm_id: &str) -> Result<Server, CloudError> {
    client.enter(Operation::GetServer, Some(vm_id), None).await?;
    client
        .servers
        .lock()
        .get(vm_id)
        .cloned()
        .ok_or_else(|| CloudError::NotFound(format!("Server {} not found", vm_id)))
}

pub async fn attach_port_to_vm(client: &MockCloudClient, vm_id: &str, port_id: &str) -> Result<(), CloudError> {
    client.enter(Operation::AttachPortToVm, Some(vm_id), None).await?;

    if !client.servers.lock().contains_key(vm_id) {
        return Err(CloudError::NotFound(format!("Server {} not found", vm_id)));
    }

    let mut ports = client.ports.lock();
    let port = ports
        .get_mut(port_id)
        .ok_or_else(|| CloudError::NotFound(format!("Port {} not found", port_id)))?;
    if !port.device_id.is_empty() && port.device_id != vm_id {
        return Err(CloudError::Conflict(format!(
            "Port {} is already in use by {}",
            port_id, port.device_id
        )));
    }
    port.device_id = vm_id.to_string();
    port.status = Some("ACTIVE".to_string());
    Ok(())
}
