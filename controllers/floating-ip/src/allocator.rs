//! Allocation of inventory addresses to projects and VMs.
//!
//! Row states move as follows:
//!
//! ```text
//! available -> reserved    assign_to_project / reserve_for_project (no cloud call)
//! reserved  -> allocated   assign_or_replace
//! allocated -> reserved    release (detach, project keeps the address)
//! allocated -> available   a VM's previous address, displaced by assign_or_replace
//! allocated -> allocated   assign_or_replace onto another VM of the same project
//! ```
//!
//! `released` is set administratively and never entered here.
//!
//! Every row write is a compare-and-swap against the binding read at the
//! start of the operation, so concurrent requests for the same address
//! cannot both succeed. Cloud-side effects are not rolled back; an attach
//! whose final write loses is corrected by the next reconciliation pass.

use crate::error::ControllerError;
use chrono::Utc;
use fip_inventory::{Binding, FipStatus, FloatingIp, InventoryStore, StoreError};
use openstack_client::{CloudError, CloudNetworkGateway, FloatingIp as CloudFloatingIp, Port};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct AllocatorPolicy {
    /// Let `assign_or_replace` take `available` addresses without a prior reservation
    pub allow_unreserved: bool,
    /// Network to create a port on when a VM has no free fixed IP
    pub private_network_id: Option<String>,
}

/// Serves allocation requests against the inventory and the cloud.
pub struct Allocator {
    cloud: Arc<dyn CloudNetworkGateway>,
    store: Arc<dyn InventoryStore>,
    policy: AllocatorPolicy,
}

impl Allocator {
    pub fn new(
        cloud: Arc<dyn CloudNetworkGateway>,
        store: Arc<dyn InventoryStore>,
        policy: AllocatorPolicy,
    ) -> Self {
        Self { cloud, store, policy }
    }

    /// Attach `address` to `vm_id` on behalf of `project_id`, detaching
    /// whatever address the VM held before.
    pub async fn assign_or_replace(
        &self,
        address: IpAddr,
        vm_id: &str,
        project_id: &str,
    ) -> Result<FloatingIp, ControllerError> {
        let row = self.row(address).await?;
        let wanted = Binding::allocated(project_id, vm_id);
        if row.binding() == wanted {
            debug!("{} is already allocated to VM {}", address, vm_id);
            return Ok(row);
        }
        self.check_assignable(&row, project_id)?;

        let server = self.cloud.get_server(vm_id).await?;
        let mut expected = row.binding();

        // Moving between VMs of the same project: free it on the old VM first
        if row.status == FipStatus::Allocated {
            if let Some(old_vm) = row.vm_id.as_deref() {
                info!("Moving {} from VM {} to VM {}", address, old_vm, vm_id);
                self.detach(old_vm, address).await?;
                let reserved = Binding::reserved(project_id);
                self.store
                    .transition(address, &expected, &reserved, None, Utc::now())
                    .await?;
                expected = reserved;
            }
        }

        // One address per VM: detach the previous one before attaching
        for previous in self.store.find_by_vm(vm_id).await? {
            if previous.address == address {
                continue;
            }
            info!("Detaching previous address {} from VM {}", previous.address, vm_id);
            self.detach(vm_id, previous.address).await?;
            self.store
                .transition(previous.address, &previous.binding(), &Binding::available(), None, Utc::now())
                .await?;
        }

        let cloud_fip = self.ensure_cloud_fip(&row, project_id).await?;
        let vm_ports = self.cloud.get_vm_ports(vm_id).await?;

        match cloud_fip.port_id.as_deref().filter(|p| !p.is_empty()) {
            Some(port) if vm_ports.iter().any(|p| p.id == port) => {
                debug!("{} is already bound to port {} of VM {}", address, port, vm_id);
            }
            Some(port) => {
                return Err(ControllerError::Conflict(format!(
                    "{} is bound to port {} outside VM {}",
                    address, port, vm_id
                )));
            }
            None => {
                let (port_id, fixed_ip) = self.free_fixed_ip(vm_id, &vm_ports).await?;
                self.cloud
                    .attach_floating_ip(vm_id, address, &port_id, IpAddr::V4(fixed_ip))
                    .await?;
            }
        }

        let allocated = self
            .store
            .transition(address, &expected, &wanted, Some(&server.name), Utc::now())
            .await
            .map_err(|e| {
                if matches!(e, StoreError::Conflict { .. }) {
                    warn!("{} was attached to VM {} but the row changed meanwhile; reconciliation will correct it", address, vm_id);
                }
                ControllerError::from(e)
            })?;
        info!("Allocated {} to VM {} ({}) of project {}", address, vm_id, server.name, project_id);
        Ok(allocated)
    }

    /// Detach `address` from `vm_id`; the project keeps it reserved.
    pub async fn release(&self, address: IpAddr, vm_id: &str) -> Result<FloatingIp, ControllerError> {
        let row = self.row(address).await?;
        let project_id = match (&row.status, row.vm_id.as_deref(), row.project_id.as_deref()) {
            (FipStatus::Allocated, Some(bound), Some(project)) if bound == vm_id => project.to_string(),
            _ => {
                return Err(ControllerError::NotAllocated(format!(
                    "{} is not allocated to VM {} (it is {})",
                    address,
                    vm_id,
                    row.binding()
                )))
            }
        };

        self.detach(vm_id, address).await?;
        let released = self
            .store
            .transition(address, &row.binding(), &Binding::reserved(project_id.as_str()), None, Utc::now())
            .await?;
        info!("Released {} from VM {}; still reserved for project {}", address, vm_id, project_id);
        Ok(released)
    }

    /// Reserve an `available` address for `project_id`.
    pub async fn assign_to_project(
        &self,
        address: IpAddr,
        project_id: &str,
    ) -> Result<FloatingIp, ControllerError> {
        let row = self.row(address).await?;
        match row.status {
            FipStatus::Reserved if row.project_id.as_deref() == Some(project_id) => return Ok(row),
            FipStatus::Available => {}
            _ => {
                return Err(ControllerError::AlreadyAllocated(format!(
                    "{} is {}",
                    address,
                    row.binding()
                )))
            }
        }

        match self
            .store
            .transition(address, &Binding::available(), &Binding::reserved(project_id), None, Utc::now())
            .await
        {
            Ok(reserved) => {
                info!("Reserved {} for project {}", address, project_id);
                Ok(reserved)
            }
            Err(StoreError::Conflict { .. }) => Err(ControllerError::AlreadyAllocated(format!(
                "{} was taken by a concurrent request",
                address
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Reserve `count` available addresses for `project_id`, oldest rows first.
    ///
    /// Either all `count` are reserved or none are.
    pub async fn reserve_for_project(
        &self,
        project_id: &str,
        count: usize,
    ) -> Result<Vec<FloatingIp>, ControllerError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut candidates = self.store.list_by_status(FipStatus::Available).await?;
        if candidates.len() < count {
            return Err(ControllerError::NotEnoughAvailable {
                requested: count,
                available: candidates.len(),
            });
        }
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.address.cmp(&b.address)));

        let target = Binding::reserved(project_id);
        let mut reserved = Vec::with_capacity(count);
        for row in candidates {
            if reserved.len() == count {
                break;
            }
            match self
                .store
                .transition(row.address, &Binding::available(), &target, None, Utc::now())
                .await
            {
                Ok(row) => reserved.push(row),
                Err(StoreError::Conflict { .. } | StoreError::NotFound(_)) => {
                    debug!("{} was taken concurrently; trying the next address", row.address);
                }
                Err(e) => {
                    self.roll_back(&reserved, &target).await;
                    return Err(e.into());
                }
            }
        }

        if reserved.len() < count {
            let got = reserved.len();
            self.roll_back(&reserved, &target).await;
            return Err(ControllerError::NotEnoughAvailable {
                requested: count,
                available: got,
            });
        }

        info!("Reserved {} addresses for project {}", reserved.len(), project_id);
        Ok(reserved)
    }

    async fn roll_back(&self, reserved: &[FloatingIp], target: &Binding) {
        for row in reserved {
            if let Err(e) = self
                .store
                .transition(row.address, target, &Binding::available(), None, Utc::now())
                .await
            {
                error!("Failed to roll back reservation of {}: {}", row.address, e);
            }
        }
    }

    async fn row(&self, address: IpAddr) -> Result<FloatingIp, ControllerError> {
        self.store
            .get(address)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("{} is not in the inventory", address)))
    }

    fn check_assignable(&self, row: &FloatingIp, project_id: &str) -> Result<(), ControllerError> {
        let owned = row.project_id.as_deref() == Some(project_id);
        let ok = match row.status {
            FipStatus::Reserved | FipStatus::Allocated => owned,
            FipStatus::Available => self.policy.allow_unreserved,
            FipStatus::Released => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ControllerError::Conflict(format!(
                "{} is {} and cannot be assigned for project {}",
                row.address,
                row.binding(),
                project_id
            )))
        }
    }

    /// Detach in the cloud; an address that is not attached there, or no
    /// longer exists there, is fine
    async fn detach(&self, vm_id: &str, address: IpAddr) -> Result<(), ControllerError> {
        match self.cloud.detach_floating_ip(vm_id, address).await {
            Ok(()) => Ok(()),
            Err(CloudError::NotAttached(msg)) => {
                warn!("{} was not attached to VM {} in the cloud: {}", address, vm_id, msg);
                Ok(())
            }
            Err(CloudError::NotFound(msg)) => {
                warn!("{} no longer exists in the cloud; nothing to detach from VM {}: {}", address, vm_id, msg);
                Ok(())
            }
            Err(e) => {
                error!("Failed to detach {} from VM {}: {}", address, vm_id, e);
                Err(e.into())
            }
        }
    }

    /// Find the address in the cloud, creating it when missing
    async fn ensure_cloud_fip(&self, row: &FloatingIp, project_id: &str) -> Result<CloudFloatingIp, ControllerError> {
        let fip = match self.cloud.find_floating_ip(row.address).await? {
            Some(fip) => fip,
            None => {
                info!("Creating floating IP {} on network {}", row.address, row.network_id);
                self.cloud
                    .create_floating_ip(&row.network_id, row.address, Some(project_id))
                    .await?
            }
        };

        if let Some(owner) = fip.project_id.as_deref().filter(|o| *o != project_id) {
            return Err(ControllerError::Conflict(format!(
                "{} belongs to project {} in the cloud",
                row.address, owner
            )));
        }
        Ok(fip)
    }

    /// First IPv4 fixed IP on the VM with no floating IP bound to it,
    /// creating and attaching a port when there is none.
    async fn free_fixed_ip(&self, vm_id: &str, vm_ports: &[Port]) -> Result<(String, Ipv4Addr), ControllerError> {
        let taken: HashSet<(String, String)> = self
            .cloud
            .list_floating_ips()
            .await?
            .into_iter()
            .filter_map(|f| Some((f.port_id?, f.fixed_ip_address?)))
            .collect();

        for port in vm_ports {
            for fixed in &port.fixed_ips {
                let Ok(IpAddr::V4(v4)) = fixed.ip_address.parse::<IpAddr>() else {
                    continue;
                };
                if !taken.contains(&(port.id.clone(), fixed.ip_address.clone())) {
                    return Ok((port.id.clone(), v4));
                }
            }
        }

        let network_id = self.policy.private_network_id.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "VM {} has no free fixed IP and no private network is configured for new ports",
                vm_id
            ))
        })?;
        info!("VM {} has no free fixed IP; creating a port on network {}", vm_id, network_id);
        let port = self.cloud.create_port(network_id).await?;
        self.cloud.attach_port_to_vm(vm_id, &port.id).await?;

        port.fixed_ips
            .iter()
            .find_map(|f| match f.ip_address.parse::<IpAddr>() {
                Ok(IpAddr::V4(v4)) => Some(v4),
                _ => None,
            })
            .map(|v4| (port.id.clone(), v4))
            .ok_or_else(|| {
                ControllerError::InconsistentState(format!("new port {} has no IPv4 fixed IP", port.id))
            })
    }
}
