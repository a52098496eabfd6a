//! Read-only views of the inventory.
//!
//! Every row returned is checked against the binding rules first; a row
//! that breaks them is reported as `InconsistentState` instead of being
//! handed to the caller.

use crate::error::ControllerError;
use fip_inventory::{FipStatus, FloatingIp, InventoryStore};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::error;

/// Row counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total: usize,
    pub available: usize,
    pub reserved: usize,
    pub allocated: usize,
    pub released: usize,
}

pub struct PoolQuery {
    store: Arc<dyn InventoryStore>,
}

impl PoolQuery {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, address: IpAddr) -> Result<FloatingIp, ControllerError> {
        let row = self
            .store
            .get(address)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("{} is not in the inventory", address)))?;
        checked(row)
    }

    pub async fn list_available(&self) -> Result<Vec<FloatingIp>, ControllerError> {
        checked_all(self.store.list_by_status(FipStatus::Available).await?)
    }

    /// Reserved and allocated addresses of a project
    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<FloatingIp>, ControllerError> {
        checked_all(self.store.list_by_project(project_id).await?)
    }

    /// The address bound to a VM, if any
    pub async fn list_for_vm(&self, vm_id: &str) -> Result<Option<FloatingIp>, ControllerError> {
        let mut rows = checked_all(self.store.find_by_vm(vm_id).await?)?;
        if rows.len() > 1 {
            let addresses: Vec<String> = rows.iter().map(|r| r.address.to_string()).collect();
            error!("VM {} is bound to {} addresses: {}", vm_id, rows.len(), addresses.join(", "));
            return Err(ControllerError::InconsistentState(format!(
                "VM {} is bound to more than one address: {}",
                vm_id,
                addresses.join(", ")
            )));
        }
        Ok(rows.pop())
    }

    pub async fn summary(&self) -> Result<PoolSummary, ControllerError> {
        let counts = self.store.count_by_status().await?;
        let count = |status: FipStatus| counts.get(&status).copied().unwrap_or(0);
        let summary = PoolSummary {
            available: count(FipStatus::Available),
            reserved: count(FipStatus::Reserved),
            allocated: count(FipStatus::Allocated),
            released: count(FipStatus::Released),
            total: counts.values().sum(),
        };
        Ok(summary)
    }
}

fn checked(row: FloatingIp) -> Result<FloatingIp, ControllerError> {
    match row.check_invariants() {
        Ok(()) => Ok(row),
        Err(violation) => {
            error!("Inventory row violates binding rules: {}", violation);
            Err(ControllerError::InconsistentState(violation.to_string()))
        }
    }
}

fn checked_all(rows: Vec<FloatingIp>) -> Result<Vec<FloatingIp>, ControllerError> {
    rows.into_iter().map(checked).collect()
}
