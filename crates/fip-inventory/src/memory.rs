use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use crate::{Binding, FipStatus, FloatingIp, InventoryStore, ObservedRow, StoreError, UpsertOutcome};

/// In-memory inventory; clones share the same rows.
///
/// Every operation takes the lock once, so conditional writes are atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<IpAddr, FloatingIp>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row as-is (test and fixture setup)
    pub fn insert(&self, row: FloatingIp) {
        self.inner.lock().insert(row.address, row);
    }

    fn filtered(&self, pred: impl Fn(&FloatingIp) -> bool) -> Vec<FloatingIp> {
        self.inner.lock().values().filter(|r| pred(r)).cloned().collect()
    }
}

fn conflict(address: IpAddr, expected: Binding) -> StoreError {
    StoreError::Conflict { address, expected }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn get(&self, address: IpAddr) -> Result<Option<FloatingIp>, StoreError> {
        Ok(self.inner.lock().get(&address).cloned())
    }

    async fn list_all(&self) -> Result<Vec<FloatingIp>, StoreError> {
        Ok(self.filtered(|_| true))
    }

    async fn list_by_status(&self, status: FipStatus) -> Result<Vec<FloatingIp>, StoreError> {
        Ok(self.filtered(|r| r.status == status))
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<FloatingIp>, StoreError> {
        Ok(self.filtered(|r| r.project_id.as_deref() == Some(project_id)))
    }

    async fn find_by_vm(&self, vm_id: &str) -> Result<Vec<FloatingIp>, StoreError> {
        Ok(self.filtered(|r| r.vm_id.as_deref() == Some(vm_id)))
    }

    async fn upsert_observed(
        &self,
        row: &ObservedRow,
        expected: Option<&Binding>,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut rows = self.inner.lock();
        if !rows.contains_key(&row.address) {
            if let Some(expected) = expected {
                return Err(conflict(row.address, expected.clone()));
            }
            trace!(address = %row.address, "inserting observed row");
            rows.insert(
                row.address,
                FloatingIp {
                    address: row.address,
                    subnet_id: row.subnet_id.clone(),
                    network_id: row.network_id.clone(),
                    project_id: row.binding.project_id.clone(),
                    vm_id: row.binding.vm_id.clone(),
                    vm_name: None,
                    status: row.binding.status,
                    note: None,
                    created_at: now,
                    updated_at: now,
                },
            );
            return Ok(UpsertOutcome::Created);
        }

        let Some(current) = rows.get_mut(&row.address) else {
            return Err(StoreError::NotFound(row.address));
        };
        if !row.differs_from(current) {
            return Ok(UpsertOutcome::Unchanged);
        }
        match expected {
            Some(expected) if current.binding() == *expected => {
                if current.vm_id != row.binding.vm_id {
                    current.vm_name = None;
                }
                current.subnet_id = row.subnet_id.clone();
                current.network_id = row.network_id.clone();
                current.status = row.binding.status;
                current.project_id = row.binding.project_id.clone();
                current.vm_id = row.binding.vm_id.clone();
                current.updated_at = now;
                Ok(UpsertOutcome::Updated)
            }
            // binding moved (or the row appeared) since the caller read it
            expected => Err(conflict(
                row.address,
                expected.cloned().unwrap_or_else(|| current.binding()),
            )),
        }
    }

    async fn transition(
        &self,
        address: IpAddr,
        expected: &Binding,
        next: &Binding,
        vm_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FloatingIp, StoreError> {
        let mut rows = self.inner.lock();
        let row = rows.get_mut(&address).ok_or(StoreError::NotFound(address))?;
        if row.binding() != *expected {
            return Err(conflict(address, expected.clone()));
        }
        row.status = next.status;
        row.project_id = next.project_id.clone();
        row.vm_id = next.vm_id.clone();
        row.vm_name = vm_name.map(str::to_string);
        row.updated_at = now;
        Ok(row.clone())
    }

    async fn delete_if(&self, address: IpAddr, expected: &Binding) -> Result<(), StoreError> {
        let mut rows = self.inner.lock();
        match rows.get(&address) {
            None => Err(StoreError::NotFound(address)),
            Some(row) if row.binding() != *expected => Err(conflict(address, expected.clone())),
            Some(_) => {
                rows.remove(&address);
                Ok(())
            }
        }
    }

    async fn count_by_status(&self) -> Result<BTreeMap<FipStatus, usize>, StoreError> {
        let mut counts: BTreeMap<FipStatus, usize> = FipStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for row in self.inner.lock().values() {
            *counts.entry(row.status).or_default() += 1;
        }
        Ok(counts)
    }
}
