//! # fip-inventory
//!
//! `fip-inventory` defines the trait [`InventoryStore`], the local record of
//! every floating IP address the portal manages, and two backends:
//! [`MemoryStore`] for tests and development, and [`SqliteStore`] for
//! deployments.
//!
//! Rows are only written in two ways:
//! - [`InventoryStore::upsert_observed`], used by reconciliation to mirror what
//!   the cloud reports, and
//! - [`InventoryStore::transition`], used by allocation to move a row from one
//!   [`Binding`] to another.
//!
//! Both are conditional on the binding the caller last read, so two writers
//! racing on the same address cannot both succeed; the loser gets
//! [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::net::IpAddr;

pub mod error;
pub mod memory;
pub mod model;
pub mod sqlite;

#[cfg(test)]
mod store_tests;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use model::{Binding, FipStatus, FloatingIp, InvariantViolation, ObservedRow, UpsertOutcome};
pub use sqlite::SqliteStore;

#[async_trait]
pub trait InventoryStore: Send + Sync + 'static {
    async fn get(&self, address: IpAddr) -> Result<Option<FloatingIp>, StoreError>;

    /// Every row, ordered by address
    async fn list_all(&self) -> Result<Vec<FloatingIp>, StoreError>;
    async fn list_by_status(&self, status: FipStatus) -> Result<Vec<FloatingIp>, StoreError>;
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<FloatingIp>, StoreError>;
    /// Rows bound to `vm_id`; more than one is an inconsistency the caller reports
    async fn find_by_vm(&self, vm_id: &str) -> Result<Vec<FloatingIp>, StoreError>;

    /// Write a reconciliation observation.
    ///
    /// `expected` is the binding the caller read before computing `row`
    /// (`None` if the address was absent). The write only happens when the
    /// stored binding still equals `expected`, and only touches `updated_at`
    /// when a column changes. `vm_name` is kept while the VM stays the same
    /// and cleared otherwise.
    async fn upsert_observed(
        &self,
        row: &ObservedRow,
        expected: Option<&Binding>,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Compare-and-swap the binding of `address` from `expected` to `next`,
    /// setting `vm_name`. Returns the updated row.
    async fn transition(
        &self,
        address: IpAddr,
        expected: &Binding,
        next: &Binding,
        vm_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FloatingIp, StoreError>;

    /// Delete the row only if its binding still equals `expected`
    async fn delete_if(&self, address: IpAddr, expected: &Binding) -> Result<(), StoreError>;

    /// Row counts per status; every status is present, zero when empty
    async fn count_by_status(&self) -> Result<BTreeMap<FipStatus, usize>, StoreError>;
}
