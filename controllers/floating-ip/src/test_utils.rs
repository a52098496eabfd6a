//! Test utilities for unit testing the reconciler, allocator and API
//!
//! `Fixture` seeds a mock cloud with one external network whose IPv4 pool is
//! 10.0.0.5-10.0.0.8, a private network, and two VMs with one port each.

use crate::allocator::{Allocator, AllocatorPolicy};
use crate::query::PoolQuery;
use crate::reconciler::{ReconcilePolicy, ReconcileReport, Reconciler};
use chrono::Utc;
use fip_inventory::{Binding, FloatingIp, InventoryStore, MemoryStore};
use openstack_client::MockCloudClient;
use std::net::IpAddr;
use std::sync::Arc;

pub const EXT_NET: &str = "ext-net";
pub const EXT_SUBNET: &str = "ext-subnet";
pub const PRIVATE_NET: &str = "private";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Inventory row outside any reconciliation pass
pub fn row(address: &str, binding: Binding) -> FloatingIp {
    let now = Utc::now();
    FloatingIp {
        address: ip(address),
        subnet_id: EXT_SUBNET.to_string(),
        network_id: EXT_NET.to_string(),
        project_id: binding.project_id,
        vm_id: binding.vm_id,
        vm_name: None,
        status: binding.status,
        note: None,
        created_at: now,
        updated_at: now,
    }
}

pub struct Fixture {
    pub cloud: MockCloudClient,
    pub store: MemoryStore,
}

impl Fixture {
    pub fn new() -> Self {
        let cloud = MockCloudClient::new();
        cloud.add_network(EXT_NET, true);
        cloud.add_network(PRIVATE_NET, false);
        cloud.add_subnet(EXT_SUBNET, EXT_NET, 4, &[("10.0.0.5", "10.0.0.8")]);
        cloud.add_server("vm-1", "web-1");
        cloud.add_server("vm-2", "web-2");
        cloud.add_port("port-1", PRIVATE_NET, "vm-1", &["192.168.0.11"]);
        cloud.add_port("port-2", PRIVATE_NET, "vm-2", &["192.168.0.12"]);
        Self {
            cloud,
            store: MemoryStore::new(),
        }
    }

    /// Fixture whose inventory already mirrors the cloud
    pub async fn synced() -> Self {
        let fixture = Self::new();
        fixture.sync().await;
        fixture.cloud.clear_calls();
        fixture
    }

    pub fn store_arc(&self) -> Arc<dyn InventoryStore> {
        Arc::new(self.store.clone())
    }

    pub fn reconciler(&self, policy: ReconcilePolicy) -> Reconciler {
        Reconciler::new(Arc::new(self.cloud.clone()), self.store_arc(), policy)
    }

    pub fn allocator(&self, policy: AllocatorPolicy) -> Allocator {
        Allocator::new(Arc::new(self.cloud.clone()), self.store_arc(), policy)
    }

    pub fn query(&self) -> PoolQuery {
        PoolQuery::new(self.store_arc())
    }

    /// One reconciliation pass with the default policy
    pub async fn sync(&self) -> ReconcileReport {
        self.reconciler(ReconcilePolicy::default()).reconcile().await.unwrap()
    }

    pub async fn row(&self, address: &str) -> FloatingIp {
        self.store.get(ip(address)).await.unwrap().unwrap()
    }

    pub async fn binding(&self, address: &str) -> Binding {
        self.row(address).await.binding()
    }
}
