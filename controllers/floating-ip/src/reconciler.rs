//! Reconciliation of the inventory against the cloud.
//!
//! A pass enumerates every address of every IPv4 allocation pool on the
//! cloud's external networks and writes one inventory row per address,
//! carrying the binding the cloud reports for it.
//!
//! Reservations only exist locally, so the cloud always reports a reserved
//! address as unbound. [`ReservedPolicy`] decides whether a pass keeps such
//! reservations (`Preserve`, the default) or downgrades them to `available`
//! (`Overwrite`).

use crate::error::ControllerError;
use chrono::Utc;
use fip_inventory::{Binding, FipStatus, FloatingIp, InventoryStore, ObservedRow, StoreError, UpsertOutcome};
use ipnet::Ipv4AddrRange;
use openstack_client::{AllocationPool, CloudNetworkGateway};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a pass does with a `reserved` row the cloud reports as unbound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservedPolicy {
    /// Keep the reservation and its project
    #[default]
    Preserve,
    /// Downgrade to `available`
    Overwrite,
}

impl FromStr for ReservedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preserve" => Ok(ReservedPolicy::Preserve),
            "overwrite" => Ok(ReservedPolicy::Overwrite),
            other => Err(format!("unknown reserved policy '{}', expected preserve or overwrite", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilePolicy {
    pub reserved: ReservedPolicy,
    /// Delete stored `available` rows no pool contains any more
    pub prune_stale: bool,
}

/// Counters of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Pool addresses written or checked
    pub observed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Reserved rows kept reserved under [`ReservedPolicy::Preserve`]
    pub preserved_reserved: usize,
    /// Rows whose binding changed while the pass ran; left for the next pass
    pub contended: usize,
    /// Stored rows no pool contains
    pub stale: usize,
    pub pruned: usize,
    /// IPv6 floating IPs ignored
    pub skipped_ipv6: usize,
    /// Bound floating IPs without an owning project, left unwritten
    pub unowned: usize,
    pub invalid_pools: usize,
    /// Addresses found in more than one pool; the first pool wins
    pub duplicates: usize,
}

/// Cloud-side state of one floating IP
#[derive(Debug, Clone)]
struct CloudBinding {
    port_id: Option<String>,
    project_id: Option<String>,
}

/// Rebuilds the inventory from the cloud's ground truth.
pub struct Reconciler {
    cloud: Arc<dyn CloudNetworkGateway>,
    store: Arc<dyn InventoryStore>,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(
        cloud: Arc<dyn CloudNetworkGateway>,
        store: Arc<dyn InventoryStore>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self { cloud, store, policy }
    }

    /// Run one full pass.
    ///
    /// Any cloud or store error aborts the pass; rows written before the
    /// failure stay written. Running the pass again converges.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ControllerError> {
        let mut report = ReconcileReport::default();
        let now = Utc::now();

        // Snapshot before any cloud read: a row the allocator moves after this
        // point no longer matches, and the conditional write below loses.
        let existing: HashMap<IpAddr, FloatingIp> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(|row| (row.address, row))
            .collect();

        let cloud_fips = self.cloud_bindings(&mut report).await?;

        // port -> owning VM, so `vm_id` names a server rather than a port
        let port_owners: HashMap<String, String> = self
            .cloud
            .list_ports()
            .await?
            .into_iter()
            .filter(|p| !p.device_id.is_empty())
            .map(|p| (p.id, p.device_id))
            .collect();

        let networks = self.cloud.list_external_networks().await?;
        debug!("Found {} external networks", networks.len());

        let mut seen: HashSet<IpAddr> = HashSet::new();

        for network in &networks {
            for subnet in self.cloud.list_subnets(&network.id).await? {
                if subnet.ip_version != 4 {
                    debug!("Skipping IPv{} subnet {} on network {}", subnet.ip_version, subnet.id, network.id);
                    continue;
                }

                for pool in &subnet.allocation_pools {
                    let range = match pool_range(pool) {
                        Ok(range) => range,
                        Err(reason) => {
                            error!(
                                "Skipping malformed allocation pool {}-{} on subnet {}: {}",
                                pool.start, pool.end, subnet.id, reason
                            );
                            report.invalid_pools += 1;
                            continue;
                        }
                    };

                    let mut duplicates = 0;
                    for v4 in range {
                        let address = IpAddr::V4(v4);
                        if !seen.insert(address) {
                            duplicates += 1;
                            continue;
                        }

                        let Some(binding) = self.observe(v4, &cloud_fips, &port_owners) else {
                            report.unowned += 1;
                            continue;
                        };
                        let current = existing.get(&address);
                        let binding = self.apply_local_state(binding, current, &mut report);

                        let row = ObservedRow {
                            address,
                            subnet_id: subnet.id.clone(),
                            network_id: network.id.clone(),
                            binding,
                        };
                        report.observed += 1;
                        self.write(&row, current, now, &mut report).await?;
                    }

                    if duplicates > 0 {
                        warn!(
                            "Allocation pool {}-{} on subnet {} overlaps earlier pools in {} addresses; keeping the first",
                            pool.start, pool.end, subnet.id, duplicates
                        );
                        report.duplicates += duplicates;
                    }
                }
            }
        }

        self.sweep_stale(&existing, &seen, &mut report).await?;

        info!(
            "Reconciliation complete: observed={} created={} updated={} unchanged={} preserved_reserved={} contended={} stale={} pruned={} skipped_ipv6={} invalid_pools={}",
            report.observed,
            report.created,
            report.updated,
            report.unchanged,
            report.preserved_reserved,
            report.contended,
            report.stale,
            report.pruned,
            report.skipped_ipv6,
            report.invalid_pools
        );
        Ok(report)
    }

    /// IPv4 floating IPs known to the cloud, keyed by address
    async fn cloud_bindings(
        &self,
        report: &mut ReconcileReport,
    ) -> Result<HashMap<Ipv4Addr, CloudBinding>, ControllerError> {
        let mut bindings = HashMap::new();
        for fip in self.cloud.list_floating_ips().await? {
            match fip.floating_ip_address.parse::<IpAddr>() {
                Ok(IpAddr::V4(v4)) => {
                    let port_id = fip.port_id.clone().filter(|p| !p.is_empty());
                    bindings.insert(
                        v4,
                        CloudBinding {
                            port_id,
                            project_id: fip.project_id,
                        },
                    );
                }
                // IPv6 floating IPs are not managed yet
                Ok(IpAddr::V6(_)) => report.skipped_ipv6 += 1,
                Err(_) => warn!(
                    "Ignoring floating IP {} with unparseable address '{}'",
                    fip.id, fip.floating_ip_address
                ),
            }
        }
        debug!("Cloud reports {} IPv4 floating IPs", bindings.len());
        Ok(bindings)
    }

    /// Binding the cloud implies for an address, `None` if it cannot be expressed
    fn observe(
        &self,
        address: Ipv4Addr,
        cloud_fips: &HashMap<Ipv4Addr, CloudBinding>,
        port_owners: &HashMap<String, String>,
    ) -> Option<Binding> {
        let Some(CloudBinding {
            port_id: Some(port_id),
            project_id,
        }) = cloud_fips.get(&address)
        else {
            return Some(Binding::available());
        };

        let vm_id = port_owners.get(port_id).unwrap_or(port_id);
        match project_id {
            Some(project_id) => Some(Binding::allocated(project_id.clone(), vm_id.clone())),
            None => {
                warn!("Floating IP {} is bound to {} but has no owning project; not recorded", address, vm_id);
                None
            }
        }
    }

    /// Keep the local-only states the cloud cannot report
    fn apply_local_state(
        &self,
        observed: Binding,
        current: Option<&FloatingIp>,
        report: &mut ReconcileReport,
    ) -> Binding {
        let Some(current) = current else {
            return observed;
        };
        if observed.status != FipStatus::Available {
            return observed;
        }
        match current.status {
            FipStatus::Reserved if self.policy.reserved == ReservedPolicy::Preserve => {
                report.preserved_reserved += 1;
                current.binding()
            }
            FipStatus::Released => current.binding(),
            _ => observed,
        }
    }

    async fn write(
        &self,
        row: &ObservedRow,
        current: Option<&FloatingIp>,
        now: chrono::DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<(), ControllerError> {
        let expected = current.map(FloatingIp::binding);
        match self.store.upsert_observed(row, expected.as_ref(), now).await {
            Ok(UpsertOutcome::Created) => report.created += 1,
            Ok(UpsertOutcome::Updated) => {
                debug!("Updated {} to {}", row.address, row.binding);
                report.updated += 1;
            }
            Ok(UpsertOutcome::Unchanged) => report.unchanged += 1,
            Err(StoreError::Conflict { .. }) => {
                warn!("{} changed during reconciliation; leaving it for the next pass", row.address);
                report.contended += 1;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn sweep_stale(
        &self,
        existing: &HashMap<IpAddr, FloatingIp>,
        seen: &HashSet<IpAddr>,
        report: &mut ReconcileReport,
    ) -> Result<(), ControllerError> {
        let mut stale: Vec<&FloatingIp> = existing.values().filter(|r| !seen.contains(&r.address)).collect();
        stale.sort_by_key(|r| r.address);

        for row in stale {
            report.stale += 1;
            if !self.policy.prune_stale || row.status != FipStatus::Available {
                warn!("{} ({}) is no longer in any allocation pool", row.address, row.binding());
                continue;
            }
            match self.store.delete_if(row.address, &Binding::available()).await {
                Ok(()) => {
                    info!("Pruned stale row {}", row.address);
                    report.pruned += 1;
                }
                Err(StoreError::Conflict { .. } | StoreError::NotFound(_)) => {
                    debug!("Stale row {} changed before pruning; kept", row.address);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Inclusive IPv4 range of an allocation pool
fn pool_range(pool: &AllocationPool) -> Result<Ipv4AddrRange, String> {
    let start: IpAddr = pool.start.parse().map_err(|_| format!("bad start address '{}'", pool.start))?;
    let end: IpAddr = pool.end.parse().map_err(|_| format!("bad end address '{}'", pool.end))?;
    match (start, end) {
        (IpAddr::V4(start), IpAddr::V4(end)) if start <= end => Ok(Ipv4AddrRange::new(start, end)),
        (IpAddr::V4(_), IpAddr::V4(_)) => Err("start is after end".to_string()),
        _ => Err("not an IPv4 range".to_string()),
    }
}
