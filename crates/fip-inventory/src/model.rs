//! Inventory row model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle state of an inventory row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FipStatus {
    Available,
    Reserved,
    Allocated,
    /// Administrative, never entered automatically
    Released,
}

impl FipStatus {
    pub const ALL: [FipStatus; 4] = [
        FipStatus::Available,
        FipStatus::Reserved,
        FipStatus::Allocated,
        FipStatus::Released,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FipStatus::Available => "available",
            FipStatus::Reserved => "reserved",
            FipStatus::Allocated => "allocated",
            FipStatus::Released => "released",
        }
    }
}

impl fmt::Display for FipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown floating IP status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for FipStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(FipStatus::Available),
            "reserved" => Ok(FipStatus::Reserved),
            "allocated" => Ok(FipStatus::Allocated),
            "released" => Ok(FipStatus::Released),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// The `(status, project_id, vm_id)` triple of a row.
///
/// Every conditional write compares the stored binding against an expected
/// one and only proceeds when they are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub status: FipStatus,
    pub project_id: Option<String>,
    pub vm_id: Option<String>,
}

impl Binding {
    pub fn available() -> Self {
        Self {
            status: FipStatus::Available,
            project_id: None,
            vm_id: None,
        }
    }

    pub fn reserved(project_id: impl Into<String>) -> Self {
        Self {
            status: FipStatus::Reserved,
            project_id: Some(project_id.into()),
            vm_id: None,
        }
    }

    pub fn allocated(project_id: impl Into<String>, vm_id: impl Into<String>) -> Self {
        Self {
            status: FipStatus::Allocated,
            project_id: Some(project_id.into()),
            vm_id: Some(vm_id.into()),
        }
    }

    pub fn released(project_id: Option<String>) -> Self {
        Self {
            status: FipStatus::Released,
            project_id,
            vm_id: None,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(project={}, vm={})",
            self.status,
            self.project_id.as_deref().unwrap_or("-"),
            self.vm_id.as_deref().unwrap_or("-")
        )
    }
}

/// Row of the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub address: IpAddr,
    pub subnet_id: String,
    pub network_id: String,
    pub project_id: Option<String>,
    pub vm_id: Option<String>,
    /// Best-effort display name of `vm_id`
    pub vm_name: Option<String>,
    pub status: FipStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row whose binding breaks the status rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{address} is {status} but {problem}")]
pub struct InvariantViolation {
    pub address: IpAddr,
    pub status: FipStatus,
    pub problem: &'static str,
}

impl FloatingIp {
    pub fn binding(&self) -> Binding {
        Binding {
            status: self.status,
            project_id: self.project_id.clone(),
            vm_id: self.vm_id.clone(),
        }
    }

    /// Check the per-row status rules:
    /// allocated rows have a project and a VM, reserved rows have a project
    /// and no VM, available rows have neither.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let problem = match self.status {
            FipStatus::Allocated if self.project_id.is_none() => Some("has no project"),
            FipStatus::Allocated if self.vm_id.is_none() => Some("has no VM"),
            FipStatus::Reserved if self.project_id.is_none() => Some("has no project"),
            FipStatus::Reserved if self.vm_id.is_some() => Some("is bound to a VM"),
            FipStatus::Available if self.project_id.is_some() => Some("has an owning project"),
            FipStatus::Available if self.vm_id.is_some() => Some("is bound to a VM"),
            _ => None,
        };
        match problem {
            Some(problem) => Err(InvariantViolation {
                address: self.address,
                status: self.status,
                problem,
            }),
            None => Ok(()),
        }
    }
}

/// What a reconciliation pass computed for one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRow {
    pub address: IpAddr,
    pub subnet_id: String,
    pub network_id: String,
    pub binding: Binding,
}

impl ObservedRow {
    /// Whether writing this observation would change `row`
    pub fn differs_from(&self, row: &FloatingIp) -> bool {
        row.subnet_id != self.subnet_id
            || row.network_id != self.network_id
            || row.binding() != self.binding
    }
}

/// Result of writing an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(binding: Binding) -> FloatingIp {
        let now = Utc::now();
        FloatingIp {
            address: "203.0.113.7".parse().unwrap(),
            subnet_id: "sub-1".to_string(),
            network_id: "net-1".to_string(),
            project_id: binding.project_id,
            vm_id: binding.vm_id,
            vm_name: None,
            status: binding.status,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in FipStatus::ALL {
            assert_eq!(status.as_str().parse::<FipStatus>().unwrap(), status);
        }
        assert!("leased".parse::<FipStatus>().is_err());
    }

    #[test]
    fn test_well_formed_bindings_pass() {
        assert!(row(Binding::available()).check_invariants().is_ok());
        assert!(row(Binding::reserved("p1")).check_invariants().is_ok());
        assert!(row(Binding::allocated("p1", "vm1")).check_invariants().is_ok());
        assert!(row(Binding::released(None)).check_invariants().is_ok());
    }

    #[test]
    fn test_broken_bindings_are_reported() {
        let mut allocated_without_vm = row(Binding::allocated("p1", "vm1"));
        allocated_without_vm.vm_id = None;
        let err = allocated_without_vm.check_invariants().unwrap_err();
        assert_eq!(err.problem, "has no VM");

        let mut available_with_project = row(Binding::available());
        available_with_project.project_id = Some("p1".to_string());
        assert!(available_with_project.check_invariants().is_err());

        let mut reserved_with_vm = row(Binding::reserved("p1"));
        reserved_with_vm.vm_id = Some("vm1".to_string());
        assert_eq!(
            reserved_with_vm.check_invariants().unwrap_err().to_string(),
            "203.0.113.7 is reserved but is bound to a VM"
        );
    }

    #[test]
    fn test_observation_difference_ignores_audit_columns() {
        let stored = row(Binding::reserved("p1"));
        let mut observed = ObservedRow {
            address: stored.address,
            subnet_id: "sub-1".to_string(),
            network_id: "net-1".to_string(),
            binding: Binding::reserved("p1"),
        };
        assert!(!observed.differs_from(&stored));

        observed.binding = Binding::available();
        assert!(observed.differs_from(&stored));
    }
}
