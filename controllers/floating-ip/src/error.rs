//! Controller-specific error types.
//!
//! `ControllerError` is the taxonomy every operation reports. Upstream
//! errors from the cloud client and the inventory store are folded into it
//! here, so callers only ever match on one enum.

use fip_inventory::StoreError;
use openstack_client::CloudError;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur in the Floating IP Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Address, VM or project resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request lost against the current binding of a row, or the cloud refused it
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Address is already reserved or allocated elsewhere
    #[error("Already allocated: {0}")]
    AlreadyAllocated(String),

    /// Address is not allocated to the VM named in the request
    #[error("Not allocated: {0}")]
    NotAllocated(String),

    /// Fewer available addresses than requested
    #[error("Not enough available addresses: requested {requested}, available {available}")]
    NotEnoughAvailable { requested: usize, available: usize },

    /// Cloud API unreachable or failing
    #[error("Cloud unavailable: {0}")]
    CloudUnavailable(#[source] CloudError),

    /// A stored row breaks the binding rules
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed request input (e.g. an address that does not parse)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Inventory store failure
    #[error("Inventory store error: {0}")]
    Store(#[source] StoreError),

    /// Listener or other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, serializable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    AlreadyAllocated,
    NotAllocated,
    NotEnoughAvailable,
    CloudUnavailable,
    InconsistentState,
    InvalidConfig,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::AlreadyAllocated => "already_allocated",
            ErrorKind::NotAllocated => "not_allocated",
            ErrorKind::NotEnoughAvailable => "not_enough_available",
            ErrorKind::CloudUnavailable => "cloud_unavailable",
            ErrorKind::InconsistentState => "inconsistent_state",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ControllerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::NotFound(_) => ErrorKind::NotFound,
            ControllerError::Conflict(_) => ErrorKind::Conflict,
            ControllerError::AlreadyAllocated(_) => ErrorKind::AlreadyAllocated,
            ControllerError::NotAllocated(_) => ErrorKind::NotAllocated,
            ControllerError::NotEnoughAvailable { .. } => ErrorKind::NotEnoughAvailable,
            ControllerError::CloudUnavailable(_) => ErrorKind::CloudUnavailable,
            ControllerError::InconsistentState(_) => ErrorKind::InconsistentState,
            ControllerError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            ControllerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ControllerError::Store(_) | ControllerError::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<CloudError> for ControllerError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::NotFound(msg) => ControllerError::NotFound(msg),
            CloudError::Conflict(msg) => ControllerError::Conflict(msg),
            other => ControllerError::CloudUnavailable(other),
        }
    }
}

impl From<StoreError> for ControllerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => ControllerError::Conflict(err.to_string()),
            StoreError::NotFound(address) => {
                ControllerError::NotFound(format!("{} is not in the inventory", address))
            }
            other => ControllerError::Store(other),
        }
    }
}
