//! Inventory store errors

use std::net::IpAddr;
use thiserror::Error;

use crate::model::Binding;

/// Errors that can occur when reading or writing the inventory
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from the SQLite backend
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A conditional write found a binding other than the expected one
    #[error("{address} is no longer {expected}")]
    Conflict { address: IpAddr, expected: Binding },

    /// No row for the address
    #[error("{0} is not in the inventory")]
    NotFound(IpAddr),

    /// A stored row could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(String),
}
