//! OpenStack REST API Client
//!
//! A Rust client for the parts of the OpenStack Networking (Neutron) and
//! Compute (Nova) APIs that floating IP management needs.
//!
//! # Example
//!
//! ```no_run
//! use openstack_client::{CloudNetworkGateway, OpenStackClient};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OpenStackClient::new(
//!     "http://neutron:9696".to_string(),
//!     "http://nova:8774/v2.1".to_string(),
//!     "your-keystone-token".to_string(),
//!     Duration::from_secs(30),
//! )?;
//!
//! for network in client.list_external_networks().await? {
//!     let subnets = client.list_subnets(&network.id).await?;
//!     println!("{}: {} subnets", network.id, subnets.len());
//! }
//!
//! let address = "203.0.113.10".parse()?;
//! if let Some(fip) = client.find_floating_ip(address).await? {
//!     println!("{} bound: {}", fip.floating_ip_address, fip.is_bound());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Floating IPs**: find, create, associate and disassociate
//! - **Networks**: external networks and their subnet allocation pools
//! - **Ports**: list, per-VM lookup, create and attach to a server
//! - **Pagination**: follows Neutron `*_links` to fetch every page
//! - **`test-util`**: in-memory `MockCloudClient` with call log and failure injection

pub mod client;
pub mod common;
pub mod error;
pub mod gateway;
pub mod models;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::OpenStackClient;
pub use common::HttpClient;
pub use error::CloudError;
pub use gateway::CloudNetworkGateway;
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCloudClient, Operation, RecordedCall};
