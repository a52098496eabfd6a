//! Floating IP Controller
//!
//! Keeps the portal's floating IP inventory in step with OpenStack and
//! serves allocation requests:
//! - Reconciliation: mirrors every external allocation pool address into the inventory
//! - Allocation: reserves addresses for projects and attaches them to VMs
//! - Queries: available addresses, per-project and per-VM views, pool statistics

mod allocator;
mod api;
mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod query;
mod reconciler;
mod scheduler;

#[cfg(test)]
mod test_utils;

use anyhow::Context;
use config::ControllerConfig;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Floating IP Controller");

    let config = ControllerConfig::from_env().context("failed to load configuration")?;
    config.log_summary();

    // Initialize and run controller
    let controller = Controller::new(config)
        .await
        .context("failed to initialize controller")?;
    controller.run().await.context("controller stopped")?;

    Ok(())
}
