//! Main controller implementation.
//!
//! `Controller` wires the cloud client, the inventory store, the
//! reconciliation scheduler and the admin API together, then runs the
//! scheduler and the HTTP server side by side.

use crate::allocator::Allocator;
use crate::api::{self, AppState};
use crate::config::{ControllerConfig, MEMORY_DATABASE};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::query::PoolQuery;
use crate::reconciler::Reconciler;
use crate::scheduler::ReconcileScheduler;
use axum::Router;
use fip_inventory::{InventoryStore, MemoryStore, SqliteStore};
use openstack_client::{CloudNetworkGateway, OpenStackClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Main controller for floating IP management.
pub struct Controller {
    listen_addr: SocketAddr,
    scheduler: ReconcileScheduler,
    router: Router,
}

impl Controller {
    /// Creates a new controller instance from configuration.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Floating IP Controller");

        let client = OpenStackClient::new(
            config.network_url.clone(),
            config.compute_url.clone(),
            config.auth_token.clone(),
            config.cloud_timeout,
        )?;

        // Validate token and connectivity before proceeding
        info!("Validating cloud token and connectivity...");
        client.validate_token().await.map_err(|e| {
            error!("Failed to validate cloud token: {}", e);
            error!("Please ensure:");
            error!("  1. OS_AUTH_TOKEN environment variable is set correctly");
            error!("  2. The token has not expired");
            error!("  3. The network API is reachable at {}", config.network_url);
            ControllerError::from(e)
        })?;
        info!("Cloud token validated and connectivity established");

        let store = open_store(&config.database_url).await?;
        Self::with_parts(Arc::new(client), store, &config)
    }

    /// Build a controller around an existing gateway and store
    pub fn with_parts(
        cloud: Arc<dyn CloudNetworkGateway>,
        store: Arc<dyn InventoryStore>,
        config: &ControllerConfig,
    ) -> Result<Self, ControllerError> {
        let metrics = Metrics::new()
            .map_err(|e| ControllerError::InvalidConfig(format!("failed to register metrics: {}", e)))?;
        let query = Arc::new(PoolQuery::new(Arc::clone(&store)));
        let reconciler = Reconciler::new(Arc::clone(&cloud), Arc::clone(&store), config.reconcile_policy());
        let allocator = Arc::new(Allocator::new(cloud, store, config.allocator_policy()));

        let (scheduler, reconcile) = ReconcileScheduler::new(
            reconciler,
            Arc::clone(&query),
            metrics.clone(),
            config.reconcile_interval,
            config.backoff_max,
        );

        let router = api::router(AppState {
            allocator,
            query,
            reconcile,
            status: scheduler.status(),
            metrics,
        });

        Ok(Self {
            listen_addr: config.listen_addr,
            scheduler,
            router,
        })
    }

    /// Serve the admin API and reconcile until either stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!("Admin API listening on {}", self.listen_addr);

        let scheduler = tokio::spawn(self.scheduler.run());
        let served = axum::serve(listener, self.router).await;
        scheduler.abort();

        match served {
            Ok(()) => {
                warn!("Admin API stopped");
                Ok(())
            }
            Err(e) => {
                error!("Admin API failed: {}", e);
                Err(e.into())
            }
        }
    }
}

/// Open the inventory store named by `DATABASE_URL`
pub async fn open_store(database_url: &str) -> Result<Arc<dyn InventoryStore>, ControllerError> {
    if database_url == MEMORY_DATABASE {
        warn!("Using the in-memory inventory; rows are lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(database_url).await.map_err(|e| {
        error!("Failed to open inventory database {}: {}", database_url, e);
        ControllerError::Store(e)
    })?;
    info!("Inventory database {} ready", database_url);
    Ok(Arc::new(store))
}
