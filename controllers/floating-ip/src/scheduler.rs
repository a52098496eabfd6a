//! Background reconciliation loop.
//!
//! One task owns the [`Reconciler`], so passes never overlap. A pass runs at
//! startup, then every `interval`, or earlier when a [`ReconcileHandle`]
//! asks for one. After a failed pass the next attempt waits a Fibonacci
//! backoff instead of the full interval.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::query::PoolQuery;
use crate::reconciler::{ReconcileReport, Reconciler};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shortest retry delay after a failed pass
const BACKOFF_MIN: Duration = Duration::from_secs(30);

/// Outcome of the most recent passes, served by the admin API
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_report: Option<ReconcileReport>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

pub type SharedStatus = Arc<RwLock<ReconcileStatus>>;

/// Requests an out-of-schedule pass
#[derive(Debug, Clone)]
pub struct ReconcileHandle {
    tx: mpsc::Sender<()>,
}

impl ReconcileHandle {
    /// Ask for a pass. Requests made while one is already pending are merged.
    /// Returns `false` once the scheduler has stopped.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Reconciliation already pending");
                true
            }
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

pub struct ReconcileScheduler {
    reconciler: Reconciler,
    query: Arc<PoolQuery>,
    metrics: Metrics,
    status: SharedStatus,
    interval: Duration,
    backoff: FibonacciBackoff,
    triggers: mpsc::Receiver<()>,
}

impl ReconcileScheduler {
    pub fn new(
        reconciler: Reconciler,
        query: Arc<PoolQuery>,
        metrics: Metrics,
        interval: Duration,
        backoff_max: Duration,
    ) -> (Self, ReconcileHandle) {
        let (tx, triggers) = mpsc::channel(1);
        let scheduler = Self {
            reconciler,
            query,
            metrics,
            status: SharedStatus::default(),
            interval,
            backoff: FibonacciBackoff::new(BACKOFF_MIN.min(interval), backoff_max),
            triggers,
        };
        (scheduler, ReconcileHandle { tx })
    }

    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    /// Run one pass and record its outcome
    pub async fn run_once(&mut self) -> Result<ReconcileReport, ControllerError> {
        let started = Instant::now();
        let result = self.reconciler.reconcile().await;
        self.metrics.observe_reconcile(result.as_ref(), started.elapsed());

        {
            let mut status = self.status.write();
            status.last_run = Some(Utc::now());
            match &result {
                Ok(report) => {
                    status.last_success = status.last_run;
                    status.last_report = Some(report.clone());
                    status.last_error = None;
                    status.consecutive_failures = 0;
                }
                Err(e) => {
                    status.last_error = Some(e.to_string());
                    status.consecutive_failures += 1;
                }
            }
        }

        match self.query.summary().await {
            Ok(summary) => self.metrics.set_inventory(&summary),
            Err(e) => warn!("Failed to refresh inventory metrics: {}", e),
        }
        result
    }

    /// Reconcile until the task is dropped
    pub async fn run(mut self) {
        info!("Reconciliation scheduler started (interval {}s)", self.interval.as_secs());
        let mut triggers_open = true;

        loop {
            let delay = match self.run_once().await {
                Ok(_) => {
                    self.backoff.reset();
                    self.interval
                }
                Err(e) => {
                    let delay = self.backoff.next_backoff();
                    error!("Reconciliation failed: {} (retrying in {}s)", e, delay.as_secs());
                    delay
                }
            };

            if !triggers_open {
                tokio::time::sleep(delay).await;
                continue;
            }
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                trigger = self.triggers.recv() => match trigger {
                    Some(()) => info!("Reconciliation requested"),
                    None => {
                        debug!("All reconcile handles dropped; running on schedule only");
                        triggers_open = false;
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::ReconcilePolicy;
    use fip_inventory::MemoryStore;
    use openstack_client::{MockCloudClient, Operation};

    fn scheduler(cloud: &MockCloudClient) -> (ReconcileScheduler, ReconcileHandle) {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(Arc::new(cloud.clone()), store.clone(), ReconcilePolicy::default());
        ReconcileScheduler::new(
            reconciler,
            Arc::new(PoolQuery::new(store)),
            Metrics::new().unwrap(),
            Duration::from_secs(300),
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn test_run_once_records_status() {
        let cloud = MockCloudClient::new();
        cloud.add_network("ext-net", true);
        cloud.add_subnet("ext-subnet", "ext-net", 4, &[("10.0.0.5", "10.0.0.6")]);
        let (mut scheduler, _handle) = scheduler(&cloud);
        let status = scheduler.status();

        cloud.fail_on(Operation::ListFloatingIps);
        assert!(scheduler.run_once().await.is_err());
        assert_eq!(status.read().consecutive_failures, 1);
        assert!(status.read().last_success.is_none());

        cloud.recover(Operation::ListFloatingIps);
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.created, 2);
        let snapshot = status.read().clone();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.last_error.is_none());
        assert_eq!(snapshot.last_report, Some(report));
    }

    #[tokio::test]
    async fn test_trigger_merges_pending_requests() {
        let cloud = MockCloudClient::new();
        let (scheduler, handle) = scheduler(&cloud);

        assert!(handle.trigger());
        assert!(handle.trigger());

        drop(scheduler);
        assert!(!handle.trigger());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_runs_a_pass_before_the_interval() {
        let cloud = MockCloudClient::new();
        cloud.add_network("ext-net", true);
        let (scheduler, handle) = scheduler(&cloud);
        let task = tokio::spawn(scheduler.run());

        // let the startup pass finish
        tokio::time::sleep(Duration::from_secs(1)).await;
        let passes = |cloud: &MockCloudClient| {
            cloud
                .operations()
                .iter()
                .filter(|op| **op == Operation::ListExternalNetworks)
                .count()
        };
        assert_eq!(passes(&cloud), 1);

        assert!(handle.trigger());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(passes(&cloud), 2);

        task.abort();
    }
}
