//! Prometheus metrics for the controller
//!
//! Exports:
//! - reconciliation passes by outcome, and their duration
//! - allocator operations by operation and outcome (`ok` or the error kind)
//! - inventory rows per status, refreshed after every pass

use crate::error::ControllerError;
use crate::query::PoolSummary;
use crate::reconciler::ReconcileReport;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::time::Duration;
use tracing::error;

/// Metrics owned by one controller instance
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_passes: IntCounterVec,
    reconcile_duration: Histogram,
    reconcile_rows: IntCounterVec,
    allocator_ops: IntCounterVec,
    inventory_rows: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_passes = IntCounterVec::new(
            Opts::new("fip_reconcile_passes_total", "Reconciliation passes by outcome"),
            &["outcome"],
        )?;
        let reconcile_duration = Histogram::with_opts(HistogramOpts::new(
            "fip_reconcile_duration_seconds",
            "Duration of reconciliation passes",
        ))?;
        let reconcile_rows = IntCounterVec::new(
            Opts::new("fip_reconcile_rows_total", "Rows written or checked by reconciliation, by result"),
            &["result"],
        )?;
        let allocator_ops = IntCounterVec::new(
            Opts::new("fip_allocator_operations_total", "Allocator operations by operation and outcome"),
            &["op", "outcome"],
        )?;
        let inventory_rows = IntGaugeVec::new(
            Opts::new("fip_inventory_rows", "Inventory rows per status"),
            &["status"],
        )?;

        registry.register(Box::new(reconcile_passes.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(reconcile_rows.clone()))?;
        registry.register(Box::new(allocator_ops.clone()))?;
        registry.register(Box::new(inventory_rows.clone()))?;

        Ok(Self {
            registry,
            reconcile_passes,
            reconcile_duration,
            reconcile_rows,
            allocator_ops,
            inventory_rows,
        })
    }

    pub fn observe_reconcile(&self, result: Result<&ReconcileReport, &ControllerError>, elapsed: Duration) {
        self.reconcile_duration.observe(elapsed.as_secs_f64());
        match result {
            Ok(report) => {
                self.reconcile_passes.with_label_values(&["ok"]).inc();
                for (label, value) in [
                    ("created", report.created),
                    ("updated", report.updated),
                    ("unchanged", report.unchanged),
                    ("contended", report.contended),
                    ("pruned", report.pruned),
                ] {
                    self.reconcile_rows.with_label_values(&[label]).inc_by(value as u64);
                }
            }
            Err(e) => self.reconcile_passes.with_label_values(&[e.kind().as_str()]).inc(),
        }
    }

    pub fn observe_op<T>(&self, op: &str, result: &Result<T, ControllerError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        self.allocator_ops.with_label_values(&[op, outcome]).inc();
    }

    pub fn set_inventory(&self, summary: &PoolSummary) {
        for (status, count) in [
            ("available", summary.available),
            ("reserved", summary.reserved),
            ("allocated", summary.allocated),
            ("released", summary.released),
        ] {
            self.inventory_rows.with_label_values(&[status]).set(count as i64);
        }
    }

    /// Metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_else(|e| {
                error!("Failed to encode metrics: {}", e);
                String::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_labelled_by_error_kind() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_op::<()>("assign", &Ok(()));
        metrics.observe_op::<()>("assign", &Err(ControllerError::Conflict("taken".to_string())));
        metrics.observe_reconcile(
            Err(&ControllerError::InvalidConfig("x".to_string())),
            Duration::from_millis(5),
        );

        let text = metrics.render();
        assert!(text.contains(r#"fip_allocator_operations_total{op="assign",outcome="ok"} 1"#));
        assert!(text.contains(r#"fip_allocator_operations_total{op="assign",outcome="conflict"} 1"#));
        assert!(text.contains(r#"fip_reconcile_passes_total{outcome="invalid_config"} 1"#));
    }

    #[test]
    fn test_inventory_gauge_tracks_summary() {
        let metrics = Metrics::new().unwrap();
        metrics.set_inventory(&PoolSummary {
            total: 5,
            available: 3,
            reserved: 1,
            allocated: 1,
            released: 0,
        });
        let text = metrics.render();
        assert!(text.contains(r#"fip_inventory_rows{status="available"} 3"#));
        assert!(text.contains(r#"fip_inventory_rows{status="released"} 0"#));
    }

    #[test]
    fn test_instances_do_not_share_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.observe_op::<()>("release", &Ok(()));
        assert!(!b.render().contains("release"));
    }
}
