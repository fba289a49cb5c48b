// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the NEG controller.
//!
//! Components record through the [`MetricsSink`] trait handed to them at
//! construction. [`PrometheusMetrics`] owns its own registry, exposed by the
//! binary on `/metrics`; [`NoopMetrics`] discards everything.
//!
//! All metric names carry the `negsync_` prefix.
//!
//! # Example
//!
//! ```rust,no_run
//! use negsync::metrics::{MetricsSink, PrometheusMetrics};
//! use std::time::Duration;
//!
//! let metrics = PrometheusMetrics::new()?;
//! metrics.record_reconciliation("service", true, Duration::from_millis(12));
//! let text = metrics.gather()?;
//! # Ok::<(), prometheus::Error>(())
//! ```

use crate::types::NegUsage;
use chrono::{DateTime, Utc};
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Namespace prefix for all metrics
const METRICS_NAMESPACE: &str = "negsync";

/// Recording interface used by the controller, syncers and garbage collector.
pub trait MetricsSink: Send + Sync {
    /// A finished reconciliation pass of `resource_type` (`service`, `endpoint`, `node`, `syncer`).
    fn record_reconciliation(&self, resource_type: &str, success: bool, duration: Duration);

    /// An error surfaced by a controller loop (`service`, `gc`, ...).
    fn record_controller_error(&self, source: &str);

    /// Completion time of the latest service or endpoint pass.
    fn set_last_sync(&self, at: DateTime<Utc>);

    /// One garbage collection deletion attempt of `kind`, `result` is `success` or `error`.
    fn record_gc_deletion(&self, kind: &str, result: &str);

    /// Replace the NEG usage of one service.
    fn set_neg_usage(&self, service_key: &str, usage: NegUsage);

    /// Forget the NEG usage of one service.
    fn delete_neg_usage(&self, service_key: &str);
}

/// Sink that records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_reconciliation(&self, _resource_type: &str, _success: bool, _duration: Duration) {}
    fn record_controller_error(&self, _source: &str) {}
    fn set_last_sync(&self, _at: DateTime<Utc>) {}
    fn record_gc_deletion(&self, _kind: &str, _result: &str) {}
    fn set_neg_usage(&self, _service_key: &str, _usage: NegUsage) {}
    fn delete_neg_usage(&self, _service_key: &str) {}
}

/// Prometheus-backed sink with its own registry.
pub struct PrometheusMetrics {
    registry: Registry,
    reconciliations: CounterVec,
    reconciliation_duration: HistogramVec,
    errors: CounterVec,
    last_sync: Gauge,
    gc_deletions: CounterVec,
    neg_usage: GaugeVec,
    usage_by_service: Mutex<HashMap<String, NegUsage>>,
}

fn register<C>(registry: &Registry, collector: &C)
where
    C: prometheus::core::Collector + Clone + 'static,
{
    if let Err(e) = registry.register(Box::new(collector.clone())) {
        warn!(error = %e, "Failed to register metric");
    }
}

impl PrometheusMetrics {
    /// Build the metric families and register them in a fresh registry.
    ///
    /// A registration error is logged and the metric stays unexported.
    ///
    /// # Errors
    ///
    /// Returns an error if prometheus rejects a metric definition.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = CounterVec::new(
            Opts::new(
                format!("{METRICS_NAMESPACE}_reconciliations_total"),
                "Total number of reconciliation passes by resource type and status",
            ),
            &["resource_type", "status"],
        )?;
        let reconciliation_duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
                "Duration of reconciliation passes in seconds by resource type",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
            &["resource_type"],
        )?;
        let errors = CounterVec::new(
            Opts::new(
                format!("{METRICS_NAMESPACE}_controller_errors_total"),
                "Total number of controller errors by source",
            ),
            &["source"],
        )?;
        let last_sync = Gauge::new(
            format!("{METRICS_NAMESPACE}_last_sync_timestamp_seconds"),
            "Unix time of the last completed service or endpoint pass",
        )?;
        let gc_deletions = CounterVec::new(
            Opts::new(
                format!("{METRICS_NAMESPACE}_gc_deletions_total"),
                "Garbage collection deletion attempts by resource kind and result",
            ),
            &["kind", "result"],
        )?;
        let neg_usage = GaugeVec::new(
            Opts::new(
                format!("{METRICS_NAMESPACE}_neg_usage"),
                "Number of NEGs by usage type across all services",
            ),
            &["type"],
        )?;

        register(&registry, &reconciliations);
        register(&registry, &reconciliation_duration);
        register(&registry, &errors);
        register(&registry, &last_sync);
        register(&registry, &gc_deletions);
        register(&registry, &neg_usage);

        Ok(Self {
            registry,
            reconciliations,
            reconciliation_duration,
            errors,
            last_sync,
            gc_deletions,
            neg_usage,
            usage_by_service: Mutex::new(HashMap::new()),
        })
    }

    /// Gather and encode all metrics in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_usage(&self, usage: &HashMap<String, NegUsage>) {
        let mut total = NegUsage::default();
        for u in usage.values() {
            total.ingress += u.ingress;
            total.standalone += u.standalone;
            total.mesh += u.mesh;
            total.vm_ip += u.vm_ip;
            total.custom_named += u.custom_named;
            total.successful += u.successful;
            total.errored += u.errored;
        }
        for (label, value) in [
            ("ingress", total.ingress),
            ("standalone", total.standalone),
            ("mesh", total.mesh),
            ("vm_ip", total.vm_ip),
            ("custom_named", total.custom_named),
            ("successful", total.successful),
            ("errored", total.errored),
        ] {
            self.neg_usage.with_label_values(&[label]).set(value as f64);
        }
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_reconciliation(&self, resource_type: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };
        self.reconciliations
            .with_label_values(&[resource_type, status])
            .inc();
        self.reconciliation_duration
            .with_label_values(&[resource_type])
            .observe(duration.as_secs_f64());
    }

    fn record_controller_error(&self, source: &str) {
        self.errors.with_label_values(&[source]).inc();
    }

    #[allow(clippy::cast_precision_loss)]
    fn set_last_sync(&self, at: DateTime<Utc>) {
        self.last_sync.set(at.timestamp_millis() as f64 / 1000.0);
    }

    fn record_gc_deletion(&self, kind: &str, result: &str) {
        self.gc_deletions.with_label_values(&[kind, result]).inc();
    }

    fn set_neg_usage(&self, service_key: &str, usage: NegUsage) {
        let mut by_service = self
            .usage_by_service
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        by_service.insert(service_key.to_string(), usage);
        self.publish_usage(&by_service);
    }

    fn delete_neg_usage(&self, service_key: &str) {
        let mut by_service = self
            .usage_by_service
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        by_service.remove(service_key);
        self.publish_usage(&by_service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reconciliation() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_reconciliation("service", true, Duration::from_millis(500));
        metrics.record_reconciliation("service", false, Duration::from_millis(5));

        let ok = metrics
            .reconciliations
            .with_label_values(&["service", "success"]);
        assert!((ok.get() - 1.0).abs() < f64::EPSILON);
        let histogram = metrics
            .reconciliation_duration
            .with_label_values(&["service"]);
        assert_eq!(histogram.get_sample_count(), 2);
    }

    /// Test that usage gauges are totals over the services currently tracked
    #[test]
    fn test_neg_usage_totals() {
        let metrics = PrometheusMetrics::new().unwrap();
        let usage = NegUsage {
            standalone: 2,
            successful: 2,
            ..Default::default()
        };

        metrics.set_neg_usage("default/a", usage);
        metrics.set_neg_usage("default/b", usage);
        let gauge = metrics.neg_usage.with_label_values(&["standalone"]);
        assert!((gauge.get() - 4.0).abs() < f64::EPSILON);

        metrics.delete_neg_usage("default/a");
        assert!((gauge.get() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gather_uses_own_registry() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_gc_deletion("networkEndpointGroup", "success");
        metrics.set_last_sync(Utc::now());

        let text = metrics.gather().unwrap();

        assert!(text.contains("negsync_gc_deletions_total"));
        assert!(text.contains("negsync_last_sync_timestamp_seconds"));
        assert!(!PrometheusMetrics::new()
            .unwrap()
            .gather()
            .unwrap()
            .contains("networkEndpointGroup"));
    }
}
