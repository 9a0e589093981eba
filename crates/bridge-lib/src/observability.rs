//! Observability infrastructure for the bridge itself
//!
//! Provides:
//! - Prometheus self-metrics (scrape latency, upstream errors per phase)
//! - Structured JSON logging with tracing

use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use tracing::{debug, info, warn};

/// Default histogram buckets for scrape latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Self-metrics of the bridge, registered next to the usage gauges
#[derive(Clone)]
pub struct BridgeMetrics {
    scrape_duration_seconds: Histogram,
    scrape_errors: IntCounterVec,
}

impl BridgeMetrics {
    /// Create the metrics and register them with `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let scrape_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "kube_metrics_bridge_scrape_duration_seconds",
                "Time spent fetching usage from the metrics API and updating gauges",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let scrape_errors = IntCounterVec::new(
            Opts::new(
                "kube_metrics_bridge_scrape_errors_total",
                "Total number of failed metrics API queries",
            ),
            &["phase"],
        )?;

        registry.register(Box::new(scrape_duration_seconds.clone()))?;
        registry.register(Box::new(scrape_errors.clone()))?;

        Ok(Self {
            scrape_duration_seconds,
            scrape_errors,
        })
    }

    /// Record a scrape latency observation
    pub fn observe_scrape_duration(&self, duration_secs: f64) {
        self.scrape_duration_seconds.observe(duration_secs);
    }

    /// Increment the error counter for a scrape phase
    pub fn inc_scrape_errors(&self, phase: &str) {
        self.scrape_errors.with_label_values(&[phase]).inc();
    }

    pub fn scrape_errors(&self, phase: &str) -> u64 {
        self.scrape_errors.with_label_values(&[phase]).get()
    }
}

/// Structured logger for bridge events
///
/// Every record carries the cluster it talks to, so logs from several
/// bridges can be told apart.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    /// Log bridge startup
    pub fn log_startup(&self, version: &str, listen_addr: &str) {
        info!(
            event = "bridge_started",
            cluster = %self.cluster,
            bridge_version = %version,
            listen_addr = %listen_addr,
            "Metrics bridge started"
        );
    }

    /// Log bridge shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "bridge_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Metrics bridge shutting down"
        );
    }

    pub fn log_scrape_completed(&self, nodes: usize, containers: usize, duration_secs: f64) {
        debug!(
            event = "scrape_completed",
            cluster = %self.cluster,
            nodes = nodes,
            containers = containers,
            duration_secs = duration_secs,
            "Scrape completed"
        );
    }

    pub fn log_scrape_failed(&self, phase: &str, error: &str) {
        warn!(
            event = "scrape_failed",
            cluster = %self.cluster,
            phase = %phase,
            error = %error,
            "Metrics API query failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_metrics_registration() {
        let registry = Registry::new();
        let metrics = BridgeMetrics::new(&registry).unwrap();

        metrics.observe_scrape_duration(0.02);
        metrics.inc_scrape_errors("nodes");
        metrics.inc_scrape_errors("nodes");

        assert_eq!(metrics.scrape_errors("nodes"), 2);
        assert_eq!(metrics.scrape_errors("pods"), 0);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"kube_metrics_bridge_scrape_duration_seconds".to_string()));
        assert!(names.contains(&"kube_metrics_bridge_scrape_errors_total".to_string()));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        BridgeMetrics::new(&registry).unwrap();

        assert!(BridgeMetrics::new(&registry).is_err());
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("in-cluster");
        assert_eq!(logger.cluster, "in-cluster");
    }
}
