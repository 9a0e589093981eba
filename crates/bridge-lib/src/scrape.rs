//! Scrape handling
//!
//! One scrape is a linear read-and-republish cycle: list node usage,
//! update the node gauges, list pod usage, update the container gauges.
//! A failure in either phase aborts the rest of the scrape. Gauge writes
//! from a phase that already completed are kept, and series that stop
//! being reported keep their last value.

use crate::gauges::{ExpositionFormat, UsageGauges};
use crate::models::{ContainerUsageSample, NodeMetrics, NodeUsageSample, PodMetrics};
use crate::observability::{BridgeMetrics, StructuredLogger};
use crate::quantity::approximate_f64;
use crate::source::MetricsSource;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Phase of a scrape that talks to the metrics API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapePhase {
    Nodes,
    Pods,
}

impl ScrapePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapePhase::Nodes => "nodes",
            ScrapePhase::Pods => "pods",
        }
    }
}

impl fmt::Display for ScrapePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed scrape; displays as the underlying error text, unchanged
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ScrapeError {
    pub phase: ScrapePhase,
    error: anyhow::Error,
}

impl ScrapeError {
    fn new(phase: ScrapePhase, error: anyhow::Error) -> Self {
        Self { phase, error }
    }
}

/// What a successful scrape wrote into the gauges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrapeSummary {
    pub nodes: usize,
    pub containers: usize,
}

/// Convert listed node metrics into samples
///
/// All-or-nothing: one malformed quantity fails the whole list.
pub fn node_samples(items: &[NodeMetrics]) -> Result<Vec<NodeUsageSample>> {
    items
        .iter()
        .map(|node| -> Result<NodeUsageSample> {
            Ok(NodeUsageSample {
                node_name: node.metadata.name.clone().unwrap_or_default(),
                cpu_cores: approximate_f64(&node.usage.cpu)?,
                memory_bytes: approximate_f64(&node.usage.memory)?,
            })
        })
        .collect()
}

/// Flatten listed pod metrics into one sample per container
pub fn container_samples(items: &[PodMetrics]) -> Result<Vec<ContainerUsageSample>> {
    let mut samples = Vec::new();
    for pod in items {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let pod_name = pod.metadata.name.clone().unwrap_or_default();

        for container in &pod.containers {
            samples.push(ContainerUsageSample {
                namespace: namespace.clone(),
                pod_name: pod_name.clone(),
                container_name: container.name.clone(),
                cpu_cores: approximate_f64(&container.usage.cpu)?,
                memory_bytes: approximate_f64(&container.usage.memory)?,
            });
        }
    }
    Ok(samples)
}

/// Fetches usage from a metrics source and republishes it as gauges
#[derive(Clone)]
pub struct ScrapeHandler {
    source: Arc<dyn MetricsSource>,
    gauges: UsageGauges,
    metrics: BridgeMetrics,
    logger: StructuredLogger,
    namespace: String,
}

impl ScrapeHandler {
    /// Create a handler writing into its own fresh registry
    pub fn new(
        source: Arc<dyn MetricsSource>,
        logger: StructuredLogger,
    ) -> prometheus::Result<Self> {
        let gauges = UsageGauges::new()?;
        let metrics = BridgeMetrics::new(gauges.registry())?;
        Ok(Self::with_gauges(source, gauges, metrics, logger))
    }

    fn with_gauges(
        source: Arc<dyn MetricsSource>,
        gauges: UsageGauges,
        metrics: BridgeMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            source,
            gauges,
            metrics,
            logger,
            namespace: String::new(),
        }
    }

    /// Restrict pod listing to one namespace (empty means all)
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn gauges(&self) -> &UsageGauges {
        &self.gauges
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Run both scrape phases against the source
    pub async fn scrape(&self) -> Result<ScrapeSummary, ScrapeError> {
        let started = Instant::now();
        let result = self.run_phases().await;
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_scrape_duration(elapsed);

        match &result {
            Ok(summary) => {
                self.logger
                    .log_scrape_completed(summary.nodes, summary.containers, elapsed);
            }
            Err(err) => {
                self.metrics.inc_scrape_errors(err.phase.as_str());
                self.logger
                    .log_scrape_failed(err.phase.as_str(), &err.to_string());
            }
        }

        result
    }

    /// Encode the current state of every gauge
    pub fn render(&self, format: ExpositionFormat) -> prometheus::Result<Vec<u8>> {
        self.gauges.encode(format)
    }

    async fn run_phases(&self) -> Result<ScrapeSummary, ScrapeError> {
        let nodes = self
            .source
            .list_node_usage()
            .await
            .and_then(|items| node_samples(&items))
            .map_err(|e| ScrapeError::new(ScrapePhase::Nodes, e))?;
        for sample in &nodes {
            self.gauges.set_node_usage(sample);
        }

        // Node gauges stay updated even if this phase fails.
        let containers = self
            .source
            .list_pod_usage(&self.namespace)
            .await
            .and_then(|items| container_samples(&items))
            .map_err(|e| ScrapeError::new(ScrapePhase::Pods, e))?;
        for sample in &containers {
            self.gauges.set_container_usage(sample);
        }

        Ok(ScrapeSummary {
            nodes: nodes.len(),
            containers: containers.len(),
        })
    }
}
