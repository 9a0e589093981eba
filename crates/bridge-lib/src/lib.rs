//! Library for the Kubernetes metrics bridge
//!
//! This crate provides the core functionality for:
//! - Querying node and pod usage from the `metrics.k8s.io` API
//! - Converting resource quantities to floating point
//! - Republishing usage as Prometheus gauges on every scrape
//! - The HTTP API, health checks and observability

pub mod api;
pub mod gauges;
pub mod health;
pub mod models;
pub mod observability;
pub mod quantity;
pub mod scrape;
pub mod source;

pub use gauges::{ExpositionFormat, UsageGauges};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{BridgeMetrics, StructuredLogger};
pub use scrape::{ScrapeError, ScrapeHandler, ScrapePhase, ScrapeSummary};
pub use source::{ClientOptions, KubeMetricsSource, MetricsSource};
