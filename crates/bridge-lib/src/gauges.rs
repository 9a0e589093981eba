//! Usage gauges exported to scrapers
//!
//! Each `UsageGauges` owns its own Prometheus registry, so several
//! instances can coexist in one process (one per test, for example).
//! Series are overwritten on every update and never removed.

use crate::models::{ContainerUsageSample, NodeUsageSample};
use prometheus::proto::{MetricFamily, MetricType};
use prometheus::{Encoder, GaugeVec, Opts, ProtobufEncoder, Registry, TextEncoder};
use std::borrow::Cow;

pub const NODE_CPU: &str = "kube_metrics_node_cpu";
pub const NODE_MEMORY: &str = "kube_metrics_node_memory";
pub const CONTAINER_CPU: &str = "kube_metrics_container_cpu";
pub const CONTAINER_MEMORY: &str = "kube_metrics_container_memory";

const NODE_LABELS: &[&str] = &["node"];
const CONTAINER_LABELS: &[&str] = &["namespace", "pod", "container"];

const PROTOBUF_MEDIA_TYPE: &str = "application/vnd.google.protobuf";
const PROTOBUF_MESSAGE: &str = "io.prometheus.client.MetricFamily";
const TEXT_MEDIA_TYPE: &str = "text/plain";
const OPENMETRICS_MEDIA_TYPE: &str = "application/openmetrics-text";
const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Exposition formats a scraper can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpositionFormat {
    /// Prometheus text format, version 0.0.4
    Text,
    /// Length-delimited protobuf `MetricFamily` messages
    Protobuf,
    /// OpenMetrics text format, version 1.0.0
    OpenMetrics,
}

impl ExpositionFormat {
    /// Pick the format from an `Accept` header value
    ///
    /// Media ranges are tried in descending `q` order (header order on
    /// ties); ranges with `q=0` are refused. The first range naming a
    /// supported format wins, anything else falls back to text.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return Self::Text;
        };

        let mut ranges: Vec<MediaRange<'_>> = accept
            .split(',')
            .filter_map(MediaRange::parse)
            .filter(|range| range.quality > 0.0)
            .collect();
        ranges.sort_by(|a, b| b.quality.total_cmp(&a.quality));

        ranges
            .iter()
            .find_map(|range| range.format())
            .unwrap_or(Self::Text)
    }

    pub fn content_type(&self) -> String {
        match self {
            Self::Text => TextEncoder::new().format_type().to_string(),
            Self::Protobuf => ProtobufEncoder::new().format_type().to_string(),
            Self::OpenMetrics => OPENMETRICS_CONTENT_TYPE.to_string(),
        }
    }
}

/// One entry of an `Accept` header
struct MediaRange<'a> {
    media_type: String,
    params: Vec<(&'a str, &'a str)>,
    quality: f64,
}

impl<'a> MediaRange<'a> {
    fn parse(entry: &'a str) -> Option<Self> {
        let mut parts = entry.split(';');
        let media_type = parts.next()?.trim().to_ascii_lowercase();
        if media_type.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        let mut quality = 1.0;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            if key.eq_ignore_ascii_case("q") {
                quality = value.parse().ok()?;
            } else {
                params.push((key, value));
            }
        }

        Some(Self {
            media_type,
            params,
            quality,
        })
    }

    fn param(&self, name: &str) -> Option<&'a str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
    }

    fn format(&self) -> Option<ExpositionFormat> {
        match self.media_type.as_str() {
            PROTOBUF_MEDIA_TYPE
                if self.param("proto") == Some(PROTOBUF_MESSAGE)
                    && self.param("encoding") == Some("delimited") =>
            {
                Some(ExpositionFormat::Protobuf)
            }
            TEXT_MEDIA_TYPE if matches!(self.param("version"), None | Some("0.0.4")) => {
                Some(ExpositionFormat::Text)
            }
            OPENMETRICS_MEDIA_TYPE
                if matches!(self.param("version"), None | Some("0.0.1") | Some("1.0.0")) =>
            {
                Some(ExpositionFormat::OpenMetrics)
            }
            _ => None,
        }
    }
}

/// Render families as OpenMetrics text
///
/// The sample lines match the 0.0.4 text format. Counter metadata is named
/// after the family without its `_total` suffix and the body ends with `# EOF`.
fn encode_open_metrics(families: &[MetricFamily], buffer: &mut Vec<u8>) -> prometheus::Result<()> {
    let mut text = Vec::new();
    TextEncoder::new().encode(families, &mut text)?;
    let text = String::from_utf8(text).map_err(|err| prometheus::Error::Msg(err.to_string()))?;

    let counters: Vec<&str> = families
        .iter()
        .filter(|family| family.get_field_type() == MetricType::COUNTER)
        .map(|family| family.get_name())
        .collect();

    for line in text.lines() {
        buffer.extend_from_slice(open_metrics_line(line, &counters).as_bytes());
        buffer.push(b'\n');
    }
    buffer.extend_from_slice(b"# EOF\n");
    Ok(())
}

fn open_metrics_line<'a>(line: &'a str, counters: &[&str]) -> Cow<'a, str> {
    let mut parts = line.splitn(4, ' ');
    if let (Some("#"), Some(kind @ ("HELP" | "TYPE")), Some(name)) =
        (parts.next(), parts.next(), parts.next())
    {
        if counters.contains(&name) {
            if let Some(family) = name.strip_suffix("_total") {
                return match parts.next() {
                    Some(rest) => Cow::Owned(format!("# {kind} {family} {rest}")),
                    None => Cow::Owned(format!("# {kind} {family}")),
                };
            }
        }
    }
    Cow::Borrowed(line)
}

/// Node and container usage gauges backed by an owned registry
#[derive(Clone)]
pub struct UsageGauges {
    registry: Registry,
    node_cpu: GaugeVec,
    node_memory: GaugeVec,
    container_cpu: GaugeVec,
    container_memory: GaugeVec,
}

impl UsageGauges {
    /// Create the four gauges in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create the four gauges and register them with `registry`
    fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let node_cpu = GaugeVec::new(
            Opts::new(NODE_CPU, "Node CPU usage from kubernetes metrics server"),
            NODE_LABELS,
        )?;
        let node_memory = GaugeVec::new(
            Opts::new(NODE_MEMORY, "Node memory usage from kubernetes metrics server"),
            NODE_LABELS,
        )?;
        let container_cpu = GaugeVec::new(
            Opts::new(CONTAINER_CPU, "Container CPU usage from kubernetes metrics server"),
            CONTAINER_LABELS,
        )?;
        let container_memory = GaugeVec::new(
            Opts::new(
                CONTAINER_MEMORY,
                "Container memory usage from kubernetes metrics server",
            ),
            CONTAINER_LABELS,
        )?;

        registry.register(Box::new(node_cpu.clone()))?;
        registry.register(Box::new(node_memory.clone()))?;
        registry.register(Box::new(container_cpu.clone()))?;
        registry.register(Box::new(container_memory.clone()))?;

        Ok(Self {
            registry,
            node_cpu,
            node_memory,
            container_cpu,
            container_memory,
        })
    }

    /// Registry holding the gauges, for registering further collectors
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_node_usage(&self, sample: &NodeUsageSample) {
        let labels = [sample.node_name.as_str()];
        self.node_cpu
            .with_label_values(&labels)
            .set(sample.cpu_cores);
        self.node_memory
            .with_label_values(&labels)
            .set(sample.memory_bytes);
    }

    pub fn set_container_usage(&self, sample: &ContainerUsageSample) {
        let labels = [
            sample.namespace.as_str(),
            sample.pod_name.as_str(),
            sample.container_name.as_str(),
        ];
        self.container_cpu
            .with_label_values(&labels)
            .set(sample.cpu_cores);
        self.container_memory
            .with_label_values(&labels)
            .set(sample.memory_bytes);
    }

    /// Current node gauge value, if the node has ever been reported
    pub fn node_cpu(&self, node: &str) -> Option<f64> {
        self.lookup(NODE_CPU, &[("node", node)])
    }

    pub fn node_memory(&self, node: &str) -> Option<f64> {
        self.lookup(NODE_MEMORY, &[("node", node)])
    }

    pub fn container_cpu(&self, namespace: &str, pod: &str, container: &str) -> Option<f64> {
        self.lookup(
            CONTAINER_CPU,
            &[("namespace", namespace), ("pod", pod), ("container", container)],
        )
    }

    pub fn container_memory(&self, namespace: &str, pod: &str, container: &str) -> Option<f64> {
        self.lookup(
            CONTAINER_MEMORY,
            &[("namespace", namespace), ("pod", pod), ("container", container)],
        )
    }

    /// Number of label-tuples currently held by the named gauge
    pub fn series_count(&self, name: &str) -> usize {
        self.gather()
            .iter()
            .find(|family| family.get_name() == name)
            .map(|family| family.get_metric().len())
            .unwrap_or(0)
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Encode every metric in the registry
    pub fn encode(&self, format: ExpositionFormat) -> prometheus::Result<Vec<u8>> {
        let families = self.gather();
        let mut buffer = Vec::new();
        match format {
            ExpositionFormat::Text => TextEncoder::new().encode(&families, &mut buffer)?,
            ExpositionFormat::Protobuf => ProtobufEncoder::new().encode(&families, &mut buffer)?,
            ExpositionFormat::OpenMetrics => encode_open_metrics(&families, &mut buffer)?,
        }
        Ok(buffer)
    }

    fn lookup(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let families = self.gather();
        let family = families.iter().find(|family| family.get_name() == name)?;

        family
            .get_metric()
            .iter()
            .find(|metric| {
                labels.iter().all(|(key, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *key && pair.get_value() == *value)
                })
            })
            .map(|metric| metric.get_gauge().get_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, cpu: f64, memory: f64) -> NodeUsageSample {
        NodeUsageSample {
            node_name: name.to_string(),
            cpu_cores: cpu,
            memory_bytes: memory,
        }
    }

    fn container(ns: &str, pod: &str, name: &str, cpu: f64, memory: f64) -> ContainerUsageSample {
        ContainerUsageSample {
            namespace: ns.to_string(),
            pod_name: pod.to_string(),
            container_name: name.to_string(),
            cpu_cores: cpu,
            memory_bytes: memory,
        }
    }

    #[test]
    fn test_instances_are_isolated() {
        let first = UsageGauges::new().unwrap();
        let second = UsageGauges::new().unwrap();

        first.set_node_usage(&node("worker-1", 1.0, 2.0));

        assert_eq!(first.series_count(NODE_CPU), 1);
        assert_eq!(second.series_count(NODE_CPU), 0);
    }

    #[test]
    fn test_node_usage_overwrites_previous_value() {
        let gauges = UsageGauges::new().unwrap();

        gauges.set_node_usage(&node("worker-1", 1.0, 100.0));
        gauges.set_node_usage(&node("worker-1", 3.0, 50.0));

        assert_eq!(gauges.node_cpu("worker-1"), Some(3.0));
        assert_eq!(gauges.node_memory("worker-1"), Some(50.0));
        assert_eq!(gauges.series_count(NODE_CPU), 1);
    }

    #[test]
    fn test_container_usage_keyed_by_full_label_tuple() {
        let gauges = UsageGauges::new().unwrap();

        gauges.set_container_usage(&container("default", "app-1", "main", 0.1, 1e8));
        gauges.set_container_usage(&container("default", "app-1", "sidecar", 0.01, 1e7));
        gauges.set_container_usage(&container("staging", "app-1", "main", 0.2, 2e8));

        assert_eq!(gauges.series_count(CONTAINER_CPU), 3);
        assert_eq!(gauges.series_count(CONTAINER_MEMORY), 3);
        assert_eq!(gauges.container_cpu("staging", "app-1", "main"), Some(0.2));
        assert_eq!(gauges.container_memory("default", "app-1", "sidecar"), Some(1e7));
        assert_eq!(gauges.container_cpu("default", "app-2", "main"), None);
    }

    #[test]
    fn test_text_encoding_contains_series() {
        let gauges = UsageGauges::new().unwrap();
        gauges.set_node_usage(&node("worker-1", 2.5, 4e9));

        let body = String::from_utf8(gauges.encode(ExpositionFormat::Text).unwrap()).unwrap();

        assert!(body.contains("# HELP kube_metrics_node_cpu Node CPU usage from kubernetes metrics server"));
        assert!(body.contains("# TYPE kube_metrics_node_memory gauge"));
        assert!(body.contains("kube_metrics_node_cpu{node=\"worker-1\"} 2.5"));
    }

    #[test]
    fn test_unused_gauges_are_not_rendered() {
        let gauges = UsageGauges::new().unwrap();

        let body = String::from_utf8(gauges.encode(ExpositionFormat::Text).unwrap()).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_protobuf_encoding_is_not_empty() {
        let gauges = UsageGauges::new().unwrap();
        gauges.set_node_usage(&node("worker-1", 2.5, 4e9));

        let body = gauges.encode(ExpositionFormat::Protobuf).unwrap();
        assert!(!body.is_empty());
    }

    const PROMETHEUS_DEFAULT_ACCEPT: &str = "application/openmetrics-text;version=1.0.0,application/openmetrics-text;version=0.0.1;q=0.75,text/plain;version=0.0.4;q=0.5,*/*;q=0.1";

    #[test]
    fn test_negotiate_format() {
        assert_eq!(ExpositionFormat::negotiate(None), ExpositionFormat::Text);
        assert_eq!(ExpositionFormat::negotiate(Some("")), ExpositionFormat::Text);
        assert_eq!(
            ExpositionFormat::negotiate(Some("text/plain;version=0.0.4;q=0.3,*/*;q=0.1")),
            ExpositionFormat::Text
        );
        assert_eq!(
            ExpositionFormat::negotiate(Some(
                "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited;q=0.7,text/plain;version=0.0.4;q=0.3"
            )),
            ExpositionFormat::Protobuf
        );
        assert_eq!(
            ExpositionFormat::negotiate(Some(PROMETHEUS_DEFAULT_ACCEPT)),
            ExpositionFormat::OpenMetrics
        );
    }

    #[test]
    fn test_negotiate_ranks_by_quality() {
        assert_eq!(
            ExpositionFormat::negotiate(Some(
                "text/plain;version=0.0.4;q=0.2,application/openmetrics-text;version=1.0.0;q=0.9"
            )),
            ExpositionFormat::OpenMetrics
        );
        assert_eq!(
            ExpositionFormat::negotiate(Some(
                "application/openmetrics-text;q=0.4,text/plain;q=0.8"
            )),
            ExpositionFormat::Text
        );
    }

    #[test]
    fn test_negotiate_refuses_zero_quality() {
        assert_eq!(
            ExpositionFormat::negotiate(Some(
                "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited;q=0,text/plain;version=0.0.4"
            )),
            ExpositionFormat::Text
        );
        assert_eq!(
            ExpositionFormat::negotiate(Some("application/openmetrics-text;q=0")),
            ExpositionFormat::Text
        );
    }

    #[test]
    fn test_negotiate_protobuf_requires_delimited_metric_family() {
        assert_eq!(
            ExpositionFormat::negotiate(Some("application/vnd.google.protobuf")),
            ExpositionFormat::Text
        );
        assert_eq!(
            ExpositionFormat::negotiate(Some(
                "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=text"
            )),
            ExpositionFormat::Text
        );
        assert_eq!(
            ExpositionFormat::negotiate(Some(
                "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited, text/plain;q=0.5"
            )),
            ExpositionFormat::Protobuf
        );
    }

    #[test]
    fn test_negotiate_skips_unsupported_versions() {
        assert_eq!(
            ExpositionFormat::negotiate(Some(
                "application/openmetrics-text;version=2.0.0,application/openmetrics-text;version=1.0.0;q=0.5"
            )),
            ExpositionFormat::OpenMetrics
        );
        assert_eq!(
            ExpositionFormat::negotiate(Some("text/plain;version=1.0.0")),
            ExpositionFormat::Text
        );
    }

    #[test]
    fn test_content_types() {
        assert!(ExpositionFormat::Text.content_type().starts_with("text/plain"));
        assert!(ExpositionFormat::Protobuf
            .content_type()
            .starts_with("application/vnd.google.protobuf"));
        assert_eq!(
            ExpositionFormat::OpenMetrics.content_type(),
            "application/openmetrics-text; version=1.0.0; charset=utf-8"
        );
    }

    #[test]
    fn test_open_metrics_encoding() {
        let gauges = UsageGauges::new().unwrap();
        gauges.set_node_usage(&node("worker-1", 2.5, 4e9));

        let body =
            String::from_utf8(gauges.encode(ExpositionFormat::OpenMetrics).unwrap()).unwrap();

        assert!(body.contains("# TYPE kube_metrics_node_cpu gauge"));
        assert!(body.contains("kube_metrics_node_cpu{node=\"worker-1\"} 2.5\n"));
        assert!(body.ends_with("\n# EOF\n"));
        assert_eq!(body.matches("# EOF").count(), 1);
    }

    #[test]
    fn test_open_metrics_counter_metadata_drops_total_suffix() {
        let gauges = UsageGauges::new().unwrap();
        let counter = prometheus::IntCounter::new("bridge_requests_total", "Requests served").unwrap();
        gauges.registry().register(Box::new(counter.clone())).unwrap();
        counter.inc_by(3);

        let body =
            String::from_utf8(gauges.encode(ExpositionFormat::OpenMetrics).unwrap()).unwrap();

        assert!(body.contains("# HELP bridge_requests Requests served\n"));
        assert!(body.contains("# TYPE bridge_requests counter\n"));
        assert!(body.contains("bridge_requests_total 3\n"));
    }

    #[test]
    fn test_open_metrics_empty_registry_is_just_eof() {
        let gauges = UsageGauges::new().unwrap();

        let body = gauges.encode(ExpositionFormat::OpenMetrics).unwrap();
        assert_eq!(body, b"# EOF\n");
    }

    #[test]
    fn test_registry_cannot_hold_two_gauge_sets() {
        let registry = Registry::new();
        let gauges = UsageGauges::with_registry(registry.clone()).unwrap();
        gauges.set_node_usage(&node("worker-1", 1.0, 2.0));

        assert!(UsageGauges::with_registry(registry.clone()).is_err());
        assert_eq!(registry.gather().len(), 2);
    }
}
