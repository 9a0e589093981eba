//! Access to the Kubernetes resource metrics API
//!
//! `MetricsSource` is the seam between the scrape handler and the
//! cluster. The production implementation lists `metrics.k8s.io/v1beta1`
//! objects through a kube client; tests substitute in-memory sources.

use crate::models::{NodeMetrics, PodMetrics};
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::PathBuf;
use tracing::{debug, info};

pub use async_trait::async_trait;

/// Read-only query interface over cluster resource usage
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// List usage for every node in the cluster
    async fn list_node_usage(&self) -> Result<Vec<NodeMetrics>>;

    /// List usage for pods in `namespace`; an empty namespace means all
    async fn list_pod_usage(&self, namespace: &str) -> Result<Vec<PodMetrics>>;
}

/// Metrics source backed by the cluster's metrics-server
#[derive(Clone)]
pub struct KubeMetricsSource {
    client: Client,
}

impl KubeMetricsSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsSource for KubeMetricsSource {
    async fn list_node_usage(&self) -> Result<Vec<NodeMetrics>> {
        let api: Api<NodeMetrics> = Api::all(self.client.clone());
        // Upstream errors are surfaced to scrapers verbatim, so no context here.
        let list = api.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), "Listed node metrics");
        Ok(list.items)
    }

    async fn list_pod_usage(&self, namespace: &str) -> Result<Vec<PodMetrics>> {
        let api: Api<PodMetrics> = if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        };
        let list = api.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), namespace = %namespace, "Listed pod metrics");
        Ok(list.items)
    }
}

/// How to locate cluster credentials
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Explicit kubeconfig file; inferred from the environment when unset
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use instead of the current one
    pub context: Option<String>,
}

impl ClientOptions {
    /// Human readable name of the cluster target, used in logs
    pub fn cluster_label(&self) -> String {
        match (&self.context, &self.kubeconfig) {
            (Some(context), _) => context.clone(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => "inferred".to_string(),
        }
    }
}

/// Build a kube client from explicit options or the ambient environment
///
/// Without options this tries the in-cluster service account first and
/// then `$KUBECONFIG` / `~/.kube/config`.
pub async fn connect(options: &ClientOptions) -> Result<Client> {
    let kube_options = KubeConfigOptions {
        context: options.context.clone(),
        ..Default::default()
    };

    let config = match (&options.kubeconfig, &options.context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &kube_options)
                .await
                .context("Failed to load kubeconfig")?
        }
        (None, Some(_)) => kube::Config::from_kubeconfig(&kube_options)
            .await
            .context("Failed to load kubeconfig context")?,
        (None, None) => kube::Config::infer()
            .await
            .context("Failed to infer cluster configuration")?,
    };

    info!(cluster_url = %config.cluster_url, "Connecting to cluster");
    Client::try_from(config).context("Failed to build Kubernetes client")
}
