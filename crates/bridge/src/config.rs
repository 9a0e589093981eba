//! Bridge configuration

use anyhow::{Context, Result};
use bridge_lib::{health::DEFAULT_FAILURE_THRESHOLD, ClientOptions};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,

    /// Port for metrics and health endpoints
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Explicit kubeconfig; in-cluster or default kubeconfig when unset
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[serde(default)]
    pub kube_context: Option<String>,

    /// Namespace filter for pod metrics, empty for all namespaces
    #[serde(default)]
    pub namespace: String,

    /// Consecutive upstream failures before /healthz reports unhealthy
    #[serde(default = "default_unhealthy_after_failures")]
    pub unhealthy_after_failures: u32,
}

fn default_listen_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_listen_port() -> u16 {
    8080
}

fn default_unhealthy_after_failures() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            kubeconfig: None,
            kube_context: None,
            namespace: String::new(),
            unhealthy_after_failures: default_unhealthy_after_failures(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from an optional config file and the environment
    ///
    /// `BRIDGE_*` variables override `kube-metrics-bridge.{toml,yaml,json}`.
    pub fn load() -> Result<Self> {
        Self::from_sources(
            config::File::with_name("kube-metrics-bridge").required(false),
            config::Environment::with_prefix("BRIDGE").try_parsing(true),
        )
    }

    fn from_sources<F, E>(file: F, environment: E) -> Result<Self>
    where
        F: config::Source + Send + Sync + 'static,
        E: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid bridge configuration")
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            kubeconfig: self.kubeconfig.clone(),
            context: self.kube_context.clone(),
        }
    }
}
