//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cloudconfig::RenderSettings;

/// The default interval at which converged clusters are reconciled again.
pub(crate) const DEFAULT_RESYNC_SECONDS: u64 = 300;
/// The default time granted to the controller to finish its current pass on shutdown.
pub(crate) const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 30;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,

    /// The Kubernetes namespace watched for `KVMConfig` objects and their certificate secrets.
    pub namespace: String,
    /// The name of the pod on which this instance is running.
    pub pod_name: String,

    /// Extra arguments passed to the K8s API server of every guest cluster.
    #[serde(default)]
    pub api_server_extra_args: Vec<String>,
    /// The public key used to validate SSO tokens on guest cluster API servers.
    #[serde(default)]
    pub sso_public_key: String,
    /// The registry from which guest cluster images are pulled.
    ///
    /// Defaults to `quay.io` when not set.
    #[serde(default)]
    pub registry_domain: Option<String>,
    /// The port on which guest cluster etcd is reachable.
    ///
    /// Defaults to `443` when not set.
    #[serde(default)]
    pub etcd_port: Option<u16>,

    /// The interval in seconds at which converged clusters are reconciled again.
    #[serde(default = "Config::default_resync_seconds")]
    pub resync_seconds: u64,
    /// The time in seconds granted to the controller to finish its current pass on shutdown.
    #[serde(default = "Config::default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// The settings used for rendering node configuration.
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            api_server_extra_args: self.api_server_extra_args.clone(),
            sso_public_key: self.sso_public_key.clone(),
            registry_domain: self.registry_domain.clone(),
            etcd_port: self.etcd_port,
        }
    }

    /// The time granted to the controller to finish its current pass on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    fn default_resync_seconds() -> u64 {
        DEFAULT_RESYNC_SECONDS
    }

    fn default_shutdown_grace_seconds() -> u64 {
        DEFAULT_SHUTDOWN_GRACE_SECONDS
    }
}
