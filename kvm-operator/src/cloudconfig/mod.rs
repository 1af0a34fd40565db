//! Node configuration rendering.
//!
//! Every VM of a guest cluster boots from a cloud-config document rendered here. The document is
//! a per-role template expanded against validated parameters, then gzip compressed and base64
//! encoded so that it can be embedded into a ConfigMap and mounted into the VM's pod.
//!
//! Rendering is deterministic. Identical inputs always yield byte-identical output, as the
//! ConfigMap comparator relies on content stability to avoid spurious updates. As such, only
//! ordered collections are used and the gzip header carries no timestamp.

mod assets;
mod template;

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Context;
use flate2::write::GzEncoder;
use flate2::Compression;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use kvm_core::crd::{KVMConfigSpec, NodeDescriptor, NodeRole};
use kvm_core::versionbundle::VersionBundle;
use kvm_core::ReconcileError;

pub use assets::{FileAsset, UnitAsset, VerbatimSection};

/// The port of guest cluster etcd when none is configured.
pub const DEFAULT_ETCD_PORT: u16 = 443;
/// The image registry used when none is configured.
pub const DEFAULT_REGISTRY_DOMAIN: &str = "quay.io";
/// The prefix stripped from the API domain to derive the cluster base domain.
const API_DOMAIN_PREFIX: &str = "api.";

/// The certificate components every master requires.
pub const MASTER_CERT_COMPONENTS: &[&str] = &["api", "calico-etcd-client", "etcd", "service-account"];
/// The certificate components every worker requires.
pub const WORKER_CERT_COMPONENTS: &[&str] = &["calico-etcd-client", "worker"];

/// Operator wide settings used for rendering node configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderSettings {
    /// Extra arguments passed to the guest cluster API server.
    pub api_server_extra_args: Vec<String>,
    /// The public key trusted for SSO SSH access, if any.
    pub sso_public_key: String,
    /// The image registry, defaults to `quay.io`.
    pub registry_domain: Option<String>,
    /// The etcd port, defaults to `443`.
    pub etcd_port: Option<u16>,
}

/// The PEM encoded TLS assets of a single certificate component.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TlsAssets {
    pub ca: String,
    pub crt: String,
    pub key: String,
}

/// The certificates of a guest cluster, keyed by component.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CertBundle {
    pub components: BTreeMap<String, TlsAssets>,
}

/// The random keys of a guest cluster.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RandomKeys {
    /// The key used by the API server to encrypt secrets at rest.
    pub api_server_encryption_key: String,
}

/// The certificates and keys of a guest cluster, as loaded from the host cluster.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeSecrets {
    pub certs: CertBundle,
    pub keys: RandomKeys,
}

/// All inputs needed to render the configuration of a single node.
#[derive(Clone, Copy, Debug)]
pub struct NodeConfigParams<'a> {
    pub role: NodeRole,
    pub cluster: &'a KVMConfigSpec,
    /// The node being rendered along with its index in the role's node list.
    pub node: (usize, &'a NodeDescriptor),
    pub bundle: &'a VersionBundle,
    pub secrets: &'a NodeSecrets,
    pub settings: &'a RenderSettings,
}

/// A rendered node configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedConfig {
    /// The plaintext cloud-config document.
    pub text: String,
    /// The gzip compressed, base64 encoded document.
    pub encoded: String,
}

/// The data against which the templates are expanded, with all defaults applied.
#[derive(Clone, Debug, Serialize)]
pub struct TemplateParams {
    pub role: &'static str,
    pub cluster_id: String,
    pub node_id: String,
    pub api_domain: String,
    pub base_domain: String,
    pub etcd_domain: String,
    pub etcd_port: u16,
    pub registry_domain: String,
    pub kubernetes_version: String,
    pub etcd_version: String,
    pub flannel_vni: u32,
    pub api_server_extra_args: Vec<String>,
    pub files: Vec<FileAsset>,
    pub units: Vec<UnitAsset>,
    pub verbatim: Vec<VerbatimSection>,
}

impl<'a> NodeConfigParams<'a> {
    /// Validate these params, failing on the first missing required field.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        let (idx, node) = self.node;
        if self.cluster.cluster_id.is_empty() {
            return Err(ReconcileError::invalid("spec.clusterId must not be empty"));
        }
        if self.cluster.network.api_domain.is_empty() {
            return Err(ReconcileError::invalid("spec.network.apiDomain must not be empty"));
        }
        if self.cluster.network.etcd_domain.is_empty() {
            return Err(ReconcileError::invalid("spec.network.etcdDomain must not be empty"));
        }
        if node.id.is_empty() {
            return Err(ReconcileError::invalid(format!("{}[{}].id must not be empty", self.role.spec_field(), idx)));
        }
        if self.role == NodeRole::Master && self.secrets.keys.api_server_encryption_key.is_empty() {
            return Err(ReconcileError::NotFound {
                kind: "random key",
                name: format!("{}/encryption", self.cluster.cluster_id),
            });
        }
        for component in self.required_cert_components() {
            let present = self
                .secrets
                .certs
                .components
                .get(*component)
                .map(|tls| !tls.crt.is_empty() && !tls.key.is_empty() && !tls.ca.is_empty())
                .unwrap_or(false);
            if !present {
                return Err(ReconcileError::NotFound {
                    kind: "certificate",
                    name: format!("{}/{}", self.cluster.cluster_id, component),
                });
            }
        }
        Ok(())
    }

    /// The certificate components required by the role being rendered.
    pub fn required_cert_components(&self) -> &'static [&'static str] {
        match self.role {
            NodeRole::Master => MASTER_CERT_COMPONENTS,
            NodeRole::Worker => WORKER_CERT_COMPONENTS,
        }
    }

    /// Build the template params, applying all defaults.
    ///
    /// Callers must validate the params first.
    pub fn template_params(&self) -> Result<TemplateParams, ReconcileError> {
        let (_, node) = self.node;
        let api_domain = self.cluster.network.api_domain.clone();
        let base_domain = api_domain.strip_prefix(API_DOMAIN_PREFIX).unwrap_or(&api_domain).to_string();
        let (files, units) = match self.role {
            NodeRole::Master => (assets::master_files(self), assets::master_units(self.bundle)),
            NodeRole::Worker => (assets::worker_files(self), assets::worker_units(self.bundle)),
        };
        Ok(TemplateParams {
            role: self.role.id(),
            cluster_id: self.cluster.cluster_id.clone(),
            node_id: node.id.clone(),
            api_domain,
            base_domain,
            etcd_domain: self.cluster.network.etcd_domain.clone(),
            etcd_port: self.settings.etcd_port.filter(|port| *port != 0).unwrap_or(DEFAULT_ETCD_PORT),
            registry_domain: self
                .settings
                .registry_domain
                .clone()
                .filter(|domain| !domain.is_empty())
                .unwrap_or_else(|| DEFAULT_REGISTRY_DOMAIN.into()),
            kubernetes_version: self.bundle.require_component("kubernetes")?.into(),
            etcd_version: self.bundle.require_component("etcd")?.into(),
            flannel_vni: self.cluster.network.flannel_vni,
            api_server_extra_args: self.settings.api_server_extra_args.clone(),
            files,
            units,
            verbatim: assets::verbatim_sections(self),
        })
    }
}

/// Render the configuration of a single node.
#[tracing::instrument(level = "debug", skip(params), fields(role = %params.role, node = %params.node.1.id))]
pub fn render(params: &NodeConfigParams<'_>) -> Result<RenderedConfig, ReconcileError> {
    params.validate()?;
    let tmpl_params = params.template_params()?;
    let text = expand(params.role, &tmpl_params)?;
    let encoded = encode(&text)?;
    Ok(RenderedConfig { text, encoded })
}

/// Expand the template of the given role.
fn expand(role: NodeRole, params: &TemplateParams) -> Result<String, ReconcileError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    let source = match role {
        NodeRole::Master => template::MASTER,
        NodeRole::Worker => template::WORKER,
    };
    env.add_template(role.id(), source)
        .map_err(|err| ReconcileError::invalid(format!("error parsing {} cloud-config template: {}", role, err)))?;
    env.get_template(role.id())
        .and_then(|tmpl| tmpl.render(params))
        .map_err(|err| ReconcileError::invalid(format!("error expanding {} cloud-config template: {}", role, err)))
}

/// Compress and encode the given document.
fn encode(text: &str) -> Result<String, ReconcileError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).context("error compressing cloud-config")?;
    let compressed = encoder.finish().context("error compressing cloud-config")?;
    Ok(base64::encode(compressed))
}
