//! KVMConfig CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

/// CRD spec for the KVMConfig resource, describing a single guest cluster.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "KVMConfig",
    status = "KVMConfigStatus",
    group = "provider.giantswarm.io",
    version = "v1alpha1",
    kind = "KVMConfig",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    shortname = "kvm",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterId"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.versionBundleVersion"}"#,
    printcolumn = r#"{"name":"Reconciled","type":"string","jsonPath":".status.lastVersionBundleVersion"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KVMConfigSpec {
    /// The ID of the guest cluster.
    ///
    /// This value names the cluster namespace and is embedded in the names of most objects
    /// created for the cluster. It must never change over the lifetime of a cluster.
    pub cluster_id: String,
    /// The ID of the customer owning the guest cluster.
    pub customer_id: String,
    /// The master nodes of the guest cluster.
    #[serde(default)]
    pub masters: Vec<NodeDescriptor>,
    /// The worker nodes of the guest cluster.
    #[serde(default)]
    pub workers: Vec<NodeDescriptor>,
    /// Network settings of the guest cluster.
    pub network: NetworkSpec,
    /// KVM specific settings of the guest cluster.
    pub kvm: KvmSpec,
    /// The version bundle this cluster is pinned to.
    pub version_bundle_version: String,
}

/// A single virtual machine of a guest cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    /// The ID of the node, unique within the cluster.
    pub id: String,
    /// The number of CPUs of the VM.
    #[serde(default)]
    pub cpus: Option<u32>,
    /// The memory of the VM as a K8s quantity, e.g. `2G`.
    #[serde(default)]
    pub memory: Option<String>,
    /// The disk size of the VM in GB.
    #[serde(default)]
    pub disk: Option<f64>,
}

/// Network settings of a guest cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// The domain of the guest cluster's K8s API, e.g. `api.abc12.k8s.example.com`.
    pub api_domain: String,
    /// The domain of the guest cluster's etcd.
    pub etcd_domain: String,
    /// The VNI of the flannel network of the guest cluster.
    #[serde(default)]
    pub flannel_vni: u32,
}

/// KVM specific settings of a guest cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KvmSpec {
    /// The storage backend of the master etcd data, one of `hostPath` or `persistentVolume`.
    ///
    /// Older specs do not set this value, in which case `hostPath` is used.
    #[serde(default)]
    pub storage_type: String,
    /// The image of the endpoint updater sidecar.
    pub endpoint_updater_image: String,
    /// The image of the container running the VM.
    pub k8s_kvm_image: String,
    /// The image of the node controller.
    pub node_controller_image: String,
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KVMConfigStatus {
    /// The version bundle version of the last fully converged reconciliation pass.
    #[serde(default)]
    pub last_version_bundle_version: Option<String>,
    /// A human readable message describing the outcome of the last reconciliation pass.
    #[serde(default)]
    pub message: Option<String>,
}

/// The role of a guest cluster node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeRole {
    Master,
    Worker,
}

impl NodeRole {
    /// The canonical ID of this role, used in object names and labels.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Worker => "worker",
        }
    }

    /// The path of the node list of this role within the spec.
    pub fn spec_field(&self) -> &'static str {
        match self {
            Self::Master => "spec.masters",
            Self::Worker => "spec.workers",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// The storage backend of master etcd data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageType {
    HostPath,
    PersistentVolume,
}

impl StorageType {
    /// Parse the storage type of a spec.
    ///
    /// An empty value is treated as `hostPath` for backwards compatibility.
    pub fn parse(val: &str) -> Result<Self, ReconcileError> {
        match val {
            "" | "hostPath" => Ok(Self::HostPath),
            "persistentVolume" => Ok(Self::PersistentVolume),
            other => Err(ReconcileError::invalid(format!(
                "spec.kvm.storageType must be one of \"hostPath\" or \"persistentVolume\", got {:?}",
                other
            ))),
        }
    }
}

impl KVMConfigSpec {
    /// The nodes of the given role.
    pub fn nodes(&self, role: NodeRole) -> &[NodeDescriptor] {
        match role {
            NodeRole::Master => &self.masters,
            NodeRole::Worker => &self.workers,
        }
    }

    /// The storage type of this cluster's master etcd data.
    pub fn storage_type(&self) -> Result<StorageType, ReconcileError> {
        StorageType::parse(&self.kvm.storage_type)
    }
}

impl NodeDescriptor {
    /// The CPU count of this node, else an error naming the offending field.
    pub fn cpus(&self, role: NodeRole, idx: usize) -> Result<u32, ReconcileError> {
        match self.cpus {
            Some(0) => Err(ReconcileError::invalid(format!("{}[{}].cpus must be greater than 0", role.spec_field(), idx))),
            Some(cpus) => Ok(cpus),
            None => Err(ReconcileError::invalid(format!("{}[{}].cpus must be set", role.spec_field(), idx))),
        }
    }

    /// The memory of this node, else an error naming the offending field.
    pub fn memory(&self, role: NodeRole, idx: usize) -> Result<&str, ReconcileError> {
        match self.memory.as_deref() {
            Some(mem) if !mem.is_empty() => Ok(mem),
            _ => Err(ReconcileError::invalid(format!("{}[{}].memory must be set", role.spec_field(), idx))),
        }
    }

    /// The disk size of this node in GB, else an error naming the offending field.
    pub fn disk(&self, role: NodeRole, idx: usize) -> Result<f64, ReconcileError> {
        match self.disk {
            Some(disk) if disk.is_finite() && disk > 0.0 => Ok(disk),
            Some(disk) => Err(ReconcileError::invalid(format!(
                "{}[{}].disk must be a positive number, got {}",
                role.spec_field(),
                idx,
                disk
            ))),
            None => Err(ReconcileError::invalid(format!("{}[{}].disk must be set", role.spec_field(), idx))),
        }
    }
}
