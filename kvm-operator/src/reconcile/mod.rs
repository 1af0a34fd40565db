//! Per-kind reconciliation logic.
//!
//! Everything in this module is pure. The controller fetches the current state of each kind from
//! K8s, the reconcilers here compute the desired state from the cluster spec and its version
//! bundle, and the patch converging the two is computed from those two values alone. Applying
//! the patch is again left to the controller.
//!
//! When a cluster is marked for deletion, the desired state of every kind is empty, so the very
//! same patch computation yields the deletes which tear the cluster down.

mod compare;
pub mod configmap;
pub mod deployment;
pub mod endpoints;
pub mod ingress;
pub mod key;
#[cfg(test)]
mod mod_test;
pub mod namespace;
pub mod service;

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

use crate::cloudconfig::{NodeSecrets, RenderSettings};
use kvm_core::crd::KVMConfigSpec;
use kvm_core::versionbundle::VersionBundle;
use kvm_core::VERSION_BUNDLE_ANNOTATION;

pub use compare::ManagedObject;

/// The kinds reconciled for each cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Namespace,
    ConfigMap,
    Deployment,
    Service,
    Endpoints,
    Ingress,
}

/// The order in which kinds are reconciled while a cluster is alive.
///
/// The namespace comes first so that it may cancel the pass; configuration & workloads come next,
/// and network exposure comes last as it depends on the workloads.
pub const KIND_ORDER: [Kind; 6] = [Kind::Namespace, Kind::ConfigMap, Kind::Deployment, Kind::Service, Kind::Endpoints, Kind::Ingress];

/// The order in which kinds are reconciled for a cluster marked for deletion.
///
/// Workloads are removed before the namespace so that the namespace can drain.
pub const DELETION_KIND_ORDER: [Kind; 6] = [Kind::Ingress, Kind::Endpoints, Kind::Service, Kind::Deployment, Kind::ConfigMap, Kind::Namespace];

impl Kind {
    /// The order in which kinds are reconciled for a cluster in the given lifecycle state.
    pub fn order(deleted: bool) -> &'static [Kind] {
        if deleted {
            &DELETION_KIND_ORDER
        } else {
            &KIND_ORDER
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Namespace => "Namespace",
            Self::ConfigMap => "ConfigMap",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Endpoints => "Endpoints",
            Self::Ingress => "Ingress",
        };
        f.write_str(name)
    }
}

/// The outcome of a reconciliation step.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    /// Continue the pass with the given state.
    Proceed(T),
    /// Stop the pass, no later kinds are reconciled.
    Cancel {
        /// Keep the cluster finalizer, as the cluster is not yet fully torn down.
        keep_finalizers: bool,
    },
}

/// The changes needed to converge the current state of a kind towards its desired state.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch<K> {
    pub create: Vec<K>,
    pub update: Vec<K>,
    pub delete: Vec<K>,
}

impl<K> Default for Patch<K> {
    fn default() -> Self {
        Self {
            create: vec![],
            update: vec![],
            delete: vec![],
        }
    }
}

impl<K> Patch<K> {
    /// Check if this patch has no changes to apply.
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Everything needed to compute the desired state of a cluster for one pass.
#[derive(Clone, Copy, Debug)]
pub struct PassContext<'a> {
    pub cluster: &'a KVMConfigSpec,
    pub bundle: &'a VersionBundle,
    /// Certificates & keys of the cluster, empty when the cluster is marked for deletion.
    pub secrets: &'a NodeSecrets,
    pub settings: &'a RenderSettings,
    /// The cluster object is marked for deletion.
    pub deleted: bool,
}

impl<'a> PassContext<'a> {
    /// The ID of the cluster, which also names its namespace.
    pub fn cluster_id(&self) -> &'a str {
        &self.cluster.cluster_id
    }

    /// The metadata shared by all namespaced objects of this cluster.
    ///
    /// Objects carry the cluster labels used for listing, along with the version bundle annotation.
    pub fn object_meta(&self, name: impl Into<String>, app: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(self.cluster_id().into()),
            labels: Some(self.labels(app)),
            annotations: Some(self.annotations()),
            ..Default::default()
        }
    }

    /// The canonical labels of an object of this cluster.
    pub fn labels(&self, app: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(key::LABEL_APP.into(), app.into());
        labels.insert(key::LABEL_CLUSTER.into(), self.cluster_id().into());
        labels.insert(key::LABEL_CUSTOMER.into(), self.cluster.customer_id.clone());
        labels
    }

    /// The annotations stamped on every object of this cluster.
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(VERSION_BUNDLE_ANNOTATION.into(), self.bundle.version.clone());
        annotations
    }
}

/// Compute the patch converging the current objects of a kind towards the desired objects.
///
/// Objects are matched by name. Desired objects without a current counterpart are created,
/// objects present in both are updated when modified, carrying the resource version of the
/// current object, and current objects without a desired counterpart are deleted.
pub fn compute_patch<K: ManagedObject>(current: &[K], desired: &[K]) -> Patch<K> {
    let current_by_name: BTreeMap<&str, &K> = current.iter().map(|obj| (obj.object_name(), obj)).collect();
    let desired_names: BTreeSet<&str> = desired.iter().map(|obj| obj.object_name()).collect();

    let mut patch = Patch::default();
    for obj in desired {
        let cur = current_by_name.get(obj.object_name()).copied();
        if compare::equal(cur, Some(obj)) {
            continue;
        }
        match cur {
            None => patch.create.push(obj.clone()),
            Some(cur) => {
                let mut update = obj.clone();
                update.adopt(cur);
                patch.update.push(update);
            }
        }
    }
    for obj in current {
        if !desired_names.contains(obj.object_name()) {
            patch.delete.push(obj.clone());
        }
    }
    patch
}

/// Get the name of the given object, which is always set on objects built or fetched here.
pub(crate) fn name_of<K: Resource>(obj: &K) -> &str {
    obj.meta().name.as_deref().unwrap_or_default()
}
