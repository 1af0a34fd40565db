//! State comparators.
//!
//! Each kind is compared over the fields which reconciliation actually controls. Generated
//! metadata such as resource versions, timestamps or server-managed labels & annotations never
//! make two objects unequal.

#[cfg(test)]
#[path = "compare_test.rs"]
mod compare_test;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, Endpoints, EnvVar, Namespace, PodSpec, Probe, ResourceRequirements, Service, ServicePort, Volume,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::Resource;

use super::endpoints::ip_set;
use kvm_core::VERSION_BUNDLE_ANNOTATION;

/// Keys of labels & annotations which K8s itself sets on live objects.
const SERVER_MANAGED_KEYS: &[&str] = &[
    "kubernetes.io/metadata.name",
    "deployment.kubernetes.io/revision",
    "kubectl.kubernetes.io/last-applied-configuration",
];

/// An object kind managed by the reconcilers.
pub trait ManagedObject: Resource + Clone {
    /// The name of this object.
    fn object_name(&self) -> &str {
        super::name_of(self)
    }

    /// Check if the two given objects are equal over all reconciliation-relevant fields.
    fn is_equal(a: &Self, b: &Self) -> bool;

    /// Adopt the server side identity of the given current object, so that this object may
    /// replace it.
    fn adopt(&mut self, current: &Self) {
        self.meta_mut().resource_version = current.meta().resource_version.clone();
    }
}

/// Compare two optional objects, where absence is unequal to anything present.
pub fn equal<K: ManagedObject>(a: Option<&K>, b: Option<&K>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => K::is_equal(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// The entries of the given label or annotation map which are not managed by K8s itself.
fn user_entries(map: Option<&BTreeMap<String, String>>) -> BTreeMap<&str, &str> {
    map.into_iter()
        .flatten()
        .filter(|(key, _)| !SERVER_MANAGED_KEYS.contains(&key.as_str()))
        .map(|(key, val)| (key.as_str(), val.as_str()))
        .collect()
}

fn labels_equal<K: Resource>(a: &K, b: &K) -> bool {
    user_entries(a.meta().labels.as_ref()) == user_entries(b.meta().labels.as_ref())
}

fn annotations_equal<K: Resource>(a: &K, b: &K) -> bool {
    user_entries(a.meta().annotations.as_ref()) == user_entries(b.meta().annotations.as_ref())
}

fn version_annotation<K: Resource>(obj: &K) -> Option<&str> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(VERSION_BUNDLE_ANNOTATION))
        .map(String::as_str)
}

impl ManagedObject for Namespace {
    fn is_equal(a: &Self, b: &Self) -> bool {
        labels_equal(a, b) && annotations_equal(a, b)
    }
}

impl ManagedObject for ConfigMap {
    fn is_equal(a: &Self, b: &Self) -> bool {
        a.data.as_ref().filter(|data| !data.is_empty()) == b.data.as_ref().filter(|data| !data.is_empty())
            && labels_equal(a, b)
            && annotations_equal(a, b)
    }
}

impl ManagedObject for Deployment {
    /// Compare the bundle annotation, labels & replicas, then what the pod template runs: each
    /// container's image, command, env, resources & liveness probe, and the volume sources.
    fn is_equal(a: &Self, b: &Self) -> bool {
        if version_annotation(a) != version_annotation(b) {
            return false;
        }
        if !labels_equal(a, b) {
            return false;
        }
        let replicas = |d: &Deployment| d.spec.as_ref().and_then(|spec| spec.replicas);
        if replicas(a) != replicas(b) {
            return false;
        }
        containers(a) == containers(b) && volumes(a) == volumes(b)
    }
}

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref().and_then(|spec| spec.template.spec.as_ref())
}

fn containers(deployment: &Deployment) -> Vec<ContainerState<'_>> {
    pod_spec(deployment)
        .map(|pod| pod.containers.iter().map(ContainerState::of).collect())
        .unwrap_or_default()
}

fn volumes(deployment: &Deployment) -> Vec<VolumeState<'_>> {
    pod_spec(deployment)
        .and_then(|pod| pod.volumes.as_ref())
        .map(|volumes| volumes.iter().map(VolumeState::of).collect())
        .unwrap_or_default()
}

/// The fields of a container which reconciliation controls.
#[derive(PartialEq)]
struct ContainerState<'a> {
    name: &'a str,
    image: Option<&'a str>,
    command: &'a [String],
    args: &'a [String],
    env: &'a [EnvVar],
    resources: Option<&'a ResourceRequirements>,
    liveness_probe: Option<&'a Probe>,
}

impl<'a> ContainerState<'a> {
    fn of(c: &'a Container) -> Self {
        Self {
            name: c.name.as_str(),
            image: c.image.as_deref(),
            command: c.command.as_deref().unwrap_or_default(),
            args: c.args.as_deref().unwrap_or_default(),
            env: c.env.as_deref().unwrap_or_default(),
            resources: c.resources.as_ref(),
            liveness_probe: c.liveness_probe.as_ref(),
        }
    }
}

/// The name & source of a volume. K8s defaults the type of host path volumes, so only the path
/// is compared.
#[derive(PartialEq)]
struct VolumeState<'a> {
    name: &'a str,
    host_path: Option<&'a str>,
    claim_name: Option<&'a str>,
    config_map: Option<Option<&'a str>>,
    empty_dir: bool,
}

impl<'a> VolumeState<'a> {
    fn of(v: &'a Volume) -> Self {
        Self {
            name: v.name.as_str(),
            host_path: v.host_path.as_ref().map(|hp| hp.path.as_str()),
            claim_name: v.persistent_volume_claim.as_ref().map(|pvc| pvc.claim_name.as_str()),
            config_map: v.config_map.as_ref().map(|cm| cm.name.as_deref()),
            empty_dir: v.empty_dir.is_some(),
        }
    }
}

impl ManagedObject for Service {
    /// Compare port name, port, target port & protocol of each port, then the service type,
    /// labels & annotations, stopping at the first mismatch.
    fn is_equal(a: &Self, b: &Self) -> bool {
        let (ports_a, ports_b) = (service_ports(a), service_ports(b));
        if ports_a.len() != ports_b.len() {
            return false;
        }
        for (pa, pb) in ports_a.iter().zip(ports_b.iter()) {
            if pa.name != pb.name {
                return false;
            }
            if pa.port != pb.port {
                return false;
            }
            if pa.target_port != pb.target_port {
                return false;
            }
            if pa.protocol != pb.protocol {
                return false;
            }
        }
        let type_ = |s: &Service| s.spec.as_ref().and_then(|spec| spec.type_.clone());
        if type_(a) != type_(b) {
            return false;
        }
        labels_equal(a, b) && annotations_equal(a, b)
    }

    /// Services also keep their allocated cluster IPs, which are immutable.
    fn adopt(&mut self, current: &Self) {
        self.metadata.resource_version = current.metadata.resource_version.clone();
        if let (Some(spec), Some(cur)) = (self.spec.as_mut(), current.spec.as_ref()) {
            spec.cluster_ip = cur.cluster_ip.clone();
            spec.cluster_ips = cur.cluster_ips.clone();
        }
    }
}

fn service_ports(service: &Service) -> &[ServicePort] {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or_default()
}

impl ManagedObject for Ingress {
    fn is_equal(a: &Self, b: &Self) -> bool {
        a.spec == b.spec && labels_equal(a, b) && annotations_equal(a, b)
    }
}

impl ManagedObject for Endpoints {
    fn is_equal(a: &Self, b: &Self) -> bool {
        ip_set(a) == ip_set(b)
    }
}
