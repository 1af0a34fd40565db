//! Deployment reconciliation.
//!
//! Every VM of a cluster runs inside a pod of its own single-replica deployment. Next to the VM
//! container, each pod runs the endpoint updater sidecar publishing the VM's IP, and the health
//! sidecar backing the VM's liveness probe. A cluster also gets one node controller deployment.

#[cfg(test)]
#[path = "deployment_test.rs"]
mod deployment_test;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, HTTPGetAction, HostPathVolumeSource,
    ObjectFieldSelector, PersistentVolumeClaimVolumeSource, PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use lazy_static::lazy_static;
use regex::Regex;

use super::{key, PassContext};
use kvm_core::crd::{NodeDescriptor, NodeRole, StorageType};
use kvm_core::ReconcileError;

lazy_static! {
    /// The canonical form of a K8s resource quantity.
    static ref QUANTITY_RE: Regex =
        Regex::new(r"^[+-]?([0-9]+(\.[0-9]*)?|\.[0-9]+)(([KMGTPE]i)|[numkMGTPE]|([eE][+-]?[0-9]+))?$").expect("failed to compile QUANTITY_RE regex");
}

/// The name of the VM container.
///
/// NOTE WELL: do not change the name of this container. It will cause breaking changes.
const CONTAINER_K8S_KVM: &str = "k8s-kvm";
const CONTAINER_ENDPOINT_UPDATER: &str = "k8s-endpoint-updater";
const CONTAINER_K8S_KVM_HEALTH: &str = "k8s-kvm-health";

const VOLUME_CLOUD_CONFIG: &str = "cloud-config";
const VOLUME_ETCD_DATA: &str = "etcd-data";
const VOLUME_FLANNEL: &str = "flannel";
const VOLUME_IMAGES: &str = "images";
const VOLUME_ROOTFS: &str = "rootfs";

/// Liveness probe settings of the VM container.
const PROBE_INITIAL_DELAY_SECONDS: i32 = 250;
const PROBE_TIMEOUT_SECONDS: i32 = 15;
const PROBE_PERIOD_SECONDS: i32 = 20;
const PROBE_FAILURE_THRESHOLD: i32 = 12;
const PROBE_SUCCESS_THRESHOLD: i32 = 1;

/// Compute the desired deployments of the cluster.
///
/// Any invalid node capacity or storage setting fails the whole computation.
pub fn desired(ctx: &PassContext<'_>) -> Result<Vec<Deployment>, ReconcileError> {
    if ctx.deleted {
        return Ok(vec![]);
    }
    let storage_type = ctx.cluster.storage_type()?;
    let mut deployments = vec![];
    for role in [NodeRole::Master, NodeRole::Worker] {
        for (idx, node) in ctx.cluster.nodes(role).iter().enumerate() {
            deployments.push(vm_deployment(ctx, role, idx, node, storage_type)?);
        }
    }
    deployments.push(node_controller_deployment(ctx));
    Ok(deployments)
}

/// Validate the given memory value as a K8s quantity.
pub fn memory_quantity(role: NodeRole, idx: usize, node: &NodeDescriptor) -> Result<Quantity, ReconcileError> {
    let memory = node.memory(role, idx)?;
    if !QUANTITY_RE.is_match(memory) {
        return Err(ReconcileError::invalid(format!(
            "{}[{}].memory must be a valid quantity, got {:?}",
            role.spec_field(),
            idx,
            memory
        )));
    }
    Ok(Quantity(memory.into()))
}

/// Build the deployment of a single VM.
fn vm_deployment(
    ctx: &PassContext<'_>,
    role: NodeRole,
    idx: usize,
    node: &NodeDescriptor,
    storage_type: StorageType,
) -> Result<Deployment, ReconcileError> {
    let cpus = node.cpus(role, idx)?;
    let memory = memory_quantity(role, idx, node)?;
    let disk = node.disk(role, idx)?;
    let cluster_id = ctx.cluster_id();

    let mut labels = ctx.labels(role.id());
    labels.insert(key::LABEL_NODE.into(), node.id.clone());
    let mut meta = ctx.object_meta(key::deployment_name(role, node), role.id());
    meta.labels = Some(labels.clone());

    let mut volumes = vec![Volume {
        name: VOLUME_CLOUD_CONFIG.into(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(key::config_map_name(role, cluster_id, node)),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut vm_mounts = vec![VolumeMount {
        name: VOLUME_CLOUD_CONFIG.into(),
        mount_path: key::CLOUD_CONFIG_MOUNT_PATH.into(),
        ..Default::default()
    }];
    if role == NodeRole::Master {
        volumes.push(etcd_volume(cluster_id, idx, storage_type));
        vm_mounts.push(VolumeMount {
            name: VOLUME_ETCD_DATA.into(),
            mount_path: "/etc/kubernetes/data/etcd/".into(),
            ..Default::default()
        });
    }
    volumes.extend(vec![
        Volume {
            name: VOLUME_IMAGES.into(),
            host_path: Some(HostPathVolumeSource {
                path: key::IMAGES_PATH.into(),
                type_: None,
            }),
            ..Default::default()
        },
        Volume {
            name: VOLUME_ROOTFS.into(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: VOLUME_FLANNEL.into(),
            host_path: Some(HostPathVolumeSource {
                path: key::FLANNEL_ENV_PATH_PREFIX.into(),
                type_: None,
            }),
            ..Default::default()
        },
    ]);
    vm_mounts.extend(vec![
        VolumeMount {
            name: VOLUME_IMAGES.into(),
            mount_path: "/usr/code/images/".into(),
            ..Default::default()
        },
        VolumeMount {
            name: VOLUME_ROOTFS.into(),
            mount_path: "/usr/code/rootfs/".into(),
            ..Default::default()
        },
    ]);

    let vm = Container {
        // NOTE WELL: do not change the name of this container. It will cause breaking changes.
        name: CONTAINER_K8S_KVM.into(),
        image: Some(ctx.cluster.kvm.k8s_kvm_image.clone()),
        image_pull_policy: Some("IfNotPresent".into()),
        security_context: Some(privileged()),
        args: Some(vec![role.id().into()]),
        env: Some(vec![
            env("CORES", cpus.to_string()),
            env("DISK", format!("{:.0}G", disk)),
            env_from_field("HOSTNAME", "metadata.name"),
            env("NETWORK_BRIDGE_NAME", key::network_bridge_name(cluster_id)),
            env("NETWORK_TAP_NAME", key::network_tap_name(cluster_id)),
            env("MEMORY", memory.0.clone()),
            env("ROLE", role.id()),
            env("CLOUD_CONFIG_PATH", format!("{}{}", key::CLOUD_CONFIG_MOUNT_PATH, key::USER_DATA_KEY)),
        ]),
        liveness_probe: Some(Probe {
            initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECONDS),
            timeout_seconds: Some(PROBE_TIMEOUT_SECONDS),
            period_seconds: Some(PROBE_PERIOD_SECONDS),
            failure_threshold: Some(PROBE_FAILURE_THRESHOLD),
            success_threshold: Some(PROBE_SUCCESS_THRESHOLD),
            http_get: Some(HTTPGetAction {
                host: Some(key::PROBE_HOST.into()),
                path: Some(key::HEALTH_PATH.into()),
                port: IntOrString::Int(key::liveness_port(ctx.cluster.network.flannel_vni)),
                scheme: Some("HTTP".into()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        resources: Some(ResourceRequirements {
            requests: Some(maplit::btreemap! {
                "cpu".into() => Quantity(cpus.to_string()),
                "memory".into() => memory,
            }),
            ..Default::default()
        }),
        volume_mounts: Some(vm_mounts),
        ..Default::default()
    };

    let mut node_selector = BTreeMap::new();
    node_selector.insert(key::LABEL_HOST_ROLE.into(), role.id().into());
    Ok(Deployment {
        metadata: meta,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy: Some(recreate()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(ctx.annotations()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(anti_affinity(ctx, role)),
                    host_network: Some(true),
                    node_selector: Some(node_selector),
                    volumes: Some(volumes),
                    containers: vec![endpoint_updater(ctx, role, node), vm, health_sidecar(ctx)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// The volume of the etcd data of the master of the given index.
fn etcd_volume(cluster_id: &str, idx: usize, storage_type: StorageType) -> Volume {
    match storage_type {
        StorageType::HostPath => Volume {
            name: VOLUME_ETCD_DATA.into(),
            host_path: Some(HostPathVolumeSource {
                path: key::master_host_path_volume_dir(cluster_id, idx),
                type_: None,
            }),
            ..Default::default()
        },
        StorageType::PersistentVolume => Volume {
            name: VOLUME_ETCD_DATA.into(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: key::etcd_pvc_name(cluster_id, idx),
                read_only: None,
            }),
            ..Default::default()
        },
    }
}

/// The sidecar publishing the IP of the VM on its pod, from which endpoints are reconciled.
fn endpoint_updater(ctx: &PassContext<'_>, role: NodeRole, node: &NodeDescriptor) -> Container {
    let cluster_id = ctx.cluster_id();
    Container {
        name: CONTAINER_ENDPOINT_UPDATER.into(),
        image: Some(ctx.cluster.kvm.endpoint_updater_image.clone()),
        image_pull_policy: Some("IfNotPresent".into()),
        command: Some(vec![
            "/bin/sh".into(),
            "-c".into(),
            format!(
                "/opt/k8s-endpoint-updater update --provider.bridge.name={} --service.kubernetes.cluster.namespace={} --service.kubernetes.cluster.service={} --service.kubernetes.inCluster=true --service.kubernetes.pod.name=${{POD_NAME}}",
                key::network_bridge_name(cluster_id),
                key::cluster_namespace(cluster_id),
                role,
            ),
        ]),
        security_context: Some(privileged()),
        env: Some(vec![
            env_from_field("POD_NAME", "metadata.name"),
            env("BRIDGE_IP_CONFIG_PATH", key::bridge_ip_config_path(&node.id)),
        ]),
        ..Default::default()
    }
}

/// The sidecar serving the health endpoint of the VM.
fn health_sidecar(ctx: &PassContext<'_>) -> Container {
    Container {
        name: CONTAINER_K8S_KVM_HEALTH.into(),
        image: Some(key::K8S_KVM_HEALTH_IMAGE.into()),
        image_pull_policy: Some("Always".into()),
        env: Some(vec![
            env("LISTEN_ADDRESS", key::health_listen_address(ctx.cluster.network.flannel_vni)),
            env("NETWORK_ENV_FILE_PATH", key::network_env_file_path(ctx.cluster_id())),
        ]),
        security_context: Some(privileged()),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_FLANNEL.into(),
            mount_path: key::FLANNEL_ENV_PATH_PREFIX.into(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// The deployment of the node controller of the cluster.
fn node_controller_deployment(ctx: &PassContext<'_>) -> Deployment {
    let labels = ctx.labels(key::NODE_CONTROLLER_ID);
    Deployment {
        metadata: ctx.object_meta(key::NODE_CONTROLLER_ID, key::NODE_CONTROLLER_ID),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy: Some(recreate()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(ctx.annotations()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: key::NODE_CONTROLLER_ID.into(),
                        image: Some(ctx.cluster.kvm.node_controller_image.clone()),
                        image_pull_policy: Some("IfNotPresent".into()),
                        args: Some(vec![
                            format!("-cluster-api={}", key::cluster_api_endpoint(&ctx.cluster.network.api_domain)),
                            format!("-cluster-id={}", ctx.cluster_id()),
                        ]),
                        env: Some(vec![env("PROVIDER_HOST_CLUSTER_NAMESPACE", ctx.cluster_id())]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Spread the VMs of a role of one cluster over distinct hosts.
fn anti_affinity(ctx: &PassContext<'_>, role: NodeRole) -> Affinity {
    let requirement = |key: &str, val: &str| LabelSelectorRequirement {
        key: key.into(),
        operator: "In".into(),
        values: Some(vec![val.into()]),
    };
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_expressions: Some(vec![requirement(key::LABEL_APP, role.id()), requirement(key::LABEL_CLUSTER, ctx.cluster_id())]),
                    ..Default::default()
                }),
                topology_key: "kubernetes.io/hostname".into(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn recreate() -> DeploymentStrategy {
    DeploymentStrategy {
        type_: Some("Recreate".into()),
        rolling_update: None,
    }
}

fn privileged() -> SecurityContext {
    SecurityContext {
        privileged: Some(true),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn env_from_field(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".into()),
                field_path: field_path.into(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
