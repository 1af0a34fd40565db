//! Names, labels & fixed values of the objects of a guest cluster.
//!
//! NOTE WELL: the values here name live objects of running clusters. Changing any of them will
//! orphan existing objects or roll every VM of the fleet.

use kvm_core::crd::{NodeDescriptor, NodeRole};

/// The label naming the app of an object.
pub const LABEL_APP: &str = "app";
/// The label naming the cluster of an object.
pub const LABEL_CLUSTER: &str = "cluster";
/// The label naming the customer of an object.
pub const LABEL_CUSTOMER: &str = "customer";
/// The label naming the node of an object.
pub const LABEL_NODE: &str = "node";
/// The node selector label placing VM pods on host nodes of a matching role.
pub const LABEL_HOST_ROLE: &str = "role";

/// The pod annotation carrying the IP of the VM, set by the endpoint updater sidecar.
pub const ANNOTATION_ENDPOINT_IP: &str = "endpoint.kvm.giantswarm.io/ip";

/// The app & object name of the node controller.
pub const NODE_CONTROLLER_ID: &str = "node-controller";
/// The ConfigMap key holding the rendered node configuration.
pub const USER_DATA_KEY: &str = "user_data";
/// The image of the VM health sidecar.
pub const K8S_KVM_HEALTH_IMAGE: &str = "quay.io/giantswarm/k8s-kvm-health:ddf211dfed52086ade32ab8c45e44eb0273319ef";

/// The path of the health endpoint of a VM.
pub const HEALTH_PATH: &str = "/healthz";
/// The host on which the VM health endpoint listens.
pub const PROBE_HOST: &str = "127.0.0.1";
/// The base port of the VM health endpoint, offset by the flannel VNI of the cluster.
pub const LIVENESS_PORT_BASE: i32 = 23000;

/// The host directory holding the flannel network env files.
pub const FLANNEL_ENV_PATH_PREFIX: &str = "/run/flannel";
/// The host directory holding VM images.
pub const IMAGES_PATH: &str = "/home/core/images/";
/// The mount path of the node configuration in the VM container.
pub const CLOUD_CONFIG_MOUNT_PATH: &str = "/cloudconfig/";

/// The port of guest cluster etcd.
pub const ETCD_PORT: i32 = 2379;
/// The port of the guest cluster K8s API.
pub const API_PORT: i32 = 443;
/// The node port of worker ingress HTTP traffic.
pub const WORKER_HTTP_PORT: i32 = 30010;
/// The node port of worker ingress HTTPS traffic.
pub const WORKER_HTTPS_PORT: i32 = 30011;

/// The name of the Namespace of the given cluster.
pub fn cluster_namespace(cluster_id: &str) -> String {
    cluster_id.into()
}

/// The name of the Deployment of the given node.
pub fn deployment_name(role: NodeRole, node: &NodeDescriptor) -> String {
    format!("{}-{}", role, node.id)
}

/// The name of the ConfigMap holding the configuration of the given node.
pub fn config_map_name(role: NodeRole, cluster_id: &str, node: &NodeDescriptor) -> String {
    format!("{}-{}-{}", role, cluster_id, node.id)
}

/// The name of the network bridge of the given cluster.
pub fn network_bridge_name(cluster_id: &str) -> String {
    format!("br-{}", cluster_id)
}

/// The name of the tap device of the given cluster.
pub fn network_tap_name(cluster_id: &str) -> String {
    format!("tap-{}", cluster_id)
}

/// The path of the flannel network env file of the given cluster.
pub fn network_env_file_path(cluster_id: &str) -> String {
    format!("{}/networks/{}.env", FLANNEL_ENV_PATH_PREFIX, cluster_id)
}

/// The path of the bridge IP config written for the given node by the endpoint updater.
pub fn bridge_ip_config_path(node_id: &str) -> String {
    format!("/tmp/bridge-ip-configmap-{}.json", node_id)
}

/// The host path of the etcd data of the master VM of the given index.
pub fn master_host_path_volume_dir(cluster_id: &str, idx: usize) -> String {
    format!("/home/core/volumes/{}/k8s-master-vm{}/", cluster_id, idx)
}

/// The name of the claim of the etcd data of the master VM of the given index.
pub fn etcd_pvc_name(cluster_id: &str, idx: usize) -> String {
    format!("pvc-master-etcd-{}-{}", cluster_id, idx)
}

/// The port of the VM health endpoint of the given cluster.
pub fn liveness_port(flannel_vni: u32) -> i32 {
    LIVENESS_PORT_BASE + flannel_vni as i32
}

/// The listen address of the VM health sidecar of the given cluster.
pub fn health_listen_address(flannel_vni: u32) -> String {
    format!("http://{}:{}", PROBE_HOST, liveness_port(flannel_vni))
}

/// The API endpoint of the given cluster, as seen from the host cluster.
pub fn cluster_api_endpoint(api_domain: &str) -> String {
    format!("https://{}", api_domain)
}
