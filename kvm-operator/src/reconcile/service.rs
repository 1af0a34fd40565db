//! Service reconciliation.

#[cfg(test)]
#[path = "service_test.rs"]
mod service_test;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{key, PassContext};
use kvm_core::crd::NodeRole;
use kvm_core::ReconcileError;

/// The named ports exposed for the given role.
pub fn role_ports(role: NodeRole) -> [(&'static str, i32); 2] {
    match role {
        NodeRole::Master => [("etcd", key::ETCD_PORT), ("api", key::API_PORT)],
        NodeRole::Worker => [("http", key::WORKER_HTTP_PORT), ("https", key::WORKER_HTTPS_PORT)],
    }
}

/// Compute the desired services of the cluster.
///
/// Services have no selector, their endpoints are maintained by the endpoints reconciler.
pub fn desired(ctx: &PassContext<'_>) -> Result<Vec<Service>, ReconcileError> {
    if ctx.deleted {
        return Ok(vec![]);
    }
    Ok([NodeRole::Master, NodeRole::Worker]
        .iter()
        .map(|role| Service {
            metadata: ctx.object_meta(role.id(), role.id()),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".into()),
                ports: Some(
                    role_ports(*role)
                        .iter()
                        .map(|(name, port)| ServicePort {
                            name: Some(name.to_string()),
                            port: *port,
                            target_port: Some(IntOrString::Int(*port)),
                            protocol: Some("TCP".into()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect())
}
