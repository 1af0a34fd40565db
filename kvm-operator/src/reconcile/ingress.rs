//! Ingress reconciliation.
//!
//! The guest cluster API, and for bundles enabling it etcd, are exposed through the host
//! cluster's ingress controller with SSL passthrough, as TLS is terminated by the VMs.

#[cfg(test)]
#[path = "ingress_test.rs"]
mod ingress_test;

use k8s_openapi::api::networking::v1::Ingress;
use serde_json::json;

use super::{key, PassContext};
use kvm_core::crd::NodeRole;
use kvm_core::ReconcileError;

/// The name of the ingress exposing the guest cluster API.
pub const API_INGRESS: &str = "api";
/// The name of the ingress exposing guest cluster etcd.
pub const ETCD_INGRESS: &str = "etcd";
/// The class of the ingress controller serving guest cluster ingresses.
const INGRESS_CLASS: &str = "nginx";
const ANNOTATION_SSL_PASSTHROUGH: &str = "nginx.ingress.kubernetes.io/ssl-passthrough";

/// Compute the desired ingresses of the cluster.
pub fn desired(ctx: &PassContext<'_>) -> Result<Vec<Ingress>, ReconcileError> {
    if ctx.deleted {
        return Ok(vec![]);
    }
    let mut ingresses = vec![build(ctx, API_INGRESS, &ctx.cluster.network.api_domain, key::API_PORT)?];
    if ctx.bundle.behavior.etcd_ingress {
        ingresses.push(build(ctx, ETCD_INGRESS, &ctx.cluster.network.etcd_domain, key::ETCD_PORT)?);
    }
    Ok(ingresses)
}

/// Build an ingress routing all traffic of the given host to the given port of the master service.
fn build(ctx: &PassContext<'_>, name: &str, host: &str, port: i32) -> Result<Ingress, ReconcileError> {
    let mut ingress: Ingress = serde_json::from_value(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {},
        "spec": {
            "ingressClassName": INGRESS_CLASS,
            "rules": [{
                "host": host,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {
                            "service": {
                                "name": NodeRole::Master.id(),
                                "port": {"number": port},
                            },
                        },
                    }],
                },
            }],
        },
    }))
    .map_err(|err| ReconcileError::WrongType(format!("error building {} ingress: {}", name, err)))?;
    ingress.metadata = ctx.object_meta(name, name);
    ingress
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_SSL_PASSTHROUGH.into(), "true".into());
    Ok(ingress)
}
