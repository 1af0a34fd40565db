//! Endpoints reconciliation.
//!
//! The `master` & `worker` services of a cluster have no selector, as the VMs backing them are
//! not pods. Their endpoints are maintained here from the IPs which the endpoint updater sidecar
//! publishes as an annotation on each VM pod.
//!
//! Endpoints are never torn down because a single VM went away. When IPs disappear from the
//! desired set, only the IPs which remain desired are retained, and the whole object is removed
//! only once no IP is retained at all. Both the update & delete slots of such a patch carry the
//! same retained object; applying an update only writes non-empty sets and applying a delete only
//! removes empty ones, so the decision is settled against the object actually being applied.

#[cfg(test)]
#[path = "endpoints_test.rs"]
mod endpoints_test;

use std::collections::BTreeSet;
use std::net::IpAddr;

use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Pod};

use super::compare::ManagedObject;
use super::{key, service, PassContext, Patch};
use kvm_core::crd::NodeRole;

/// The roles for which endpoints are maintained.
pub const ROLES: [NodeRole; 2] = [NodeRole::Master, NodeRole::Worker];

/// The outcome of retracting IPs from an endpoint set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Retraction {
    /// Keep the endpoints object with exactly the given IPs.
    Update(BTreeSet<IpAddr>),
    /// Remove the endpoints object, no IP is retained.
    Delete,
}

/// Compute the IPs retained when retracting from the current set all IPs not desired anymore.
///
/// The retained set is always a subset of the current set.
pub fn retract(current: &BTreeSet<IpAddr>, desired: &BTreeSet<IpAddr>) -> Retraction {
    let retained: BTreeSet<IpAddr> = current.intersection(desired).copied().collect();
    if retained.is_empty() {
        Retraction::Delete
    } else {
        Retraction::Update(retained)
    }
}

/// The IPs recorded on the given endpoints object.
///
/// Addresses which do not parse as IPs are ignored.
pub fn ip_set(endpoints: &Endpoints) -> BTreeSet<IpAddr> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .filter_map(|addr| addr.ip.parse().ok())
        .collect()
}

/// Check if the given endpoints object carries no IPs, in which case it must not exist.
pub fn is_empty(endpoints: &Endpoints) -> bool {
    ip_set(endpoints).is_empty()
}

/// Compute the IPs which should back the service of the given role.
///
/// These are the IPs published on all ready VM pods of the role. Malformed IPs are skipped.
pub fn desired_ips(ctx: &PassContext<'_>, role: NodeRole, pods: &[Pod]) -> BTreeSet<IpAddr> {
    if ctx.deleted {
        return BTreeSet::new();
    }
    pods.iter()
        .filter(|pod| {
            let labels = pod.metadata.labels.as_ref();
            labels.and_then(|labels| labels.get(key::LABEL_APP)).map(String::as_str) == Some(role.id())
        })
        .filter(|pod| is_ready(pod))
        .filter_map(|pod| {
            let raw = pod.metadata.annotations.as_ref()?.get(key::ANNOTATION_ENDPOINT_IP)?;
            match raw.parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
                    tracing::warn!(pod = pod_name, ip = %raw, "skipping malformed endpoint IP annotation");
                    None
                }
            }
        })
        .collect()
}

/// Check if the given pod has the ready condition.
fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conds| conds.iter().any(|cond| cond.type_ == "Ready" && cond.status == "True"))
        .unwrap_or(false)
}

/// Build the endpoints object of the given role carrying the given IPs.
pub fn build(ctx: &PassContext<'_>, role: NodeRole, ips: &BTreeSet<IpAddr>) -> Endpoints {
    let subsets = if ips.is_empty() {
        None
    } else {
        Some(vec![EndpointSubset {
            addresses: Some(
                ips.iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(
                service::role_ports(role)
                    .iter()
                    .map(|(name, port)| EndpointPort {
                        name: Some(name.to_string()),
                        port: *port,
                        protocol: Some("TCP".into()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }])
    };
    Endpoints {
        metadata: ctx.object_meta(role.id(), role.id()),
        subsets,
    }
}

/// Compute the desired endpoints of the given role.
pub fn desired(ctx: &PassContext<'_>, role: NodeRole, pods: &[Pod]) -> Endpoints {
    build(ctx, role, &desired_ips(ctx, role, pods))
}

/// Compute the patch converging the current endpoints of a role towards the desired endpoints.
pub fn compute_patch(ctx: &PassContext<'_>, role: NodeRole, current: Option<&Endpoints>, desired: &Endpoints) -> Patch<Endpoints> {
    let mut patch = Patch::default();
    let desired_ips = ip_set(desired);
    let current = match current {
        Some(current) => current,
        None => {
            if !desired_ips.is_empty() {
                patch.create.push(desired.clone());
            }
            return patch;
        }
    };

    let current_ips = ip_set(current);
    if current_ips == desired_ips {
        return patch;
    }
    if !desired_ips.is_subset(&current_ips) {
        let mut update = desired.clone();
        update.adopt(current);
        patch.update.push(update);
        return patch;
    }

    let retained = match retract(&current_ips, &desired_ips) {
        Retraction::Update(retained) => retained,
        Retraction::Delete => BTreeSet::new(),
    };
    let mut change = build(ctx, role, &retained);
    change.adopt(current);
    patch.update.push(change.clone());
    patch.delete.push(change);
    patch
}
