//! Namespace reconciliation & cluster teardown sequencing.
//!
//! All objects of a cluster live in the cluster's namespace, so the namespace decides whether a
//! pass may proceed at all:
//!
//! - a terminating namespace cancels the pass, keeping the cluster finalizer until the namespace
//!   is gone;
//! - an absent namespace of a cluster marked for deletion means teardown is complete;
//! - the namespace of a cluster marked for deletion is only deleted once all of its pods are gone,
//!   as draining VMs may still need to create objects in it.

#[cfg(test)]
#[path = "namespace_test.rs"]
mod namespace_test;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{key, Outcome, PassContext};

/// The phase of a cluster namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespacePhase {
    Active,
    Terminating,
    Absent,
}

/// The phase of the given namespace.
pub fn phase(namespace: Option<&Namespace>) -> NamespacePhase {
    match namespace {
        None => NamespacePhase::Absent,
        Some(ns) => match ns.status.as_ref().and_then(|status| status.phase.as_deref()) {
            Some("Terminating") => NamespacePhase::Terminating,
            _ => NamespacePhase::Active,
        },
    }
}

/// Check if the pods of the namespace must be counted before deciding on the given state.
pub fn needs_pod_count(current: Option<&Namespace>, deleted: bool) -> bool {
    deleted && phase(current) == NamespacePhase::Active
}

/// Decide how the pass proceeds given the current namespace.
///
/// The given pod count is only consulted when [`needs_pod_count`] holds.
pub fn lifecycle(current: Option<Namespace>, deleted: bool, pod_count: usize) -> Outcome<Option<Namespace>> {
    match phase(current.as_ref()) {
        NamespacePhase::Terminating => {
            tracing::debug!("namespace is terminating, keeping finalizers");
            Outcome::Cancel { keep_finalizers: true }
        }
        NamespacePhase::Absent if deleted => {
            tracing::debug!("namespace is gone, cluster deletion completed");
            Outcome::Cancel { keep_finalizers: false }
        }
        NamespacePhase::Active if deleted && pod_count > 0 => {
            tracing::debug!(pod_count, "cannot finish deletion of namespace due to existing pods");
            Outcome::Cancel { keep_finalizers: true }
        }
        _ => Outcome::Proceed(current),
    }
}

/// Compute the desired namespace of the cluster, absent when the cluster is marked for deletion.
pub fn desired(ctx: &PassContext<'_>) -> Option<Namespace> {
    if ctx.deleted {
        return None;
    }
    let mut labels = BTreeMap::new();
    labels.insert(key::LABEL_CLUSTER.to_string(), ctx.cluster_id().to_string());
    labels.insert(key::LABEL_CUSTOMER.to_string(), ctx.cluster.customer_id.clone());
    Some(Namespace {
        metadata: ObjectMeta {
            name: Some(key::cluster_namespace(ctx.cluster_id())),
            labels: Some(labels),
            annotations: Some(ctx.annotations()),
            ..Default::default()
        },
        ..Default::default()
    })
}
