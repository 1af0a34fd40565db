//! ConfigMap reconciliation.
//!
//! Each node of a cluster gets a ConfigMap holding its rendered cloud-config, which the VM
//! container mounts and hands to the VM as user data.

#[cfg(test)]
#[path = "configmap_test.rs"]
mod configmap_test;

use k8s_openapi::api::core::v1::ConfigMap;
use maplit::btreemap;

use super::{key, PassContext};
use crate::cloudconfig::{self, NodeConfigParams};
use kvm_core::crd::NodeRole;
use kvm_core::ReconcileError;

/// Compute the desired ConfigMaps of the cluster, one per node.
///
/// Any rendering error fails the whole computation.
pub fn desired(ctx: &PassContext<'_>) -> Result<Vec<ConfigMap>, ReconcileError> {
    if ctx.deleted {
        return Ok(vec![]);
    }
    let mut config_maps = vec![];
    for role in [NodeRole::Master, NodeRole::Worker] {
        for (idx, node) in ctx.cluster.nodes(role).iter().enumerate() {
            let rendered = cloudconfig::render(&NodeConfigParams {
                role,
                cluster: ctx.cluster,
                node: (idx, node),
                bundle: ctx.bundle,
                secrets: ctx.secrets,
                settings: ctx.settings,
            })?;
            let mut meta = ctx.object_meta(key::config_map_name(role, ctx.cluster_id(), node), role.id());
            meta.labels
                .get_or_insert_with(Default::default)
                .insert(key::LABEL_NODE.into(), node.id.clone());
            config_maps.push(ConfigMap {
                metadata: meta,
                data: Some(btreemap! {
                    key::USER_DATA_KEY.into() => rendered.encoded,
                }),
                ..Default::default()
            });
        }
    }
    Ok(config_maps)
}
