use anyhow::Result;
use k8s_openapi::api::core::v1::ConfigMap;
use maplit::btreemap;

use super::*;
use crate::fixtures;

fn config_map(name: &str, val: &str, resource_version: Option<&str>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.into()),
            resource_version: resource_version.map(String::from),
            ..Default::default()
        },
        data: Some(btreemap! {"user_data".into() => val.into()}),
        ..Default::default()
    }
}

#[test]
fn compute_patch_creates_updates_and_deletes() -> Result<()> {
    let current = vec![config_map("a", "1", Some("10")), config_map("b", "1", Some("11")), config_map("c", "1", Some("12"))];
    let desired = vec![config_map("a", "1", None), config_map("b", "2", None), config_map("d", "1", None)];

    let patch = compute_patch(&current, &desired);

    let names = |objs: &[ConfigMap]| objs.iter().map(|o| name_of(o).to_string()).collect::<Vec<_>>();
    assert!(names(&patch.create) == vec!["d"], "unexpected creates {:?}", names(&patch.create));
    assert!(names(&patch.update) == vec!["b"], "unexpected updates {:?}", names(&patch.update));
    assert!(names(&patch.delete) == vec!["c"], "unexpected deletes {:?}", names(&patch.delete));
    let rv = patch.update[0].metadata.resource_version.as_deref();
    assert!(rv == Some("11"), "expected update to adopt the current resource version, got {:?}", rv);
    Ok(())
}

#[test]
fn compute_patch_of_equal_states_is_noop() -> Result<()> {
    let state = vec![config_map("a", "1", None), config_map("b", "2", None)];
    let patch = compute_patch(&state, &state);
    assert!(patch.is_noop(), "expected noop patch, got {:?}", patch);

    let empty: Vec<ConfigMap> = vec![];
    assert!(compute_patch(&empty, &empty).is_noop(), "expected noop patch for empty states");
    Ok(())
}

#[test]
fn compute_patch_with_empty_desired_state_deletes_everything() -> Result<()> {
    let current = vec![config_map("a", "1", Some("1")), config_map("b", "2", Some("2"))];
    let patch = compute_patch(&current, &[]);
    assert!(patch.create.is_empty() && patch.update.is_empty(), "expected only deletes, got {:?}", patch);
    assert!(patch.delete.len() == 2, "expected 2 deletes, got {}", patch.delete.len());
    Ok(())
}

#[test]
fn kind_order_puts_namespace_first_while_alive_and_last_on_deletion() -> Result<()> {
    let alive = Kind::order(false);
    assert!(alive.first() == Some(&Kind::Namespace), "unexpected first kind {:?}", alive.first());
    assert!(alive.last() == Some(&Kind::Ingress), "unexpected last kind {:?}", alive.last());

    let deleting = Kind::order(true);
    assert!(deleting.last() == Some(&Kind::Namespace), "unexpected last kind on deletion {:?}", deleting.last());
    let mut reversed = deleting.to_vec();
    reversed.reverse();
    assert!(reversed == alive.to_vec(), "expected deletion order to reverse the regular order, got {:?}", deleting);
    Ok(())
}

#[test]
fn object_meta_carries_labels_and_bundle_annotation() -> Result<()> {
    let inputs = fixtures::PassInputs::new("3.1.0")?;
    let meta = inputs.ctx().object_meta("master", "master");

    assert!(meta.namespace.as_deref() == Some(fixtures::CLUSTER_ID), "unexpected namespace {:?}", meta.namespace);
    let labels = meta.labels.unwrap_or_default();
    assert!(labels == fixtures::live_labels("master"), "unexpected labels {:?}", labels);
    let version = meta.annotations.unwrap_or_default().get(kvm_core::VERSION_BUNDLE_ANNOTATION).cloned();
    assert!(version.as_deref() == Some("3.1.0"), "unexpected bundle annotation {:?}", version);
    Ok(())
}
