use anyhow::{bail, Result};
use k8s_openapi::api::core::v1::{EnvVar, PodSpec};

use super::*;
use crate::fixtures;
use crate::reconcile::{compute_patch, name_of};
use kvm_core::VERSION_BUNDLE_ANNOTATION;

fn pod_spec(deployment: &Deployment) -> Result<&PodSpec> {
    match deployment.spec.as_ref().and_then(|spec| spec.template.spec.as_ref()) {
        Some(pod) => Ok(pod),
        None => bail!("deployment {} has no pod spec", name_of(deployment)),
    }
}

fn container<'a>(pod: &'a PodSpec, name: &str) -> Result<&'a Container> {
    match pod.containers.iter().find(|c| c.name == name) {
        Some(container) => Ok(container),
        None => bail!("missing container {}", name),
    }
}

fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
    container
        .env
        .iter()
        .flatten()
        .find(|var: &&EnvVar| var.name == name)
        .and_then(|var| var.value.as_deref())
}

fn etcd_volume_of(deployment: &Deployment) -> Result<Volume> {
    match pod_spec(deployment)?.volumes.iter().flatten().find(|v| v.name == "etcd-data") {
        Some(volume) => Ok(volume.clone()),
        None => bail!("missing etcd volume"),
    }
}

#[test]
fn desired_deployments_cover_all_nodes_and_node_controller() -> Result<()> {
    let inputs = fixtures::PassInputs::new("3.5.0")?;
    let names: Vec<String> = desired(&inputs.ctx())?.iter().map(|d| name_of(d).to_string()).collect();
    let expected = vec!["master-m0x1a", "worker-w7k2c", "worker-w9p3d", "node-controller"];
    assert!(names == expected, "unexpected deployments, got {:?}, expected {:?}", names, expected);
    Ok(())
}

#[test]
fn vm_container_carries_capacity_and_network_settings() -> Result<()> {
    let inputs = fixtures::PassInputs::new("3.5.0")?;
    let deployments = desired(&inputs.ctx())?;
    let pod = pod_spec(&deployments[0])?;
    let vm = container(pod, "k8s-kvm")?;

    assert!(env_value(vm, "CORES") == Some("2"), "unexpected CORES {:?}", env_value(vm, "CORES"));
    assert!(env_value(vm, "DISK") == Some("20G"), "unexpected DISK {:?}", env_value(vm, "DISK"));
    assert!(env_value(vm, "MEMORY") == Some("3G"), "unexpected MEMORY {:?}", env_value(vm, "MEMORY"));
    assert!(env_value(vm, "NETWORK_BRIDGE_NAME") == Some("br-al9qy"), "unexpected bridge {:?}", env_value(vm, "NETWORK_BRIDGE_NAME"));

    let requests = vm.resources.as_ref().and_then(|r| r.requests.clone()).unwrap_or_default();
    assert!(requests.get("cpu") == Some(&Quantity("2".into())), "unexpected cpu request {:?}", requests.get("cpu"));
    assert!(requests.get("memory") == Some(&Quantity("3G".into())), "unexpected memory request {:?}", requests.get("memory"));

    let probe = vm.liveness_probe.as_ref().and_then(|p| p.http_get.as_ref());
    let probe = probe.map(|get| (get.host.as_deref(), get.path.as_deref(), get.port.clone()));
    assert!(
        probe == Some((Some("127.0.0.1"), Some("/healthz"), IntOrString::Int(23026))),
        "unexpected liveness probe {:?}",
        probe
    );

    let health = container(pod, "k8s-kvm-health")?;
    let env_file = env_value(health, "NETWORK_ENV_FILE_PATH");
    assert!(env_file == Some("/run/flannel/networks/al9qy.env"), "unexpected env file path {:?}", env_file);

    let updater = container(pod, "k8s-endpoint-updater")?;
    let command = updater.command.clone().unwrap_or_default().join(" ");
    assert!(command.contains("--provider.bridge.name=br-al9qy"), "unexpected updater command {}", command);
    assert!(command.contains("--service.kubernetes.cluster.service=master"), "unexpected updater command {}", command);
    Ok(())
}

#[test]
fn storage_type_selects_etcd_volume() -> Result<()> {
    let mut inputs = fixtures::PassInputs::new("3.5.0")?;
    let empty = etcd_volume_of(&desired(&inputs.ctx())?[0])?;
    inputs.cluster.kvm.storage_type = "hostPath".into();
    let host_path = etcd_volume_of(&desired(&inputs.ctx())?[0])?;
    assert!(empty == host_path, "expected empty storage type to behave like hostPath");
    let path = host_path.host_path.map(|hp| hp.path);
    assert!(path.as_deref() == Some("/home/core/volumes/al9qy/k8s-master-vm0/"), "unexpected host path {:?}", path);

    inputs.cluster.kvm.storage_type = "persistentVolume".into();
    let pvc = etcd_volume_of(&desired(&inputs.ctx())?[0])?;
    let claim = pvc.persistent_volume_claim.map(|pvc| pvc.claim_name);
    assert!(claim.as_deref() == Some("pvc-master-etcd-al9qy-0"), "unexpected claim {:?}", claim);

    inputs.cluster.kvm.storage_type = "nfs".into();
    match desired(&inputs.ctx()) {
        Err(ReconcileError::InvalidConfiguration(msg)) => assert!(msg.contains("spec.kvm.storageType"), "unexpected message {}", msg),
        other => bail!("expected invalid configuration, got {:?}", other.map(|d| d.len())),
    }
    Ok(())
}

#[test]
fn invalid_capacity_fails_whole_computation() -> Result<()> {
    let mut inputs = fixtures::PassInputs::new("3.5.0")?;
    inputs.cluster.workers[1].memory = Some("three gigs".into());
    match desired(&inputs.ctx()) {
        Err(ReconcileError::InvalidConfiguration(msg)) => assert!(msg.contains("spec.workers[1].memory"), "unexpected message {}", msg),
        other => bail!("expected invalid configuration, got {:?}", other.map(|d| d.len())),
    }

    let mut inputs = fixtures::PassInputs::new("3.5.0")?;
    inputs.cluster.masters[0].cpus = None;
    match desired(&inputs.ctx()) {
        Err(ReconcileError::InvalidConfiguration(msg)) => assert!(msg.contains("spec.masters[0].cpus"), "unexpected message {}", msg),
        other => bail!("expected invalid configuration, got {:?}", other.map(|d| d.len())),
    }
    Ok(())
}

#[test]
fn memory_quantities_are_validated() -> Result<()> {
    for valid in ["3G", "2Gi", "512Mi", "1.5G", "1e9", "1024"] {
        let mut node = fixtures::node("n1");
        node.memory = Some(valid.into());
        memory_quantity(NodeRole::Worker, 0, &node)?;
    }
    for invalid in ["3 G", "G", "2gb", "-"] {
        let mut node = fixtures::node("n1");
        node.memory = Some(invalid.into());
        assert!(memory_quantity(NodeRole::Worker, 0, &node).is_err(), "expected {:?} to be rejected", invalid);
    }
    Ok(())
}

#[test]
fn desired_deployments_are_deterministic_and_idempotent() -> Result<()> {
    let inputs = fixtures::PassInputs::new("3.5.0")?;
    let first = desired(&inputs.ctx())?;
    let second = desired(&inputs.ctx())?;
    assert!(first == second, "expected identical inputs to yield identical deployments");
    assert!(
        serde_json::to_vec(&first)? == serde_json::to_vec(&second)?,
        "expected identical inputs to yield byte-identical deployments"
    );
    assert!(compute_patch(&first, &second).is_noop(), "expected noop on converged deployments");
    Ok(())
}

#[test]
fn bundle_version_drift_triggers_update() -> Result<()> {
    let old = fixtures::PassInputs::new("3.1.0")?;
    let mut current = desired(&old.ctx())?;
    for (idx, deployment) in current.iter_mut().enumerate() {
        deployment.metadata.resource_version = Some(format!("{}", idx + 100));
    }

    let new = fixtures::PassInputs::new("3.5.0")?;
    let patch = compute_patch(&current, &desired(&new.ctx())?);

    assert!(patch.create.is_empty() && patch.delete.is_empty(), "expected only updates, got {:?}", patch);
    assert!(patch.update.len() == current.len(), "expected all deployments to be updated, got {}", patch.update.len());
    for update in patch.update.iter() {
        let version = update.metadata.annotations.as_ref().and_then(|a| a.get(VERSION_BUNDLE_ANNOTATION));
        assert!(version.map(String::as_str) == Some("3.5.0"), "unexpected bundle annotation {:?}", version);
        assert!(update.metadata.resource_version.is_some(), "expected update to adopt resource version");
    }
    Ok(())
}

#[test]
fn capacity_and_storage_changes_trigger_update() -> Result<()> {
    let inputs = fixtures::PassInputs::new("3.5.0")?;
    let current = desired(&inputs.ctx())?;

    let mut changed = fixtures::PassInputs::new("3.5.0")?;
    changed.cluster.masters[0].cpus = Some(8);
    changed.cluster.masters[0].memory = Some("16G".into());
    changed.cluster.kvm.storage_type = "persistentVolume".into();
    let patch = compute_patch(&current, &desired(&changed.ctx())?);
    let updated: Vec<&str> = patch.update.iter().map(name_of).collect();
    assert!(updated == vec!["master-m0x1a"], "expected only the master to be updated, got {:?}", updated);
    assert!(patch.create.is_empty() && patch.delete.is_empty(), "expected only updates, got {:?}", patch);

    let update = &patch.update[0];
    let vm = container(pod_spec(update)?, "k8s-kvm")?;
    assert!(env_value(vm, "CORES") == Some("8"), "unexpected CORES {:?}", env_value(vm, "CORES"));
    assert!(env_value(vm, "MEMORY") == Some("16G"), "unexpected MEMORY {:?}", env_value(vm, "MEMORY"));
    assert!(etcd_volume_of(update)?.persistent_volume_claim.is_some(), "expected etcd volume to move to a claim");

    let mut disk = fixtures::PassInputs::new("3.5.0")?;
    disk.cluster.workers[1].disk = Some(40.0);
    let patch = compute_patch(&current, &desired(&disk.ctx())?);
    let updated: Vec<&str> = patch.update.iter().map(name_of).collect();
    assert!(updated == vec!["worker-w9p3d"], "expected only the resized worker to be updated, got {:?}", updated);
    Ok(())
}

#[test]
fn server_defaulted_volumes_do_not_trigger_update() -> Result<()> {
    let inputs = fixtures::PassInputs::new("3.5.0")?;
    let desired = desired(&inputs.ctx())?;
    let mut current = desired.clone();
    for deployment in current.iter_mut() {
        let pod = deployment.spec.as_mut().and_then(|spec| spec.template.spec.as_mut());
        for volume in pod.and_then(|pod| pod.volumes.as_mut()).into_iter().flatten() {
            if let Some(host_path) = volume.host_path.as_mut() {
                host_path.type_ = Some("".into());
            }
        }
        deployment.metadata.resource_version = Some("7".into());
    }
    let patch = compute_patch(&current, &desired);
    assert!(patch.is_noop(), "expected defaulted volumes to compare equal, got {:?}", patch);
    Ok(())
}
