use anyhow::Result;

use super::*;
use crate::fixtures;
use crate::reconcile::{compute_patch, name_of};

#[test]
fn desired_services_expose_role_ports() -> Result<()> {
    let inputs = fixtures::PassInputs::new("3.5.0")?;
    let services = desired(&inputs.ctx())?;

    let summary: Vec<(String, Vec<(Option<String>, i32)>)> = services
        .iter()
        .map(|svc| {
            let ports = svc.spec.as_ref().and_then(|spec| spec.ports.clone()).unwrap_or_default();
            (name_of(svc).to_string(), ports.into_iter().map(|p| (p.name, p.port)).collect())
        })
        .collect();
    let expected = vec![
        ("master".to_string(), vec![(Some("etcd".to_string()), 2379), (Some("api".to_string()), 443)]),
        ("worker".to_string(), vec![(Some("http".to_string()), 30010), (Some("https".to_string()), 30011)]),
    ];
    assert!(summary == expected, "unexpected services, got {:?}, expected {:?}", summary, expected);
    for svc in services.iter() {
        let selector = svc.spec.as_ref().and_then(|spec| spec.selector.as_ref());
        assert!(selector.is_none(), "expected selector-less service, got {:?}", selector);
    }
    Ok(())
}

#[test]
fn services_are_idempotent_and_deleted_with_the_cluster() -> Result<()> {
    let mut inputs = fixtures::PassInputs::new("3.5.0")?;
    let services = desired(&inputs.ctx())?;
    assert!(compute_patch(&services, &services).is_noop(), "expected noop on converged services");

    inputs.deleted = true;
    let patch = compute_patch(&services, &desired(&inputs.ctx())?);
    assert!(patch.delete.len() == 2 && patch.create.is_empty() && patch.update.is_empty(), "expected only deletes, got {:?}", patch);
    Ok(())
}
