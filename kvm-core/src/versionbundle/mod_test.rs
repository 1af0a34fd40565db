use anyhow::{bail, Result};

use super::*;

#[test]
fn catalog_builds_and_is_ordered() -> Result<()> {
    let registry = catalog()?;
    let versions: Vec<&str> = registry.iter().map(|b| b.version.as_str()).collect();
    assert!(versions == vec!["3.0.0", "3.0.1", "3.1.0", "3.5.0"], "unexpected catalog versions {:?}", versions);
    let latest = registry.latest().map(|b| b.version.as_str());
    assert!(latest == Some("3.5.0"), "unexpected latest bundle {:?}", latest);
    Ok(())
}

#[test]
fn catalog_bundles_pin_required_components() -> Result<()> {
    let registry = catalog()?;
    for bundle in registry.iter() {
        bundle.require_component("kubernetes")?;
        bundle.require_component("etcd")?;
        assert!(!bundle.changelogs.is_empty(), "bundle {} must carry a changelog", bundle.version);
    }
    Ok(())
}

#[test]
fn lookup_returns_exact_match() -> Result<()> {
    let registry = catalog()?;
    let bundle = registry.lookup("3.1.0")?;
    assert!(bundle.component("kubernetes") == Some("1.12.2"), "unexpected kubernetes pin {:?}", bundle.component("kubernetes"));
    assert!(bundle.behavior.volume_filesystem == VolumeFilesystem::Ext4);
    Ok(())
}

#[test]
fn lookup_of_unknown_version_fails_without_fallback() -> Result<()> {
    let registry = catalog()?;
    for version in ["9.9.9", "3.5", "", "3.5.0 "] {
        match registry.lookup(version) {
            Err(ReconcileError::InvalidConfiguration(msg)) => {
                assert!(msg.contains("spec.versionBundleVersion"), "expected message to name the field, got {}", msg)
            }
            other => bail!("expected invalid configuration for {:?}, got {:?}", version, other),
        }
    }
    Ok(())
}

#[test]
fn registry_rejects_out_of_order_bundles() -> Result<()> {
    let registry = catalog()?;
    let mut bundles: Vec<VersionBundle> = registry.iter().cloned().collect();
    bundles.swap(0, 1);
    assert!(Registry::new(bundles).is_err(), "expected out of order bundles to be rejected");

    let mut bundles: Vec<VersionBundle> = registry.iter().cloned().collect();
    let dup = bundles[0].clone();
    bundles.push(dup);
    assert!(Registry::new(bundles).is_err(), "expected duplicate bundles to be rejected");
    Ok(())
}

#[test]
fn registry_rejects_non_semver_versions() -> Result<()> {
    let registry = catalog()?;
    let mut bundle = registry.iter().next().cloned().expect("catalog is not empty");
    bundle.version = "v3".into();
    assert!(Registry::new(vec![bundle]).is_err(), "expected non-semver version to be rejected");
    Ok(())
}
