//! Version bundles.
//!
//! A version bundle is an immutable snapshot of the component versions and the reconciliation
//! behavior of a release. Every cluster is pinned to a bundle by version string, which allows
//! clusters created with an older release to keep reconciling with unchanged behavior while new
//! or explicitly upgraded clusters use newer bundles.
//!
//! Behavior differences between bundles are expressed as data in [`Behavior`], never as
//! duplicated reconciler code. New behavior is introduced by appending a bundle to the catalog;
//! existing bundles are never modified.

mod catalog;
#[cfg(test)]
mod mod_test;

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

pub use catalog::catalog;

/// The kind of a changelog entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangelogKind {
    Added,
    Changed,
    Deprecated,
    Removed,
    Fixed,
}

/// A single changelog entry of a bundle.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Changelog {
    pub component: String,
    pub description: String,
    pub kind: ChangelogKind,
}

/// A component version pinned by a bundle.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Component {
    pub name: String,
    pub version: String,
}

/// The filesystem used for docker & kubelet volumes of the VMs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeFilesystem {
    Ext4,
    Xfs,
}

impl VolumeFilesystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
        }
    }
}

/// The reconciliation behavior selected by a bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Behavior {
    /// Reconcile an ingress exposing the guest cluster's etcd.
    pub etcd_ingress: bool,
    /// Ship a dedicated kube-proxy config file to masters.
    pub kube_proxy_config_file: bool,
    /// Ship the unit restarting calico & kube-proxy after a master restart.
    pub restart_unit: bool,
    /// The filesystem used for docker & kubelet volumes.
    pub volume_filesystem: VolumeFilesystem,
}

/// An immutable, versioned snapshot of component versions and reconciliation behavior.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct VersionBundle {
    pub name: String,
    pub version: String,
    pub changelogs: Vec<Changelog>,
    pub components: Vec<Component>,
    pub behavior: Behavior,
}

impl VersionBundle {
    /// The version of the given component pinned by this bundle, if any.
    pub fn component(&self, name: &str) -> Option<&str> {
        self.components.iter().find(|c| c.name == name).map(|c| c.version.as_str())
    }

    /// The version of the given component, else an error as the bundle is unusable without it.
    pub fn require_component(&self, name: &str) -> Result<&str, ReconcileError> {
        self.component(name).ok_or_else(|| {
            ReconcileError::invalid(format!("version bundle {} does not pin a version of component {:?}", self.version, name))
        })
    }
}

/// An append-only catalog of version bundles, ordered by version.
#[derive(Clone, Debug)]
pub struct Registry {
    bundles: Vec<VersionBundle>,
}

impl Registry {
    /// Create a new registry from the given bundles.
    ///
    /// Bundles must be given in strictly increasing semver order, each must parse as semver, and
    /// all must share the same name.
    pub fn new(bundles: Vec<VersionBundle>) -> Result<Self, ReconcileError> {
        let mut last: Option<semver::Version> = None;
        for bundle in bundles.iter() {
            if bundles.first().map(|first| first.name != bundle.name).unwrap_or(false) {
                return Err(ReconcileError::invalid(format!("version bundle {} has a foreign name {:?}", bundle.version, bundle.name)));
            }
            let version = semver::Version::parse(&bundle.version)
                .map_err(|err| ReconcileError::invalid(format!("version bundle version {:?} is not semver: {}", bundle.version, err)))?;
            if let Some(last) = last.as_ref() {
                if &version <= last {
                    return Err(ReconcileError::invalid(format!(
                        "version bundle {} must be newer than its predecessor {}",
                        version, last
                    )));
                }
            }
            last = Some(version);
        }
        Ok(Self { bundles })
    }

    /// Lookup the bundle registered under the exact given version.
    ///
    /// Unknown versions are a configuration error. There is deliberately no fallback to the latest
    /// bundle, as that would silently change the behavior of the cluster.
    pub fn lookup(&self, version: &str) -> Result<&VersionBundle, ReconcileError> {
        self.bundles.iter().find(|b| b.version == version).ok_or_else(|| {
            ReconcileError::invalid(format!("spec.versionBundleVersion {:?} does not match any registered version bundle", version))
        })
    }

    /// The newest registered bundle.
    pub fn latest(&self) -> Option<&VersionBundle> {
        self.bundles.last()
    }

    /// Iterate over all registered bundles, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &VersionBundle> {
        self.bundles.iter()
    }
}
