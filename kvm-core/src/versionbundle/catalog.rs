//! The catalog of released version bundles.
//!
//! NOTE WELL: released bundles must never be modified, as clusters pinned to them rely on their
//! behavior staying stable. Append a new bundle instead.

use super::{Behavior, Changelog, ChangelogKind, Component, Registry, VersionBundle, VolumeFilesystem};
use crate::error::ReconcileError;

/// The name shared by all bundles of this operator.
pub const BUNDLE_NAME: &str = "kvm-operator";

/// Build the registry of all released bundles.
pub fn catalog() -> Result<Registry, ReconcileError> {
    Registry::new(vec![v3_0_0(), v3_0_1(), v3_1_0(), v3_5_0()])
}

fn changelog(component: &str, description: &str, kind: ChangelogKind) -> Changelog {
    Changelog {
        component: component.into(),
        description: description.into(),
        kind,
    }
}

fn components(pins: &[(&str, &str)]) -> Vec<Component> {
    pins.iter()
        .map(|(name, version)| Component {
            name: (*name).into(),
            version: (*version).into(),
        })
        .collect()
}

fn v3_0_0() -> VersionBundle {
    VersionBundle {
        name: BUNDLE_NAME.into(),
        version: "3.0.0".into(),
        changelogs: vec![
            changelog("kubernetes", "Updated Kubernetes to 1.11.1.", ChangelogKind::Changed),
            changelog("cloudconfig", "Add a dedicated kube-proxy configuration file to masters.", ChangelogKind::Added),
            changelog("kvm-operator", "Reconcile cluster resources through version bundles.", ChangelogKind::Added),
        ],
        components: components(&[
            ("calico", "3.1.3"),
            ("containerlinux", "1745.7.0"),
            ("docker", "18.03.1"),
            ("etcd", "3.3.8"),
            ("kubernetes", "1.11.1"),
        ]),
        behavior: Behavior {
            etcd_ingress: false,
            kube_proxy_config_file: true,
            restart_unit: true,
            volume_filesystem: VolumeFilesystem::Ext4,
        },
    }
}

fn v3_0_1() -> VersionBundle {
    VersionBundle {
        name: BUNDLE_NAME.into(),
        version: "3.0.1".into(),
        changelogs: vec![changelog(
            "kvm-operator",
            "Expose the guest cluster etcd through an ingress with SSL passthrough.",
            ChangelogKind::Added,
        )],
        components: components(&[
            ("calico", "3.1.3"),
            ("containerlinux", "1745.7.0"),
            ("docker", "18.03.1"),
            ("etcd", "3.3.8"),
            ("kubernetes", "1.11.1"),
        ]),
        behavior: Behavior {
            etcd_ingress: true,
            kube_proxy_config_file: true,
            restart_unit: true,
            volume_filesystem: VolumeFilesystem::Ext4,
        },
    }
}

fn v3_1_0() -> VersionBundle {
    VersionBundle {
        name: BUNDLE_NAME.into(),
        version: "3.1.0".into(),
        changelogs: vec![
            changelog(
                "kubernetes",
                "Updated Kubernetes to 1.12.2. More info here: https://github.com/kubernetes/kubernetes/blob/master/CHANGELOG-1.12.md",
                ChangelogKind::Changed,
            ),
            changelog(
                "calico",
                "Updated to 3.2.3. Also the manifest has proper resource limits and priority class to get QoS policy guaranteed.",
                ChangelogKind::Changed,
            ),
            changelog("kvm-operator", "Adapted limit calculation for very big kvm pods.", ChangelogKind::Changed),
            changelog(
                "kubernetes",
                "Enabled admission plugins: DefaultTolerationSeconds, MutatingAdmissionWebhook, ValidatingAdmissionWebhook.",
                ChangelogKind::Changed,
            ),
            changelog("container-linux", "Updated to latest stable 1855.5.0", ChangelogKind::Changed),
            changelog("etcd", "Updated to 3.3.9", ChangelogKind::Changed),
            changelog("docker", "Updated to 18.06.1", ChangelogKind::Changed),
            changelog(
                "kube-proxy",
                "Several configuration fixes and it now gets installed and upgraded before Calico.",
                ChangelogKind::Changed,
            ),
        ],
        components: components(&[
            ("calico", "3.2.3"),
            ("containerlinux", "1855.5.0"),
            ("docker", "18.06.1"),
            ("etcd", "3.3.9"),
            ("kubernetes", "1.12.2"),
        ]),
        behavior: Behavior {
            etcd_ingress: true,
            kube_proxy_config_file: true,
            restart_unit: true,
            volume_filesystem: VolumeFilesystem::Ext4,
        },
    }
}

fn v3_5_0() -> VersionBundle {
    VersionBundle {
        name: BUNDLE_NAME.into(),
        version: "3.5.0".into(),
        changelogs: vec![
            changelog("calico", "Update calico to 3.6.1.", ChangelogKind::Changed),
            changelog("cloudconfig", "Pin calico-kube-controllers to master.", ChangelogKind::Changed),
            changelog("cloudconfig", "Remove the calico and kube-proxy restart unit from masters.", ChangelogKind::Removed),
            changelog("containerlinux", "Update to 2023.5.0.", ChangelogKind::Changed),
            changelog(
                "kubernetes",
                "Update kubernetes to 1.14.1. More info here: https://github.com/kubernetes/kubernetes/blob/master/CHANGELOG-1.14.md",
                ChangelogKind::Changed,
            ),
            changelog("kubernetes", "Tolerate all taints for calico and kube-proxy daemon sets.", ChangelogKind::Fixed),
            changelog("kvm-operator", "Use XFS for docker and kubelet volumes.", ChangelogKind::Fixed),
        ],
        components: components(&[
            ("calico", "3.6.1"),
            ("containerlinux", "2023.5.0"),
            ("docker", "18.06.1"),
            ("etcd", "3.3.12"),
            ("kubernetes", "1.14.1"),
        ]),
        behavior: Behavior {
            etcd_ingress: true,
            kube_proxy_config_file: true,
            restart_unit: false,
            volume_filesystem: VolumeFilesystem::Xfs,
        },
    }
}
