//! File, unit & verbatim assets embedded into node configuration.

use serde::Serialize;

use super::NodeConfigParams;
use kvm_core::versionbundle::VersionBundle;

/// The owner of all file assets.
const FILE_OWNER: &str = "root:root";
/// The directory holding TLS assets on the VMs.
const SSL_DIR: &str = "/etc/kubernetes/ssl";

/// A file written to the VM on boot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileAsset {
    pub path: String,
    pub owner: String,
    /// Octal permissions, e.g. `0644`.
    pub permissions: String,
    /// Base64 encoded file content.
    pub content: String,
}

/// A systemd unit of the VM.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnitAsset {
    pub name: String,
    pub enable: bool,
    pub command: Option<String>,
    pub content: Option<String>,
}

/// A section copied verbatim into the document.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VerbatimSection {
    pub name: String,
    pub content: String,
}

impl FileAsset {
    fn new(path: impl Into<String>, permissions: u32, content: &str) -> Self {
        Self {
            path: path.into(),
            owner: FILE_OWNER.into(),
            permissions: format!("{:04o}", permissions),
            content: base64::encode(content),
        }
    }
}

impl UnitAsset {
    fn new(name: &str, enable: bool, command: Option<&str>, content: Option<String>) -> Self {
        Self {
            name: name.into(),
            enable,
            command: command.map(String::from),
            content: content.map(|c| c.trim_end().to_string()),
        }
    }
}

/// The TLS file assets of the components required by the role being rendered.
fn cert_files(params: &NodeConfigParams<'_>) -> Vec<FileAsset> {
    let mut files = vec![];
    for component in params.required_cert_components() {
        let tls = match params.secrets.certs.components.get(*component) {
            Some(tls) => tls,
            None => continue, // Rejected by validation.
        };
        files.push(FileAsset::new(format!("{}/{}-ca.pem", SSL_DIR, component), 0o644, &tls.ca));
        files.push(FileAsset::new(format!("{}/{}-crt.pem", SSL_DIR, component), 0o644, &tls.crt));
        files.push(FileAsset::new(format!("{}/{}-key.pem", SSL_DIR, component), 0o600, &tls.key));
    }
    files
}

/// The SSO trusted CA file asset, if a key is configured.
fn sso_file(params: &NodeConfigParams<'_>) -> Option<FileAsset> {
    if params.settings.sso_public_key.is_empty() {
        return None;
    }
    Some(FileAsset::new("/etc/ssh/trusted-user-ca-keys.pem", 0o644, &params.settings.sso_public_key))
}

pub(super) fn master_files(params: &NodeConfigParams<'_>) -> Vec<FileAsset> {
    let mut files = cert_files(params);
    files.push(FileAsset::new(
        "/etc/kubernetes/encryption/k8s-encryption-config.yaml",
        0o600,
        &format!(
            r#"kind: EncryptionConfig
apiVersion: v1
resources:
  - resources:
    - secrets
    providers:
    - aescbc:
        keys:
        - name: key1
          secret: {}
    - identity: {{}}
"#,
            params.secrets.keys.api_server_encryption_key
        ),
    ));
    if params.bundle.behavior.kube_proxy_config_file {
        files.push(FileAsset::new(
            "/etc/kubernetes/config/proxy-config.yml",
            0o644,
            r#"apiVersion: kubeproxy.config.k8s.io/v1alpha1
clientConnection:
  kubeconfig: /etc/kubernetes/config/proxy-kubeconfig.yml
kind: KubeProxyConfiguration
mode: iptables
resourceContainer: /kube-proxy
"#,
        ));
    }
    files.extend(sso_file(params));
    files
}

pub(super) fn worker_files(params: &NodeConfigParams<'_>) -> Vec<FileAsset> {
    let mut files = cert_files(params);
    files.extend(sso_file(params));
    files
}

/// Units formatting & mounting the docker and kubelet volumes with the bundle's filesystem.
fn volume_units(bundle: &VersionBundle) -> Vec<UnitAsset> {
    let fs = bundle.behavior.volume_filesystem.as_str();
    [("docker", "/var/lib/docker", "dockerfs"), ("kubelet", "/var/lib/kubelet", "kubeletfs")]
        .iter()
        .map(|(name, path, tag)| {
            UnitAsset::new(
                &format!("var-lib-{}.mount", name),
                true,
                Some("start"),
                Some(format!(
                    r#"[Unit]
Description=Mount for {name} volume
Before={name}.service
[Mount]
What=/dev/disk/by-label/{tag}
Where={path}
Type={fs}
[Install]
WantedBy=multi-user.target
"#,
                    name = name,
                    tag = tag,
                    path = path,
                    fs = fs,
                )),
            )
        })
        .collect()
}

/// Units shared by masters & workers.
fn common_units(bundle: &VersionBundle) -> Vec<UnitAsset> {
    let mut units = volume_units(bundle);
    units.push(UnitAsset::new("iscsid.service", true, Some("start"), None));
    units.push(UnitAsset::new("multipathd.service", true, Some("start"), None));
    units
}

pub(super) fn master_units(bundle: &VersionBundle) -> Vec<UnitAsset> {
    let mut units = vec![
        // Mount the etcd volume when the directory is first accessed.
        UnitAsset::new(
            "var-lib-etcd.automount",
            true,
            Some("start"),
            Some(
                r#"[Unit]
Description=Automount for etcd volume
[Automount]
Where=/var/lib/etcd
[Install]
WantedBy=multi-user.target
"#
                .into(),
            ),
        ),
        UnitAsset::new(
            "var-lib-etcd.mount",
            false,
            None,
            Some(
                r#"[Unit]
Description=Mount for etcd volume
[Mount]
What=etcdshare
Where=/var/lib/etcd
Options=trans=virtio,version=9p2000.L,cache=mmap
Type=9p
[Install]
WantedBy=multi-user.target
"#
                .into(),
            ),
        ),
    ];
    units.extend(common_units(bundle));
    if bundle.behavior.restart_unit {
        units.push(UnitAsset::new(
            "k8s-restart-networking.service",
            true,
            Some("start"),
            Some(
                r#"[Unit]
Description=Restart calico-node and kube-proxy once the API is healthy after a master restart
Requires=k8s-kubelet.service
After=k8s-kubelet.service

[Service]
Type=oneshot
Environment="KUBECONFIG=/etc/kubernetes/config/addons-kubeconfig.yml"
ExecStart=/bin/sh -c 'until /opt/bin/kubectl get cs | grep -q Healthy; do sleep 1; done'
ExecStart=/opt/bin/kubectl -n kube-system delete pod -l k8s-app=calico-node
ExecStart=/opt/bin/kubectl -n kube-system delete pod -l k8s-app=kube-proxy

[Install]
WantedBy=multi-user.target
"#
                .into(),
            ),
        ));
    }
    units
}

pub(super) fn worker_units(bundle: &VersionBundle) -> Vec<UnitAsset> {
    common_units(bundle)
}

pub(super) fn verbatim_sections(params: &NodeConfigParams<'_>) -> Vec<VerbatimSection> {
    vec![VerbatimSection {
        name: "etc-hosts".into(),
        content: format!("manage_etc_hosts: localhost\nfqdn: {}-{}.{}", params.role, params.node.1.id, params.cluster.cluster_id),
    }]
}
