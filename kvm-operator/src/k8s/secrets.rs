//! Loading of cluster certificates & random keys from K8s Secrets.
//!
//! Certificates are issued out of band into the operator namespace; one Secret per component,
//! labeled with the cluster & component it belongs to. Random keys live in a single Secret named
//! after the cluster.

#[cfg(test)]
#[path = "secrets_test.rs"]
mod secrets_test;

use k8s_openapi::api::core::v1::Secret;

use crate::cloudconfig::{CertBundle, NodeSecrets, RandomKeys, TlsAssets};
use crate::k8s::Controller;
use kvm_core::ReconcileError;

/// The label naming the cluster of a certificate Secret.
pub const LABEL_CERT_CLUSTER: &str = "giantswarm.io/cluster";
/// The label naming the component of a certificate Secret.
pub const LABEL_CERT_COMPONENT: &str = "giantswarm.io/certificate";
/// The key of the API server encryption key in the random keys Secret.
const KEY_ENCRYPTION: &str = "encryption";

impl Controller {
    /// Load the certificates & random keys of the given cluster.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(super) async fn load_node_secrets(&self, cluster_id: &str) -> Result<NodeSecrets, ReconcileError> {
        let selector = format!("{}={},{}", LABEL_CERT_CLUSTER, cluster_id, LABEL_CERT_COMPONENT);
        let cert_secrets: Vec<Secret> = self.list_objects(&self.config.namespace, &selector).await?;
        let certs = cert_bundle(&cert_secrets)?;

        let name = random_keys_secret_name(cluster_id);
        let keys_secret: Secret = match self.get_object(Some(&self.config.namespace), &name).await? {
            Some(secret) => secret,
            None => return Err(ReconcileError::NotFound { kind: "secret", name }),
        };
        let keys = random_keys(&keys_secret)?;
        Ok(NodeSecrets { certs, keys })
    }
}

/// The name of the Secret holding the random keys of the given cluster.
pub fn random_keys_secret_name(cluster_id: &str) -> String {
    format!("{}-random-keys", cluster_id)
}

/// Build the certificate bundle of a cluster from its certificate Secrets.
///
/// Missing components are not detected here, the renderer checks the components each role needs.
pub fn cert_bundle(secrets: &[Secret]) -> Result<CertBundle, ReconcileError> {
    let mut bundle = CertBundle::default();
    for secret in secrets {
        let component = match secret.metadata.labels.as_ref().and_then(|labels| labels.get(LABEL_CERT_COMPONENT)) {
            Some(component) => component,
            None => continue,
        };
        bundle.components.insert(component.clone(), tls_assets(secret)?);
    }
    Ok(bundle)
}

/// Read the TLS assets of a certificate Secret.
pub fn tls_assets(secret: &Secret) -> Result<TlsAssets, ReconcileError> {
    Ok(TlsAssets {
        ca: secret_value(secret, "ca")?,
        crt: secret_value(secret, "crt")?,
        key: secret_value(secret, "key")?,
    })
}

/// Read the random keys of a cluster from its random keys Secret.
pub fn random_keys(secret: &Secret) -> Result<RandomKeys, ReconcileError> {
    Ok(RandomKeys {
        api_server_encryption_key: secret_value(secret, KEY_ENCRYPTION)?,
    })
}

/// Read the given key of a Secret as UTF-8 text.
fn secret_value(secret: &Secret, key: &str) -> Result<String, ReconcileError> {
    let secret_name = secret.metadata.name.as_deref().unwrap_or_default();
    let bytes = match secret.data.as_ref().and_then(|data| data.get(key)) {
        Some(bytes) => bytes,
        None => {
            return Err(ReconcileError::NotFound {
                kind: "secret key",
                name: format!("{}/{}", secret_name, key),
            })
        }
    };
    String::from_utf8(bytes.0.clone()).map_err(|_| ReconcileError::WrongType(format!("secret {}/{} must hold UTF-8 text", secret_name, key)))
}
