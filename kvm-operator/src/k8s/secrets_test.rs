use anyhow::{bail, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use maplit::btreemap;

use super::*;

fn cert_secret(name: &str, component: Option<&str>, data: Vec<(&str, Vec<u8>)>) -> Secret {
    let mut labels = btreemap! { LABEL_CERT_CLUSTER.to_string() => "al9qy".to_string() };
    if let Some(component) = component {
        labels.insert(LABEL_CERT_COMPONENT.into(), component.into());
    }
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(data.into_iter().map(|(k, v)| (k.to_string(), ByteString(v))).collect()),
        ..Default::default()
    }
}

fn tls_data() -> Vec<(&'static str, Vec<u8>)> {
    vec![("ca", b"ca-pem".to_vec()), ("crt", b"crt-pem".to_vec()), ("key", b"key-pem".to_vec())]
}

#[test]
fn cert_bundle_is_keyed_by_component_label() -> Result<()> {
    let secrets = vec![
        cert_secret("al9qy-api", Some("api"), tls_data()),
        cert_secret("al9qy-worker", Some("worker"), tls_data()),
        cert_secret("al9qy-other", None, vec![]),
    ];
    let bundle = cert_bundle(&secrets)?;
    let components: Vec<&str> = bundle.components.keys().map(String::as_str).collect();
    assert!(components == vec!["api", "worker"], "unexpected components {:?}", components);
    let api = &bundle.components["api"];
    assert!(api.ca == "ca-pem" && api.crt == "crt-pem" && api.key == "key-pem", "unexpected assets {:?}", api);
    Ok(())
}

#[test]
fn missing_secret_key_is_not_found() -> Result<()> {
    let secret = cert_secret("al9qy-api", Some("api"), vec![("ca", b"ca-pem".to_vec())]);
    match tls_assets(&secret) {
        Err(ReconcileError::NotFound { kind, name }) => {
            assert!(kind == "secret key", "unexpected kind {}", kind);
            assert!(name == "al9qy-api/crt", "unexpected name {}", name);
        }
        other => bail!("expected missing secret key, got {:?}", other),
    }
    Ok(())
}

#[test]
fn non_utf8_secret_data_is_wrong_type() -> Result<()> {
    let secret = cert_secret("al9qy-random-keys", None, vec![(KEY_ENCRYPTION, vec![0xff, 0xfe, 0x00])]);
    match random_keys(&secret) {
        Err(ReconcileError::WrongType(msg)) => assert!(msg.contains("al9qy-random-keys/encryption"), "unexpected message {}", msg),
        other => bail!("expected wrong type error, got {:?}", other),
    }

    let secret = cert_secret("al9qy-random-keys", None, vec![(KEY_ENCRYPTION, b"c2VjcmV0".to_vec())]);
    let keys = random_keys(&secret)?;
    assert!(keys.api_server_encryption_key == "c2VjcmV0", "unexpected key {}", keys.api_server_encryption_key);
    assert!(random_keys_secret_name("al9qy") == "al9qy-random-keys");
    Ok(())
}
