//! Typed K8s API calls shared by all reconciled kinds.
//!
//! Every call is bounded by `API_TIMEOUT`. Absence is not an error: fetches yield `None` and
//! deletes of absent objects succeed.

use std::fmt::Debug;
use std::time::Duration;

use anyhow::Context;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::time::timeout;

use crate::k8s::Controller;
use kvm_core::crd::{KVMConfig, KVMConfigStatus, RequiredMetadata};
use kvm_core::{ReconcileError, CLUSTER_FINALIZER};

/// The default timeout to use for API calls.
const API_TIMEOUT: Duration = Duration::from_secs(5);

/// The bounds shared by all objects read & written through the K8s API.
pub(super) trait ApiObject: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static {}

impl<K> ApiObject for K where K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static {}

//////////////////////////////////////////////////////////////////////////////
// K8s API Methods ///////////////////////////////////////////////////////////
impl Controller {
    /// Build an API handle for the given namespace, or for the whole cluster when `None`.
    fn api<K: ApiObject>(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    /// Fetch the named object, yielding `None` when it does not exist.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(super) async fn get_object<K: ApiObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, ReconcileError> {
        let api: Api<K> = self.api(namespace);
        let res = timeout(API_TIMEOUT, api.get(name))
            .await
            .with_context(|| format!("timeout while fetching {} {}", K::kind(&()), name))?;
        match res {
            Ok(obj) => Ok(Some(obj)),
            Err(err) => match err {
                kube::Error::Api(api_err) if api_err.code == http::StatusCode::NOT_FOUND => Ok(None),
                _ => Err(err)
                    .with_context(|| format!("error fetching {} {}", K::kind(&()), name))
                    .map_err(ReconcileError::from),
            },
        }
    }

    /// List the objects of the given namespace matching the given label selector.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(super) async fn list_objects<K: ApiObject>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>, ReconcileError> {
        let api: Api<K> = self.api(Some(namespace));
        let params = ListParams {
            label_selector: Some(label_selector.into()),
            ..Default::default()
        };
        let list = timeout(API_TIMEOUT, api.list(&params))
            .await
            .with_context(|| format!("timeout while listing {} objects", K::kind(&())))?
            .with_context(|| format!("error listing {} objects", K::kind(&())))?;
        Ok(list.items)
    }

    /// Create the given object in K8s.
    #[tracing::instrument(level = "debug", skip(self, obj))]
    pub(super) async fn create_object<K: ApiObject>(&self, obj: &K) -> Result<(), ReconcileError> {
        let name = obj.meta().name.as_deref().unwrap_or_default();
        tracing::info!(kind = %K::kind(&()), %name, "creating object");
        let api: Api<K> = self.api(obj.meta().namespace.as_deref());
        timeout(API_TIMEOUT, api.create(&PostParams::default(), obj))
            .await
            .with_context(|| format!("timeout while creating {} {}", K::kind(&()), name))?
            .with_context(|| format!("error creating {} {}", K::kind(&()), name))?;
        Ok(())
    }

    /// Replace the given object in K8s.
    ///
    /// The object must carry the resource version of the live object it replaces.
    #[tracing::instrument(level = "debug", skip(self, obj))]
    pub(super) async fn replace_object<K: ApiObject>(&self, obj: &K) -> Result<(), ReconcileError> {
        let name = obj.meta().name.as_deref().unwrap_or_default();
        tracing::info!(kind = %K::kind(&()), %name, "updating object");
        let api: Api<K> = self.api(obj.meta().namespace.as_deref());
        timeout(API_TIMEOUT, api.replace(name, &PostParams::default(), obj))
            .await
            .with_context(|| format!("timeout while updating {} {}", K::kind(&()), name))?
            .with_context(|| format!("error updating {} {}", K::kind(&()), name))?;
        Ok(())
    }

    /// Delete the given object from K8s.
    #[tracing::instrument(level = "debug", skip(self, obj))]
    pub(super) async fn delete_object<K: ApiObject>(&self, obj: &K) -> Result<(), ReconcileError> {
        let name = obj.meta().name.as_deref().unwrap_or_default();
        tracing::info!(kind = %K::kind(&()), %name, "deleting object");
        let api: Api<K> = self.api(obj.meta().namespace.as_deref());
        let res = timeout(API_TIMEOUT, api.delete(name, &DeleteParams::default()))
            .await
            .with_context(|| format!("timeout while deleting {} {}", K::kind(&()), name))?;
        match res {
            Ok(_val) => Ok(()),
            Err(err) => match err {
                kube::Error::Api(api_err) if api_err.code == http::StatusCode::NOT_FOUND => Ok(()),
                _ => Err(err)
                    .with_context(|| format!("error deleting {} {}", K::kind(&()), name))
                    .map_err(ReconcileError::from),
            },
        }
    }

    /// Fetch the named cluster object from the watched namespace.
    pub(super) async fn fetch_cluster(&self, name: &str) -> Result<Option<KVMConfig>, ReconcileError> {
        self.get_object(Some(&self.config.namespace), name).await
    }

    /// Write the given status onto the cluster object, unless it is already current.
    #[tracing::instrument(level = "debug", skip(self, cluster, status))]
    pub(super) async fn update_cluster_status(&self, cluster: &KVMConfig, status: KVMConfigStatus) -> Result<(), ReconcileError> {
        if cluster.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let api: Api<KVMConfig> = self.api(Some(cluster.namespace()));
        let patch = json!({ "status": status });
        timeout(API_TIMEOUT, api.patch_status(cluster.name(), &PatchParams::default(), &Patch::Merge(&patch)))
            .await
            .context("timeout while updating cluster status")?
            .context("error updating cluster status")?;
        Ok(())
    }

    /// Ensure the cluster finalizer is present on the cluster object.
    #[tracing::instrument(level = "debug", skip(self, cluster))]
    pub(super) async fn ensure_finalizer(&self, cluster: &KVMConfig) -> Result<(), ReconcileError> {
        let mut finalizers = cluster.metadata.finalizers.clone().unwrap_or_default();
        if finalizers.iter().any(|f| f == CLUSTER_FINALIZER) {
            return Ok(());
        }
        tracing::info!(cluster = cluster.name(), "adding cluster finalizer");
        finalizers.push(CLUSTER_FINALIZER.into());
        self.patch_finalizers(cluster, finalizers).await
    }

    /// Remove the cluster finalizer from the cluster object, releasing it for deletion.
    #[tracing::instrument(level = "debug", skip(self, cluster))]
    pub(super) async fn remove_finalizer(&self, cluster: &KVMConfig) -> Result<(), ReconcileError> {
        let finalizers = cluster.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == CLUSTER_FINALIZER) {
            return Ok(());
        }
        tracing::info!(cluster = cluster.name(), "removing cluster finalizer");
        let finalizers = finalizers.into_iter().filter(|f| f != CLUSTER_FINALIZER).collect();
        self.patch_finalizers(cluster, finalizers).await
    }

    /// Set the finalizers of the cluster object.
    ///
    /// The resource version of the given object guards against overwriting concurrent changes.
    async fn patch_finalizers(&self, cluster: &KVMConfig, finalizers: Vec<String>) -> Result<(), ReconcileError> {
        let api: Api<KVMConfig> = self.api(Some(cluster.namespace()));
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": cluster.metadata.resource_version,
            }
        });
        let res = timeout(API_TIMEOUT, api.patch(cluster.name(), &PatchParams::default(), &Patch::Merge(&patch)))
            .await
            .context("timeout while updating cluster finalizers")?;
        match res {
            Ok(_val) => Ok(()),
            Err(err) => match err {
                kube::Error::Api(api_err) if api_err.code == http::StatusCode::NOT_FOUND => Ok(()),
                _ => Err(err).context("error updating cluster finalizers").map_err(ReconcileError::from),
            },
        }
    }
}
