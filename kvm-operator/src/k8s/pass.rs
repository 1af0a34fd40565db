//! Reconciliation passes.
//!
//! A pass reconciles all kinds of one cluster in order: each kind's current state is fetched,
//! its desired state is computed, and the patch converging the two is applied before moving on
//! to the next kind. A cancelled pass reconciles no further kinds.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Namespace, Pod};

use crate::cloudconfig::NodeSecrets;
use crate::k8s::store::ApiObject;
use crate::k8s::{Controller, RESCHEDULE_TIMEOUT};
use crate::reconcile::{configmap, deployment, endpoints, ingress, key, namespace, service};
use crate::reconcile::{compute_patch, Kind, ManagedObject, Outcome, PassContext, Patch};
use kvm_core::crd::{KVMConfig, KVMConfigStatus, RequiredMetadata};
use kvm_core::ReconcileError;

/// The result of a pass which ran to completion.
type PassOutcome = Outcome<()>;

//////////////////////////////////////////////////////////////////////////////
// Cluster Reconciliation ////////////////////////////////////////////////////
impl Controller {
    /// Run a pass for the named cluster, and act on its outcome.
    #[tracing::instrument(level = "debug", skip(self, name), fields(cluster = %name))]
    pub(super) async fn reconcile_cluster(&mut self, name: Arc<String>) {
        let cluster = match self.fetch_cluster(&name).await {
            Ok(Some(cluster)) => cluster,
            Ok(None) => {
                tracing::debug!("cluster object no longer exists");
                self.clusters.forget(&name);
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "error fetching cluster object");
                self.requeue(name, RESCHEDULE_TIMEOUT);
                return;
            }
        };
        let deleted = cluster.is_deleted();

        match self.run_pass(&cluster).await {
            Ok(Outcome::Proceed(())) => {
                tracing::debug!(deleted, "cluster converged");
                if deleted {
                    self.release_cluster(name, &cluster).await;
                    return;
                }
                let status = KVMConfigStatus {
                    last_version_bundle_version: Some(cluster.spec.version_bundle_version.clone()),
                    message: None,
                };
                if let Err(err) = self.update_cluster_status(&cluster, status).await {
                    tracing::error!(error = %err, "error updating cluster status");
                    self.requeue(name, RESCHEDULE_TIMEOUT);
                    return;
                }
                let interval = self.resync_interval();
                self.requeue(name, interval);
            }
            Ok(Outcome::Cancel { keep_finalizers: true }) => {
                tracing::debug!("pass cancelled, cluster teardown in progress");
                self.requeue(name, RESCHEDULE_TIMEOUT);
            }
            Ok(Outcome::Cancel { keep_finalizers: false }) => {
                tracing::debug!("pass cancelled, cluster teardown complete");
                self.release_cluster(name, &cluster).await;
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(error = %err, "cluster not yet converged");
                if !deleted {
                    let status = KVMConfigStatus {
                        last_version_bundle_version: cluster.status.as_ref().and_then(|status| status.last_version_bundle_version.clone()),
                        message: Some(format!("not yet converged: {}", err)),
                    };
                    if let Err(err) = self.update_cluster_status(&cluster, status).await {
                        tracing::error!(error = %err, "error updating cluster status");
                    }
                }
                self.requeue(name, RESCHEDULE_TIMEOUT);
            }
            Err(err) => {
                // Configuration errors are not retried; a spec change triggers the next pass.
                tracing::error!(error = %err, "cluster configuration must be fixed before reconciliation can proceed");
                let status = KVMConfigStatus {
                    last_version_bundle_version: cluster.status.as_ref().and_then(|status| status.last_version_bundle_version.clone()),
                    message: Some(err.to_string()),
                };
                if let Err(err) = self.update_cluster_status(&cluster, status).await {
                    tracing::error!(error = %err, "error updating cluster status");
                }
            }
        }
    }

    /// Release the cluster object for deletion by removing its finalizer.
    async fn release_cluster(&mut self, name: Arc<String>, cluster: &KVMConfig) {
        if let Err(err) = self.remove_finalizer(cluster).await {
            tracing::error!(error = %err, "error removing cluster finalizer");
            self.requeue(name, RESCHEDULE_TIMEOUT);
        }
    }

    /// Reconcile all kinds of the given cluster in order.
    async fn run_pass(&self, cluster: &KVMConfig) -> Result<PassOutcome, ReconcileError> {
        let bundle = self.registry.lookup(&cluster.spec.version_bundle_version)?;
        let deleted = cluster.is_deleted();
        let secrets = if deleted {
            NodeSecrets::default()
        } else {
            self.ensure_finalizer(cluster).await?;
            self.load_node_secrets(&cluster.spec.cluster_id).await?
        };
        let ctx = PassContext {
            cluster: &cluster.spec,
            bundle,
            secrets: &secrets,
            settings: &self.settings,
            deleted,
        };

        for kind in Kind::order(deleted) {
            tracing::debug!(%kind, "reconciling kind");
            let outcome = match kind {
                Kind::Namespace => self.reconcile_namespace(&ctx).await?,
                Kind::ConfigMap => self.reconcile_list(&ctx, *kind, configmap::desired(&ctx)?).await?,
                Kind::Deployment => self.reconcile_list(&ctx, *kind, deployment::desired(&ctx)?).await?,
                Kind::Service => self.reconcile_list(&ctx, *kind, service::desired(&ctx)?).await?,
                Kind::Endpoints => self.reconcile_endpoints(&ctx).await?,
                Kind::Ingress => self.reconcile_list(&ctx, *kind, ingress::desired(&ctx)?).await?,
            };
            if let Outcome::Cancel { .. } = outcome {
                return Ok(outcome);
            }
        }
        Ok(Outcome::Proceed(()))
    }
}

//////////////////////////////////////////////////////////////////////////////
// Namespace Reconciliation //////////////////////////////////////////////////
impl Controller {
    /// Reconcile the namespace of the cluster, which gates the rest of the pass.
    #[tracing::instrument(level = "debug", skip(self, ctx))]
    async fn reconcile_namespace(&self, ctx: &PassContext<'_>) -> Result<PassOutcome, ReconcileError> {
        let name = key::cluster_namespace(ctx.cluster_id());
        let current: Option<Namespace> = self.get_object(None, &name).await?;
        let pod_count = if namespace::needs_pod_count(current.as_ref(), ctx.deleted) {
            self.list_objects::<Pod>(&name, "").await?.len()
        } else {
            0
        };
        let current = match namespace::lifecycle(current, ctx.deleted, pod_count) {
            Outcome::Proceed(current) => current,
            Outcome::Cancel { keep_finalizers } => {
                tracing::debug!(keep_finalizers, pod_count, "namespace cancelled pass");
                return Ok(Outcome::Cancel { keep_finalizers });
            }
        };
        let patch = compute_patch(current.as_slice(), namespace::desired(ctx).as_slice());
        self.apply_patch(Kind::Namespace, patch).await?;
        Ok(Outcome::Proceed(()))
    }
}

//////////////////////////////////////////////////////////////////////////////
// List Kind Reconciliation //////////////////////////////////////////////////
impl Controller {
    /// Reconcile a kind whose current state is listed by the cluster label.
    #[tracing::instrument(level = "debug", skip(self, ctx, desired))]
    async fn reconcile_list<K>(&self, ctx: &PassContext<'_>, kind: Kind, desired: Vec<K>) -> Result<PassOutcome, ReconcileError>
    where
        K: ApiObject + ManagedObject,
    {
        let selector = format!("{}={}", key::LABEL_CLUSTER, ctx.cluster_id());
        let current: Vec<K> = self.list_objects(&key::cluster_namespace(ctx.cluster_id()), &selector).await?;
        let patch = compute_patch(&current, &desired);
        self.apply_patch(kind, patch).await?;
        Ok(Outcome::Proceed(()))
    }

    /// Apply the given patch of a kind, creates first, then updates, then deletes.
    async fn apply_patch<K: ApiObject>(&self, kind: Kind, patch: Patch<K>) -> Result<(), ReconcileError> {
        if patch.is_noop() {
            tracing::debug!(%kind, "kind already converged");
            return Ok(());
        }
        tracing::debug!(
            %kind,
            create = patch.create.len(),
            update = patch.update.len(),
            delete = patch.delete.len(),
            "applying patch"
        );
        for obj in patch.create.iter() {
            self.create_object(obj).await?;
        }
        for obj in patch.update.iter() {
            self.replace_object(obj).await?;
        }
        for obj in patch.delete.iter() {
            self.delete_object(obj).await?;
        }
        Ok(())
    }
}

//////////////////////////////////////////////////////////////////////////////
// Endpoints Reconciliation //////////////////////////////////////////////////
impl Controller {
    /// Reconcile the endpoints of each role from the IPs published on the VM pods.
    #[tracing::instrument(level = "debug", skip(self, ctx))]
    async fn reconcile_endpoints(&self, ctx: &PassContext<'_>) -> Result<PassOutcome, ReconcileError> {
        let namespace = key::cluster_namespace(ctx.cluster_id());
        let pods: Vec<Pod> = if ctx.deleted {
            vec![]
        } else {
            let selector = format!("{}={}", key::LABEL_CLUSTER, ctx.cluster_id());
            self.list_objects(&namespace, &selector).await?
        };
        for role in endpoints::ROLES {
            let current: Option<Endpoints> = self.get_object(Some(&namespace), role.id()).await?;
            let desired = endpoints::desired(ctx, role, &pods);
            let patch = endpoints::compute_patch(ctx, role, current.as_ref(), &desired);
            self.apply_endpoints_patch(patch).await?;
        }
        Ok(Outcome::Proceed(()))
    }

    /// Apply the patch of one endpoints object.
    ///
    /// A retraction carries the retained object in both the update and the delete slot: it is
    /// written only when addresses remain, and deleted only when none do.
    async fn apply_endpoints_patch(&self, patch: Patch<Endpoints>) -> Result<(), ReconcileError> {
        if patch.is_noop() {
            tracing::debug!(kind = %Kind::Endpoints, "kind already converged");
            return Ok(());
        }
        for obj in patch.create.iter() {
            self.create_object(obj).await?;
        }
        for obj in patch.update.iter().filter(|obj| !endpoints::is_empty(obj)) {
            self.replace_object(obj).await?;
        }
        for obj in patch.delete.iter().filter(|obj| endpoints::is_empty(obj)) {
            self.delete_object(obj).await?;
        }
        Ok(())
    }
}
