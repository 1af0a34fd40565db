#[cfg(test)]
#[path = "data_test.rs"]
mod data_test;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::watcher::Event;
use kube::Resource;

use crate::k8s::{Controller, EventResult, Task};
use kvm_core::crd::{KVMConfig, RequiredMetadata};

/// The last observed state of each known cluster, keyed by object name.
#[derive(Default)]
pub(super) struct ClusterIndex {
    clusters: HashMap<Arc<String>, KVMConfig>,
}

impl ClusterIndex {
    /// Record the given cluster, returning its name when a pass must be scheduled.
    ///
    /// Changes to metadata or status alone, including those made by this controller, do not
    /// call for a pass.
    pub fn observe(&mut self, cluster: KVMConfig) -> Option<Arc<String>> {
        let name_str = cluster.meta().name.as_ref()?; // Not actually possible as K8s requires name.
        let name = match self.clusters.get_key_value(name_str) {
            Some((key, old)) => {
                if old.spec == cluster.spec && old.is_deleted() == cluster.is_deleted() {
                    return None;
                }
                Arc::clone(key) // No additional alloc.
            }
            None => Arc::new(name_str.clone()),
        };
        self.clusters.insert(name.clone(), cluster);
        Some(name)
    }

    /// Forget the named cluster, returning true if it was known.
    pub fn forget(&mut self, name: &str) -> bool {
        self.clusters.remove(&name.to_string()).is_some()
    }

    /// Forget every cluster not among the given live clusters.
    pub fn retain_live(&mut self, live: &[KVMConfig]) {
        let live: HashSet<&str> = live.iter().map(|cluster| cluster.name()).collect();
        self.clusters.retain(|name, _| live.contains(name.as_str()));
    }
}

//////////////////////////////////////////////////////////////////////////////
// KVMConfig Events //////////////////////////////////////////////////////////
impl Controller {
    /// Handle `KVMConfig` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_cluster_event(&mut self, res: EventResult<KVMConfig>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from KVMConfig k8s watcher");
                let _ = tokio::time::sleep(Duration::from_secs(10)).await;
                return;
            }
        };
        match event {
            Event::Applied(obj) => self.cluster_applied(obj).await,
            Event::Deleted(obj) => self.cluster_deleted(obj).await,
            Event::Restarted(objs) => self.cluster_restarted(objs).await,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cluster))]
    async fn cluster_applied(&mut self, cluster: KVMConfig) {
        if let Some(name) = self.clusters.observe(cluster) {
            self.spawn_task(Task::Reconcile(name));
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cluster))]
    async fn cluster_deleted(&mut self, cluster: KVMConfig) {
        // The object is only gone once its finalizer is released, so there is nothing left to do.
        if self.clusters.forget(cluster.name()) {
            tracing::info!(cluster = cluster.name(), "cluster object removed");
        }
    }

    #[tracing::instrument(level = "debug", skip(self, clusters))]
    async fn cluster_restarted(&mut self, clusters: Vec<KVMConfig>) {
        self.clusters.retain_live(&clusters);
        for cluster in clusters {
            self.cluster_applied(cluster).await;
        }
    }
}
