//! Kubernetes controller.
//!
//! This controller watches `KVMConfig` objects in the operator namespace, and drives one
//! reconciliation pass per cluster whenever the spec or the lifecycle state of a cluster changes.
//! All passes run on the controller task, so passes never overlap. Passes which could not
//! converge are rescheduled after a delay, converged clusters are reconciled again periodically.

mod data;
mod pass;
mod requeue;
mod secrets;
mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::prelude::*;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use self::data::ClusterIndex;
use self::requeue::Requeues;
use crate::cloudconfig::RenderSettings;
use crate::config::Config;
use kvm_core::crd::KVMConfig;
use kvm_core::versionbundle::{catalog, Registry};

/// The timeout duration used before rescheduling a pass which did not converge.
const RESCHEDULE_TIMEOUT: Duration = Duration::from_secs(10);

type EventResult<T> = std::result::Result<Event<T>, WatcherError>;

/// A controller task to be performed.
#[derive(Debug)]
pub(crate) enum Task {
    /// Run a pass for the named cluster right away.
    Reconcile(Arc<String>),
    /// Run a delayed pass for the named cluster, due at the given deadline.
    Requeue(Arc<String>, Instant),
}

/// Kubernetes controller for reconciling KVM guest clusters.
pub struct Controller {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// The catalog of version bundles known to this operator.
    registry: Registry,
    /// The settings used for rendering node configuration.
    settings: RenderSettings,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// A channel of controller tasks.
    tasks_tx: mpsc::Sender<Task>,
    /// A channel of controller tasks.
    tasks_rx: ReceiverStream<Task>,

    /// All known cluster objects, keyed by object name.
    clusters: ClusterIndex,
    /// The delayed passes pending per cluster.
    requeues: Requeues,
}

impl Controller {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        let registry = catalog()?;
        let settings = config.render_settings();
        let (tasks_tx, tasks_rx) = mpsc::channel(1000);
        Ok(Self {
            client,
            config,
            registry,
            settings,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            tasks_tx,
            tasks_rx: ReceiverStream::new(tasks_rx),
            clusters: Default::default(),
            requeues: Default::default(),
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        if let Some(latest) = self.registry.latest() {
            tracing::info!(latest = %latest.version, bundles = self.registry.iter().count(), "version bundle registry loaded");
        }

        // Build watcher streams.
        let clusters: Api<KVMConfig> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let clusters_watcher = watcher(clusters, ListParams::default());
        tokio::pin!(clusters_watcher);

        tracing::info!("k8s controller initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = clusters_watcher.next() => self.handle_cluster_event(k8s_event_res).await,
                Some(task) = self.tasks_rx.next() => self.handle_task(task).await,
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!("k8s controller shutdown");
        Ok(())
    }

    /// Spawn a task which emits a new controller task.
    ///
    /// This indirection is used to ensure that we don't use an unlimited amount of memory with an
    /// unbounded queue, and also so that we do not block the controller from making progress and
    /// dead-locking when we hit the task queue cap.
    fn spawn_task(&self, task: Task) {
        let tx = self.tasks_tx.clone();
        tokio::spawn(async move {
            let _res = tx.send(task).await;
        });
    }

    /// Schedule a delayed pass for the named cluster, unless one is already pending no later.
    fn requeue(&mut self, name: Arc<String>, delay: Duration) {
        let deadline = Instant::now() + delay;
        if !self.requeues.schedule(&name, deadline) {
            return;
        }
        let tx = self.tasks_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline.into()).await;
            let _res = tx.send(Task::Requeue(name, deadline)).await;
        });
    }

    /// Handle controller tasks.
    async fn handle_task(&mut self, task: Task) {
        let name = match task {
            Task::Reconcile(name) => name,
            Task::Requeue(name, deadline) => {
                if !self.requeues.fire(&name, deadline) {
                    return;
                }
                name
            }
        };
        self.reconcile_cluster(name).await;
    }

    /// The interval at which converged clusters are reconciled again.
    fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.config.resync_seconds)
    }
}
