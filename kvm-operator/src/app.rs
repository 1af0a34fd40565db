use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::k8s::Controller;

/// The operator process: the K8s controller plus signal handling around it.
pub struct App {
    config: Arc<Config>,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the K8s controller.
    controller: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance, starting the K8s controller.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;
        let controller = Controller::new(client, config.clone(), shutdown_tx.clone())
            .context("error building k8s controller")?
            .spawn();
        tracing::info!(namespace = %config.namespace, pod = %config.pod_name, "watching KVMConfig objects");

        Ok(Self {
            config,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            controller,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        tokio::select! {
            Some((name, _)) = signals.next() => {
                tracing::debug!(signal = name, "signal received, beginning graceful shutdown");
                let _ = self.shutdown_tx.send(());
            }
            _ = self.shutdown_rx.next() => (),
        }

        // A pass in flight is given the grace period to finish, then abandoned.
        let grace = self.config.shutdown_grace();
        tracing::debug!(?grace, "KVM Operator is shutting down");
        match tokio::time::timeout(grace, &mut self.controller).await {
            Ok(res) => {
                if let Err(err) = res.context("error joining k8s controller handle").and_then(|res| res) {
                    tracing::error!(error = ?err, "error shutting down k8s controller");
                }
            }
            Err(_) => {
                tracing::warn!(?grace, "k8s controller did not stop within grace period, aborting");
                self.controller.abort();
            }
        }

        tracing::debug!("KVM Operator shutdown complete");
        Ok(())
    }
}
