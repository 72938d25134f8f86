use std::time::Duration;

use anyhow::Result;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::watcher;
use kube::Api;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::domain::work_queue::WorkQueueReceiver;
use crate::domain::Dispatcher;
use crate::infrastructure::k8s::cache::{NODE_RESOURCE, POD_RESOURCE, REPLICA_SET_RESOURCE};
use crate::infrastructure::k8s::{
    CacheFeeds, CacheOnly, NodeReadiness, ReplicaSetUpdates, ResourceWatcher,
};

/// Failed pods never count towards node usage.
const POD_FIELD_SELECTOR: &str = "status.phase!=Failed";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Tasks {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token,
        }
    }

    /// Start the node, pod and replica set watchers
    pub fn spawn_watcher_tasks(&mut self, app: &Application, feeds: CacheFeeds) {
        let client = app.services().client.clone();
        let queue = app.services().queue.clone();
        let CacheFeeds {
            nodes,
            pods,
            replica_sets,
        } = feeds;

        let mut node_config = watcher::Config::default();
        if let Some(selector) = &app.settings().node_selector {
            tracing::info!("Watching nodes matching {selector}");
            node_config = node_config.labels(selector);
        }
        let node_watcher = ResourceWatcher::new(
            NODE_RESOURCE,
            Api::<Node>::all(client.clone()),
            node_config,
            nodes,
            NodeReadiness::new(queue.clone()),
        );
        self.spawn_named("node watcher", node_watcher.run(self.cancellation_token.clone()));

        let pod_watcher = ResourceWatcher::new(
            POD_RESOURCE,
            Api::<Pod>::all(client.clone()),
            watcher::Config::default().fields(POD_FIELD_SELECTOR),
            pods,
            CacheOnly,
        );
        self.spawn_named("pod watcher", pod_watcher.run(self.cancellation_token.clone()));

        let replica_set_watcher = ResourceWatcher::new(
            REPLICA_SET_RESOURCE,
            Api::<ReplicaSet>::all(client),
            watcher::Config::default(),
            replica_sets,
            ReplicaSetUpdates::new(queue),
        );
        self.spawn_named(
            "replica set watcher",
            replica_set_watcher.run(self.cancellation_token.clone()),
        );
    }

    /// Start the trigger gate and the dispatcher
    pub fn spawn_controller_tasks(
        &mut self,
        app: &Application,
        mut dispatcher: Dispatcher,
        receiver: WorkQueueReceiver,
    ) {
        let gate = app.services().gate.clone();
        let clock = app.services().clock.clone();
        let queue = app.services().queue.clone();
        let token = self.cancellation_token.clone();
        self.spawn_named("trigger gate", async move {
            gate.run(clock, queue, token).await;
        });

        let token = self.cancellation_token.clone();
        self.spawn_named("dispatcher", async move {
            dispatcher.run(receiver, token).await;
        });
    }

    fn spawn_named<F>(&mut self, name: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tracing::info!("Starting {name} task");
            task.await;
            tracing::info!("{name} task completed");
        });
        self.tasks.push(handle);
    }

    /// Wait for a shutdown signal or for any task to exit, then stop
    /// everything.
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                        return;
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        let finished = tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                None
            }
            (result, index, _remaining) = futures::future::select_all(self.tasks.iter_mut()) => {
                Some((result, index))
            }
        };

        let outcome = match finished {
            None => Ok(()),
            Some((result, index)) => {
                // a finished handle must not be awaited again
                self.tasks.remove(index);
                match result {
                    Err(e) => {
                        tracing::error!("Task completed with error: {e}");
                        Err(e.into())
                    }
                    Ok(()) => {
                        tracing::warn!("Task completed unexpectedly");
                        Ok(())
                    }
                }
            }
        };

        self.shutdown().await;
        outcome
    }

    /// Cancel every task and wait for them to stop.
    pub async fn shutdown(&mut self) {
        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in self.tasks.drain(..) {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }
}
