use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::app::services::{ApplicationServices, StartupParts};
use crate::app::Application;
use crate::config::{self, RunArgs, Settings};
use crate::domain::classifier::NodeClassifier;
use crate::domain::eviction::{EvictionExecutor, EvictionPolicy};
use crate::domain::handlers::{DescheduleHandler, RecoverHandler};
use crate::domain::trigger_gate::TriggerGate;
use crate::domain::work_queue::work_queue;
use crate::domain::{ClusterSnapshot, Dispatcher, PodEvictor, SystemClock};
use crate::infrastructure::k8s::{discover_eviction_api_version, KubeClusterCache, KubePodEvictor};
use crate::infrastructure::kube_client::{self, ClientSource};

/// Application builder
pub struct ApplicationBuilder {
    args: RunArgs,
}

impl ApplicationBuilder {
    pub fn new(args: RunArgs) -> Self {
        Self { args }
    }

    /// Loads the policy, connects to the cluster and wires every component
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let (_, settings) = config::load(&self.args.config)
            .map_err(|e| anyhow::anyhow!("Failed to load policy: {e:?}"))?;
        log_settings(&settings);

        let client = kube_client::connect(&ClientSource {
            kubeconfig: self.args.kubeconfig.clone(),
            context: self.args.kube_context.clone(),
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {e:?}"))?;

        let eviction_api_version = discover_eviction_api_version(&client)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to discover the eviction API: {e:?}"))?;

        let token = CancellationToken::new();
        let (services, startup) =
            Self::create_components(client, eviction_api_version, &settings, token.clone());

        Ok(Application::new(
            services,
            settings,
            startup,
            Duration::from_secs(self.args.cache_sync_timeout),
            token,
        ))
    }

    fn create_components(
        client: Client,
        eviction_api_version: Option<String>,
        settings: &Settings,
        token: CancellationToken,
    ) -> (ApplicationServices, StartupParts) {
        let (queue, receiver) = work_queue();
        let (cache, feeds) = KubeClusterCache::new();
        let snapshot: Arc<dyn ClusterSnapshot> = Arc::new(cache.clone());

        let gate = Arc::new(TriggerGate::new(
            settings.mode,
            settings.window,
            settings.interval,
        ));

        let evictor: Arc<dyn PodEvictor> =
            Arc::new(KubePodEvictor::new(client.clone(), eviction_api_version));
        let deschedule = DescheduleHandler::new(
            snapshot.clone(),
            NodeClassifier::new(settings.thresholds),
            EvictionPolicy::new(settings.policy.clone()),
            EvictionExecutor::new(evictor, settings.dry_run),
            gate.clone(),
            settings.max_evict,
        );
        let recover = RecoverHandler::new(snapshot, queue.clone(), settings.recovery_grace, token);
        let dispatcher = Dispatcher::new(deschedule, recover);

        let services = ApplicationServices {
            client,
            cache,
            queue,
            gate,
            clock: Arc::new(SystemClock),
        };
        let startup = StartupParts {
            feeds,
            receiver,
            dispatcher,
        };
        (services, startup)
    }
}

fn log_settings(settings: &Settings) {
    let thresholds = &settings.thresholds;
    tracing::info!(
        mode = %settings.mode,
        dry_run = settings.dry_run,
        max_evict = settings.max_evict,
        hard_eviction = settings.policy.hard_eviction,
        "Descheduler policy loaded"
    );
    tracing::info!(
        "Spared thresholds: min {:?}, max {:?}",
        thresholds.min_spared,
        thresholds.max_spared
    );
    if settings.dry_run {
        tracing::warn!("Dry run: pods will be selected but never evicted");
    }
}
