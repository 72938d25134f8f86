use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::app::services::{ApplicationServices, StartupParts};
use crate::app::tasks::Tasks;
use crate::config::Settings;

/// Application core structure with explicit dependencies
pub struct Application {
    services: ApplicationServices,
    settings: Settings,
    startup: Option<StartupParts>,
    cache_sync_timeout: Duration,
    token: CancellationToken,
}

impl Application {
    pub fn new(
        services: ApplicationServices,
        settings: Settings,
        startup: StartupParts,
        cache_sync_timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            services,
            settings,
            startup: Some(startup),
            cache_sync_timeout,
            token,
        }
    }

    pub fn services(&self) -> &ApplicationServices {
        &self.services
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Starts the watchers, waits for the caches, then runs the trigger gate
    /// and the dispatcher until a shutdown signal arrives or a task exits.
    pub async fn run(&mut self) -> Result<()> {
        let Some(StartupParts {
            feeds,
            receiver,
            dispatcher,
        }) = self.startup.take()
        else {
            anyhow::bail!("Application already ran");
        };

        tracing::info!("Starting all application tasks...");
        let mut tasks = Tasks::new(self.token.clone());
        tasks.spawn_watcher_tasks(self, feeds);

        tracing::info!(
            "Waiting up to {:?} for caches to sync",
            self.cache_sync_timeout
        );
        if let Err(e) = self
            .services
            .cache
            .wait_for_sync(self.cache_sync_timeout)
            .await
        {
            tracing::error!("Cache sync failed, stopping");
            tasks.shutdown().await;
            return Err(anyhow::anyhow!("Failed to sync caches: {e:?}"));
        }

        tasks.spawn_controller_tasks(self, dispatcher, receiver);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}
