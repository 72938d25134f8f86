use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::error::EvictionError;
use crate::domain::traits::PodEvictor;
use crate::domain::types::PodUnit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionOutcome {
    Evicted,
    /// Dry run, no request was sent.
    DryRun,
    /// The pod was already gone.
    AlreadyGone,
    /// Rejected for now, typically by a disruption budget.
    Throttled,
    Failed(String),
}

impl EvictionOutcome {
    /// The pod no longer runs where it was.
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Evicted | Self::AlreadyGone)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EvictionReport {
    pub outcomes: Vec<(PodUnit, EvictionOutcome)>,
}

impl EvictionReport {
    pub fn removed_pods(&self) -> impl Iterator<Item = &PodUnit> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_removed())
            .map(|(pod, _)| pod)
    }
}

/// Issues eviction requests one pod at a time.
pub struct EvictionExecutor {
    evictor: Arc<dyn PodEvictor>,
    dry_run: bool,
}

impl EvictionExecutor {
    pub fn new(evictor: Arc<dyn PodEvictor>, dry_run: bool) -> Self {
        Self { evictor, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// A failure never stops the remaining evictions.
    pub async fn evict(&self, pods: &[PodUnit]) -> EvictionReport {
        let mut report = EvictionReport::default();
        for pod in pods {
            let outcome = if self.dry_run {
                info!(pod = %pod.key(), "Dry run, pod would be evicted");
                EvictionOutcome::DryRun
            } else {
                match self.evictor.evict_pod(pod).await {
                    Ok(()) => {
                        info!(pod = %pod.key(), "Pod evicted");
                        EvictionOutcome::Evicted
                    }
                    Err(EvictionError::NotFound) => {
                        info!(pod = %pod.key(), "Pod already gone");
                        EvictionOutcome::AlreadyGone
                    }
                    Err(EvictionError::TooManyRequests) => {
                        warn!(pod = %pod.key(), "Eviction throttled, pod skipped this cycle");
                        EvictionOutcome::Throttled
                    }
                    Err(EvictionError::Other { message }) => {
                        error!(pod = %pod.key(), "Failed to evict pod: {message}");
                        EvictionOutcome::Failed(message)
                    }
                }
            };
            report.outcomes.push((pod.clone(), outcome));
        }
        report
    }
}
