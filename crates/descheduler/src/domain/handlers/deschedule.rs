use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::classifier::NodeClassifier;
use crate::domain::eviction::{EvictionExecutor, EvictionPolicy};
use crate::domain::state::ControllerState;
use crate::domain::traits::ClusterSnapshot;
use crate::domain::trigger_gate::TriggerGate;
use crate::domain::types::PodUnit;

/// How a descheduling cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    OutOfTime,
    SnapshotUnavailable,
    NothingToRelieve,
    SelectionFailed,
    NothingSelected,
    DryRun { selected: usize },
    Evicted { evicted: usize, tracked: usize },
}

/// Runs one classify, select and evict cycle.
pub struct DescheduleHandler {
    snapshot: Arc<dyn ClusterSnapshot>,
    classifier: NodeClassifier,
    policy: EvictionPolicy,
    executor: EvictionExecutor,
    gate: Arc<TriggerGate>,
    max_evict: usize,
}

impl DescheduleHandler {
    pub fn new(
        snapshot: Arc<dyn ClusterSnapshot>,
        classifier: NodeClassifier,
        policy: EvictionPolicy,
        executor: EvictionExecutor,
        gate: Arc<TriggerGate>,
        max_evict: usize,
    ) -> Self {
        Self {
            snapshot,
            classifier,
            policy,
            executor,
            gate,
            max_evict,
        }
    }

    /// Moves `state` to `Recovering` when evicted pods belong to replica groups.
    pub async fn handle(&self, state: &mut ControllerState) -> CycleOutcome {
        if self.gate.is_out_of_time() {
            info!("Deschedule event dropped, out of the time window");
            return CycleOutcome::OutOfTime;
        }

        let nodes = match self.snapshot.list_nodes() {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Deschedule event aborted, failed to list nodes: {e:?}");
                return CycleOutcome::SnapshotUnavailable;
            }
        };
        let Some(ranked) = self.classifier.classify(self.snapshot.as_ref(), &nodes) else {
            return CycleOutcome::NothingToRelieve;
        };

        info!("Deschedule triggered, picking pods from {} node(s)", ranked.len());
        let selected = match self
            .policy
            .select_evictions(self.snapshot.as_ref(), &ranked, self.max_evict)
        {
            Ok(selected) => selected,
            Err(e) => {
                warn!("Deschedule event aborted, pod selection failed: {e:?}");
                return CycleOutcome::SelectionFailed;
            }
        };
        if selected.is_empty() {
            info!("Deschedule event aborted, no pod to evict");
            return CycleOutcome::NothingSelected;
        }

        let pods: Vec<PodUnit> = selected.into_iter().map(|s| s.pod).collect();
        let report = self.executor.evict(&pods).await;
        if self.executor.is_dry_run() {
            info!("Dry run finished, {} pod(s) would have been evicted", pods.len());
            return CycleOutcome::DryRun {
                selected: pods.len(),
            };
        }

        let evicted = report.removed_pods().count();
        let pending: BTreeSet<String> = report
            .removed_pods()
            .filter_map(PodUnit::replica_group_key)
            .collect();
        let tracked = pending.len();
        *state = ControllerState::recovering(pending);
        if state.is_recovering() {
            info!("{evicted} pod(s) evicted, waiting for {tracked} replica set(s) to recover");
        } else {
            info!("{evicted} pod(s) evicted, no replica set to wait for");
        }
        CycleOutcome::Evicted { evicted, tracked }
    }
}
