use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::state::{ControllerState, RecoveryProgress};
use crate::domain::traits::ClusterSnapshot;
use crate::domain::types::Event;
use crate::domain::work_queue::WorkQueue;

/// Key of the re-trigger pushed once recovery completes.
pub const RECOVERED_EVENT_KEY: &str = "recovered";
pub const DEFAULT_RECOVERY_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverOutcome {
    UnknownGroup,
    NotTracked,
    Waiting(usize),
    Completed,
}

/// Shrinks the pending-recovery set as replica groups report updates.
pub struct RecoverHandler {
    snapshot: Arc<dyn ClusterSnapshot>,
    queue: WorkQueue,
    grace: Duration,
    token: CancellationToken,
}

impl RecoverHandler {
    pub fn new(
        snapshot: Arc<dyn ClusterSnapshot>,
        queue: WorkQueue,
        grace: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            snapshot,
            queue,
            grace,
            token,
        }
    }

    pub fn handle(&self, key: &str, state: &mut ControllerState) -> RecoverOutcome {
        let Some(group) = self.snapshot.get_replica_group_by_key(key) else {
            debug!("Replica set {key} is not cached, recover event ignored");
            return RecoverOutcome::UnknownGroup;
        };
        let group_key = group.key();
        if !state.is_pending(&group_key) {
            return RecoverOutcome::NotTracked;
        }
        debug!(
            "Replica set {group_key} updated with {}/{} ready replicas",
            group.ready_replicas, group.desired_replicas
        );

        match state.mark_recovered(&group_key) {
            RecoveryProgress::Completed => {
                info!(
                    "Evicted replica sets have recovered, next deschedule in {:?}",
                    self.grace
                );
                self.queue.push_after(
                    Event::timer(RECOVERED_EVENT_KEY),
                    self.grace,
                    self.token.clone(),
                );
                RecoverOutcome::Completed
            }
            RecoveryProgress::Waiting(remaining) => {
                info!("Replica set {group_key} updated, still waiting for {remaining} replica set(s)");
                RecoverOutcome::Waiting(remaining)
            }
            RecoveryProgress::NotTracked => RecoverOutcome::NotTracked,
        }
    }
}
