use std::sync::Arc;

use kube::Client;

use crate::domain::trigger_gate::TriggerGate;
use crate::domain::work_queue::{WorkQueue, WorkQueueReceiver};
use crate::domain::{Clock, Dispatcher};
use crate::infrastructure::k8s::{CacheFeeds, KubeClusterCache};

/// Long-lived services shared by the application tasks
pub struct ApplicationServices {
    pub client: Client,
    pub cache: KubeClusterCache,
    pub queue: WorkQueue,
    pub gate: Arc<TriggerGate>,
    pub clock: Arc<dyn Clock>,
}

/// Handed over to the tasks once, when the application starts.
pub struct StartupParts {
    pub feeds: CacheFeeds,
    pub receiver: WorkQueueReceiver,
    pub dispatcher: Dispatcher,
}
