//! Single consumer of the work queue.
//!
//! The dispatcher owns the controller state and hands it to one handler at a
//! time, so nothing it touches needs a lock.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::domain::handlers::{DescheduleHandler, RecoverHandler};
use crate::domain::state::{route, ControllerState, Route};
use crate::domain::types::Event;
use crate::domain::work_queue::WorkQueueReceiver;

pub struct Dispatcher {
    state: ControllerState,
    deschedule: DescheduleHandler,
    recover: RecoverHandler,
}

impl Dispatcher {
    pub fn new(deschedule: DescheduleHandler, recover: RecoverHandler) -> Self {
        Self {
            state: ControllerState::Idle,
            deschedule,
            recover,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub async fn dispatch(&mut self, event: Event) -> Route {
        let route = route(&self.state, &event);
        match route {
            Route::Deschedule => {
                let outcome = self.deschedule.handle(&mut self.state).await;
                debug!(key = event.key(), ?outcome, "Deschedule event handled");
            }
            Route::Recover => {
                let outcome = self.recover.handle(event.key(), &mut self.state);
                debug!(key = event.key(), ?outcome, "Recover event handled");
            }
            Route::Ignore => {
                debug!(
                    key = event.key(),
                    kind = %event.resource_kind(),
                    recovering = self.state.is_recovering(),
                    "Event ignored"
                );
            }
        }
        route
    }

    /// Processes events until `token` is cancelled.
    ///
    /// The event in progress always completes; whatever is still queued is
    /// discarded.
    #[instrument(skip_all)]
    pub async fn run(&mut self, mut receiver: WorkQueueReceiver, token: CancellationToken) {
        info!("Descheduler synced and ready");
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = receiver.pop() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.dispatch(event).await;
        }
        let discarded = receiver.shut_down();
        info!("Dispatcher stopped, {discarded} queued event(s) discarded");
    }
}
