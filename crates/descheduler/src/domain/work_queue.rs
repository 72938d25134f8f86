//! Single-consumer work queue feeding the dispatcher.
//!
//! Any number of producers hold a cloned [`WorkQueue`]; exactly one
//! [`WorkQueueReceiver`] pops events in arrival order. An event equal to one
//! still waiting in the queue is dropped on push.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::types::Event;

type Pending = Arc<Mutex<HashSet<Event>>>;

pub fn work_queue() -> (WorkQueue, WorkQueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Pending::default();
    (
        WorkQueue {
            tx,
            pending: pending.clone(),
        },
        WorkQueueReceiver { rx, pending },
    )
}

#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Event>,
    pending: Pending,
}

impl WorkQueue {
    /// Returns false when the event was already queued or the queue is shut down.
    pub fn push(&self, event: Event) -> bool {
        let mut pending = self.pending.lock().expect("poisoned");
        if !pending.insert(event.clone()) {
            debug!(key = event.key(), kind = %event.resource_kind(), "Event already queued");
            return false;
        }
        if self.tx.send(event.clone()).is_err() {
            pending.remove(&event);
            debug!(key = event.key(), "Queue is shut down, event dropped");
            return false;
        }
        true
    }

    /// Pushes `event` once `delay` has elapsed unless `token` is cancelled first.
    pub fn push_after(
        &self,
        event: Event,
        delay: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    queue.push(event);
                }
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct WorkQueueReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
    pending: Pending,
}

impl WorkQueueReceiver {
    /// Waits for the next event; `None` once shut down and empty.
    pub async fn pop(&mut self) -> Option<Event> {
        let event = self.rx.recv().await?;
        self.pending.lock().expect("poisoned").remove(&event);
        Some(event)
    }

    /// Closes the queue and discards whatever is still waiting.
    pub fn shut_down(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        self.pending.lock().expect("poisoned").clear();
        discarded
    }
}
