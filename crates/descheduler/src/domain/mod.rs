//! The decision engine: classification, eviction selection, triggering and
//! the event-driven state machine.

pub mod affinity;
pub mod classifier;
pub mod dispatcher;
pub mod error;
pub mod eviction;
pub mod handlers;
pub mod state;
pub mod traits;
pub mod trigger_gate;
pub mod types;
pub mod work_queue;

#[cfg(test)]
pub(crate) mod mock;

pub use dispatcher::Dispatcher;
pub use state::{ControllerState, Route};
pub use traits::{ClusterSnapshot, Clock, PodEvictor, SystemClock};
pub use types::Event;
