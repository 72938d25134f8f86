pub mod deschedule;
pub mod recover;

pub use deschedule::{CycleOutcome, DescheduleHandler};
pub use recover::{RecoverHandler, RecoverOutcome, DEFAULT_RECOVERY_GRACE, RECOVERED_EVENT_KEY};
