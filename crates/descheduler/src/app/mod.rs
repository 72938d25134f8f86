//! Application module
//!
//! Wires the Kubernetes caches, the trigger gate and the dispatcher together
//! and manages their lifecycle.

pub mod builder;
pub mod core;
pub mod services;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use core::Application;
pub use services::ApplicationServices;
