use core::error::Error;
use std::path::PathBuf;

/// Errors raised while loading or resolving the policy file.
#[derive(Debug, derive_more::Display)]
pub enum ConfigError {
    #[display("Failed to read config file {}", path.display())]
    Unreadable { path: PathBuf },
    #[display("Malformed config file {}", path.display())]
    Malformed { path: PathBuf },
    #[display("Can't recognize spec.triggers.mode {value:?}, either set it to event or time")]
    InvalidMode { value: String },
    #[display("Invalid start time {value:?}, expected HH:MM or H:MMAM/PM")]
    InvalidStartTime { value: String },
    #[display("Invalid duration {value:?} for {field}")]
    InvalidDuration { field: &'static str, value: String },
    #[display("{field} must be within 0..=100, got {value}")]
    InvalidPercentage { field: String, value: f64 },
    #[display("spec.rules.maxEvictSize must be at least 1")]
    InvalidMaxEvictSize,
}

impl Error for ConfigError {}
