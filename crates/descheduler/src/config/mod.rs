pub mod cli;
pub mod error;
pub mod parse;
pub mod policy;

use error_stack::Report;

pub use cli::*;
pub use error::ConfigError;
pub use policy::{load_policy, PolicyFile, PolicySpec, Settings};

/// Loads the policy named by `args`, applies the command line overrides and
/// validates it.
pub fn load(args: &ConfigArgs) -> Result<(PolicySpec, Settings), Report<ConfigError>> {
    let mut spec = load_policy(args.config.as_deref())?.spec;
    if args.dry_run {
        spec.dry_run = true;
    }
    let settings = spec.resolve()?;
    Ok((spec, settings))
}
