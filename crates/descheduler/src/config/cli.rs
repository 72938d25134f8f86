use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use utils::version;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the descheduler controller
    Run(RunArgs),
    /// Print the resolved policy as YAML
    #[command(name = "show-config")]
    ShowConfig(ConfigArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[arg(
        long,
        env = "DESCHEDULER_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Policy file, defaults to $HOME/.descheduler.yaml"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        help = "Select pods to evict without evicting them, overrides spec.dryRun"
    )]
    pub dry_run: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Kubeconfig file, in-cluster config or ~/.kube/config when unset"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(long, help = "Kubeconfig context to use")]
    pub kube_context: Option<String>,

    #[arg(
        long,
        default_value_t = 60,
        help = "Seconds to wait for the node, pod and replica set caches to sync"
    )]
    pub cache_sync_timeout: u64,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags() {
        let cli = Cli::try_parse_from([
            "descheduler",
            "run",
            "--config",
            "/etc/descheduler/policy.yaml",
            "--kube-context",
            "staging",
            "--dry-run",
            "--cache-sync-timeout",
            "5",
        ])
        .expect("valid arguments");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            args.config.config,
            Some(PathBuf::from("/etc/descheduler/policy.yaml"))
        );
        assert_eq!(args.kube_context.as_deref(), Some("staging"));
        assert!(args.config.dry_run);
        assert_eq!(args.cache_sync_timeout, 5);
    }
}
