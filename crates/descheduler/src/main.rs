use anyhow::Result;
use clap::Parser;
use descheduler::app::ApplicationBuilder;
use descheduler::config::{self, Cli, Commands, ConfigArgs, RunArgs};
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => run(run_args).await,
        Commands::ShowConfig(config_args) => show_config(&config_args),
    }
}

async fn run(run_args: RunArgs) -> Result<()> {
    let _guard = utils::logging::init();

    tracing::info!("Starting descheduler {}", &**version::VERSION);

    let mut app = ApplicationBuilder::new(run_args).build().await?;
    app.run().await
}

fn show_config(config_args: &ConfigArgs) -> Result<()> {
    let _guard = utils::logging::init();

    let (spec, _) = config::load(config_args)
        .map_err(|e| anyhow::anyhow!("Invalid policy: {e:?}"))?;
    let policy = config::PolicyFile {
        spec: spec.normalized(),
        ..config::PolicyFile::default()
    };
    print!("{}", serde_yaml::to_string(&policy)?);
    Ok(())
}
