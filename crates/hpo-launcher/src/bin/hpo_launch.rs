use anyhow::Context;
use clap::{Parser, Subcommand};
use hpo_launcher::{
    AssumeYes, Confirmation, ConfigResolver, ConsolePrompt, DockerCli, ExperimentFile, ImageToolchain,
    LocalBackend, LocalBackendConfig, Workflow,
};
use hpo_types::HpoError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "hpo-launch")]
#[command(version)]
#[command(about = "Resolve an experiment, publish its image and run a hyperparameter search")]
struct Cli {
    /// Experiment definition
    #[arg(short, long, default_value = "experiment.toml")]
    config: PathBuf,

    /// Approve every submission without prompting
    #[arg(short, long)]
    yes: bool,

    /// Seed for the trial sampler
    #[arg(long)]
    seed: Option<u64>,

    /// Stop waiting for the search after this many seconds and report partial results
    #[arg(long, value_name = "SECS")]
    wait_timeout_secs: Option<u64>,

    /// Simulated duration of one batch of trials
    #[arg(long, default_value = "50")]
    trial_latency_ms: u64,

    /// Build and push with the docker CLI instead of in-process
    #[arg(long)]
    docker: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the experiment and print the resolved choices
    Resolve,
    /// Build and publish the training image
    Build,
    /// Publish the image and run a single trial with default hyperparameters
    SmokeTest,
    /// Publish the image and run the full search
    Search,
    /// Publish, smoke test, then search
    Run {
        #[arg(long)]
        skip_smoke_test: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the partial trials of a timed-out search before failing.
fn report_failure(error: HpoError) -> anyhow::Error {
    if let Some(partial) = error.partial_result() {
        if let Err(print_error) = print_json(partial) {
            tracing::error!(%print_error, "could not print partial results");
        }
    }
    error.into()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file = ExperimentFile::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let raw = file.to_raw_choices();

    if let Command::Resolve = cli.command {
        return print_json(&ConfigResolver::resolve(&raw)?);
    }

    let backend = Arc::new(LocalBackend::new(LocalBackendConfig {
        trial_latency: Duration::from_millis(cli.trial_latency_ms),
        seed: cli.seed,
        search_deadline: None,
    }));
    let toolchain: Arc<dyn ImageToolchain> = if cli.docker {
        Arc::new(DockerCli::new(file.context_dir()))
    } else {
        backend.clone()
    };
    let confirm: Arc<dyn Confirmation> = if cli.yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(ConsolePrompt)
    };
    let (registry, repository) = file.image_target()?;
    let builder = file.image_builder()?;

    let workflow = Workflow::new(toolchain, backend.clone(), backend, confirm)
        .with_target(registry, repository)
        .with_wait_timeout(cli.wait_timeout_secs.map(Duration::from_secs));

    match cli.command {
        Command::Resolve => Ok(()),
        Command::Build => {
            let image = workflow.publish_image(builder).await?;
            print_json(&image)
        }
        Command::SmokeTest => {
            let experiment = ConfigResolver::resolve(&raw)?;
            let image = workflow.publish_image(builder).await?;
            let launcher = workflow.launcher();
            let handle = launcher.launch_smoke_test(&experiment, &image).await?;
            let status = launcher.wait(&handle).await?;
            print_json(&status)
        }
        Command::Search => {
            let experiment = ConfigResolver::resolve(&raw)?;
            let image = workflow.publish_image(builder).await?;
            let result = workflow
                .orchestrator()
                .launch_search(&experiment, &image, experiment.objective())
                .await
                .map_err(report_failure)?;
            print_json(&result)
        }
        Command::Run { skip_smoke_test } => {
            let report = workflow
                .skip_smoke_test(skip_smoke_test)
                .run(&raw, builder)
                .await
                .map_err(report_failure)?;
            print_json(&report)
        }
    }
}
