use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use ampliflow::config::PilotConfig;
use ampliflow::invoke::SubprocessRunner;
use ampliflow::layout::ProjectLayout;
use ampliflow::pipeline::Workflow;
use ampliflow::prompt::{Resolver, TerminalConsole};
use ampliflow::record::RunStatus;
use ampliflow::sequencer::{Session, run_workflow};
use ampliflow::stages::CATALOGUE;
use ampliflow::stages::tree::TreeStrategy;
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueHint};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Parser)]
#[command(
    name = "ampliflow",
    version,
    about = "Interactive 16S amplicon pipeline driver"
)]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a dataset from raw paired-end reads
    Dataset,
    /// Train a naive-Bayes taxonomic classifier
    Classifier,
    /// List the stages of both workflows and the tree strategies
    Stages,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = configure_tracing() {
        eprintln!("warning: {err}");
    }

    match run(cli) {
        Ok(RunStatus::Completed) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))
}

fn run(cli: Cli) -> Result<RunStatus> {
    let workflow = match cli.command {
        Some(Commands::Stages) => {
            list_stages();
            return Ok(RunStatus::Completed);
        }
        Some(Commands::Dataset) => Some(Workflow::Dataset),
        Some(Commands::Classifier) => Some(Workflow::Classifier),
        None => None,
    };

    let root = match cli.project {
        Some(path) => path,
        None => env::current_dir().context("Failed to determine the working directory")?,
    };
    let config = PilotConfig::discover(&root)?;
    let mut resolver = Resolver::new(Box::new(TerminalConsole::spawn()), config.prompt_timeout());
    let workflow = match workflow {
        Some(workflow) => workflow,
        None => Workflow::select(&mut resolver)?,
    };

    info!(workflow = workflow.slug(), root = %root.display(), "Starting workflow");
    let session = Session::new(
        workflow,
        ProjectLayout::new(root),
        config,
        resolver,
        Box::new(SubprocessRunner),
    );
    let outcome = run_workflow(session)?;
    if let Some(checkpoint) = outcome.checkpoint {
        println!("Aborted at checkpoint '{checkpoint}'.");
    }
    if let Some(path) = &outcome.record_path {
        println!("Run record: {}", path.display());
    }
    Ok(outcome.status)
}

fn list_stages() {
    for workflow in [Workflow::Dataset, Workflow::Classifier] {
        println!("{}:", workflow.slug());
        for stage in CATALOGUE.iter().filter(|s| s.workflow == workflow) {
            println!("  {:<20} {}", stage.name, stage.description);
        }
    }
    println!("tree strategies:");
    for entry in TreeStrategy::catalogue() {
        println!("  {}) {:<24} {}", entry.choice, entry.slug, entry.label);
    }
}
