use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::dsl::validator::Diagnostic;
use crate::engine::Engine;
use crate::executor::LocalExecutor;
use crate::types::WorkflowSpec;

#[derive(Parser)]
#[command(name = "refrain")]
#[command(about = "Refrain - a declarative workflow engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Studio URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub studio_url: Option<String>,

    /// Record store URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub store_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow file and print its diagnostics
    Validate {
        /// Workflow JSON file
        file: PathBuf,
    },

    /// Print the options an activity would run with
    Options {
        /// Activity name
        activity: String,

        /// Workflow JSON file whose `options` apply
        #[arg(short = 'w', long = "workflow")]
        workflow: Option<PathBuf>,
    },

    /// List the validation rules
    Rules,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load configuration eagerly so config errors surface before any output
    let config = Config::builder()
        .config_path(cli.config)
        .studio_url(cli.studio_url)
        .store_url(cli.store_url)
        .build()?;
    let engine = Engine::builder()
        .executor(Arc::new(LocalExecutor::default()))
        .config(&config)
        .build()?;

    match cli.command {
        Commands::Validate { file } => {
            let workflow = read_workflow(&file)?;
            let diagnostics = engine.validator().validate(&workflow);
            for diagnostic in &diagnostics {
                println!("{}", diagnostic);
            }
            println!("{}", validation_summary(&file, &workflow, &diagnostics)?);
        }

        Commands::Options { activity, workflow } => {
            let workflow = workflow.as_deref().map(read_workflow).transpose()?;
            let options = engine.resolve_options(&activity, workflow.as_ref());
            println!("{}", serde_json::to_string_pretty(&options)?);
        }

        Commands::Rules => {
            for (id, description) in engine.validator().rules() {
                println!("{:<22} {}", id, description);
            }
        }
    }

    Ok(())
}

/// One-line verdict for `validate`; fails when any diagnostic is an error
fn validation_summary(
    path: &Path,
    workflow: &WorkflowSpec,
    diagnostics: &[Diagnostic],
) -> Result<String> {
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    if errors > 0 {
        bail!("{}: {} error(s) found", path.display(), errors);
    }
    let warnings = diagnostics.iter().filter(|d| d.is_warning()).count();
    Ok(format!(
        "{}: workflow '{}' is valid ({} warning(s))",
        path.display(),
        workflow.name,
        warnings
    ))
}

fn read_workflow(path: &Path) -> Result<WorkflowSpec> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
    let workflow = WorkflowSpec::from_json(&source)
        .with_context(|| format!("Failed to parse workflow file {}", path.display()))?;
    Ok(workflow)
}
