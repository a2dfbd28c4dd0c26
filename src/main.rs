//! Contract Drafter CLI
//!
//! Command-line driver for the drafting workflow. Project state lives in the
//! configured projects directory, so each command picks up where the last
//! one stopped.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use contract_drafter::{
    ClaudeGenerator, DrafterConfig, Idris2Compiler, JsonFileRegistry, ListingRenderer,
    ProjectInputs, ProjectOrchestrator, Services, StatusSnapshot, UserAction,
};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "contract-drafter.toml";

#[derive(Parser)]
#[command(name = "contract-drafter")]
#[command(version, about = "Verified contract drafting workflow")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a project from a YAML manifest or command-line inputs
    Init {
        name: String,
        /// YAML manifest with prompt, reference_docs and document_type
        #[arg(long, conflicts_with_all = ["prompt", "reference"])]
        manifest: Option<PathBuf>,
        #[arg(long)]
        prompt: Option<String>,
        /// Reference document (repeatable)
        #[arg(long = "reference")]
        reference: Vec<String>,
        #[arg(long, default_value = "contract")]
        document_type: String,
    },
    /// Perform one workflow step
    Advance {
        name: String,
        /// Deadline in seconds for every external call of this step
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Advance until the project needs a decision; Ctrl-C stops the project
    /// when its phase allows it
    Run { name: String },
    /// Show project status
    Status {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// List all projects
    List,
    /// Print the current draft, rendering it if needed
    Draft {
        name: String,
        #[arg(long, value_enum, default_value_t = DraftFormat::Markdown)]
        format: DraftFormat,
    },
    /// Resolve a stalled project: retry, fallback, reanalyze, manual, abort
    Action { name: String, action: String },
    /// Supply corrected domain source from a file
    Source { name: String, file: PathBuf },
    /// Submit feedback on the current draft
    Feedback { name: String, text: String },
    /// Finalize the current draft
    Finalize { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum DraftFormat {
    Text,
    Markdown,
    Csv,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> contract_drafter::Result<DrafterConfig> {
    match path {
        Some(path) => DrafterConfig::load(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            DrafterConfig::load(Path::new(DEFAULT_CONFIG_FILE))
        }
        None => Ok(DrafterConfig::default()),
    }
}

fn build_orchestrator(config: &DrafterConfig) -> ProjectOrchestrator {
    let registry = Arc::new(JsonFileRegistry::new(&config.storage.projects_dir));
    let services = Services::new(
        Arc::new(Idris2Compiler::from_config(&config.compiler)),
        Arc::new(
            ClaudeGenerator::with_cli_path(&config.generator.command)
                .with_model(config.generator.model.clone()),
        ),
        Arc::new(ListingRenderer::new()),
    );
    ProjectOrchestrator::new(registry, services, config)
}

async fn run(cli: Cli) -> contract_drafter::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let orchestrator = build_orchestrator(&config);

    match cli.command {
        Command::Init {
            name,
            manifest,
            prompt,
            reference,
            document_type,
        } => {
            let inputs = match manifest {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)?;
                    serde_yaml::from_str::<ProjectInputs>(&content).map_err(|e| {
                        contract_drafter::Error::Config(format!(
                            "invalid manifest {}: {}",
                            path.display(),
                            e
                        ))
                    })?
                }
                None => ProjectInputs {
                    document_type,
                    prompt: prompt.unwrap_or_default(),
                    reference_docs: reference,
                },
            };
            let status = orchestrator.create(&name, inputs).await?;
            print_status(&status);
        }
        Command::Advance { name, timeout } => {
            let status = match timeout {
                Some(secs) => {
                    orchestrator
                        .advance_with_timeout(&name, std::time::Duration::from_secs(secs))
                        .await?
                }
                None => orchestrator.advance(&name).await?,
            };
            print_status(&status);
        }
        Command::Run { name } => {
            let mut status = orchestrator.status(&name).await?;
            while status.phase.runs_unattended() {
                let step = orchestrator.advance(&name);
                tokio::pin!(step);
                tokio::select! {
                    result = &mut step => status = result?,
                    _ = tokio::signal::ctrl_c() => {
                        tracing::warn!(project = %name, "interrupt received, stopping project");
                        let (stepped, cancelled) = tokio::join!(&mut step, orchestrator.cancel(&name));
                        if let Err(e) = stepped {
                            tracing::warn!(project = %name, error = %e, "interrupted step failed");
                        }
                        print_status(&orchestrator.status(&name).await?);
                        return cancelled;
                    }
                }
            }
            print_status(&status);
        }
        Command::Status { name, json } => {
            let status = orchestrator.status(&name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        Command::List => {
            let projects = orchestrator.list().await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for p in projects {
                println!(
                    "{:<32} {:<16} {:>5.1}%  v{}{}",
                    p.name,
                    p.phase.to_string(),
                    p.progress * 100.0,
                    p.version,
                    if p.has_error { "  (needs decision)" } else { "" }
                );
            }
        }
        Command::Draft { name, format } => {
            let draft = orchestrator.generate_draft(&name).await?;
            let body = match format {
                DraftFormat::Text => draft.text,
                DraftFormat::Markdown => draft.markdown,
                DraftFormat::Csv => draft.csv,
            };
            match body {
                Some(body) => println!("{}", body),
                None => eprintln!("draft v{} has no body in that format", draft.version),
            }
        }
        Command::Action { name, action } => {
            let action: UserAction = action.parse()?;
            let status = orchestrator.apply_user_action(&name, action).await?;
            print_status(&status);
        }
        Command::Source { name, file } => {
            let source = std::fs::read_to_string(&file)?;
            let status = orchestrator.supply_source(&name, &source).await?;
            print_status(&status);
        }
        Command::Feedback { name, text } => {
            let status = orchestrator.submit_feedback(&name, &text).await?;
            print_status(&status);
        }
        Command::Finalize { name } => {
            let status = orchestrator.finalize(&name).await?;
            print_status(&status);
        }
    }

    Ok(())
}

fn print_status(status: &StatusSnapshot) {
    println!("Project: {} (v{})", status.name, status.version);
    println!("Phase:   {}", status.phase);
    println!("Progress: {:.0}%", status.progress * 100.0);
    if status.attempt_count > 0 {
        println!("Attempts: {}", status.attempt_count);
    }
    if status.completed {
        println!("Status:  completed");
    } else if status.stopped {
        println!("Status:  stopped");
    }
    if let Some(error) = &status.active_error {
        println!();
        println!("{}", error);
        if status.awaiting_manual_source {
            println!("Waiting for corrected source (`contract-drafter source`).");
        }
    }
}
