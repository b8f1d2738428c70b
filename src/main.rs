// ABOUTME: Entry point for the maestro binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs or validates orchestrations.

mod loader;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use maestro_agent::{InMemoryKnowledgeBase, create_completion_client};
use maestro_core::{Run, RunStatus};
use maestro_engine::{Engine, EngineConfig, TracingObserver};

/// Multi-agent orchestration: plan, delegate to specialists, consolidate.
#[derive(Parser, Debug)]
#[command(name = "maestro")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one orchestration run and write the resulting Run as JSON.
    Run(RunArgs),

    /// List and validate agent definitions.
    Agents {
        /// Agent definitions (YAML or JSON)
        #[arg(long, value_name = "PATH")]
        agents: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("maestro=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Agents { agents } => list_agents(&agents),
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Agent definitions (YAML or JSON)
    #[arg(long, value_name = "PATH")]
    agents: PathBuf,

    /// Id of the orchestrator agent to run
    #[arg(long, value_name = "ID")]
    orchestrator: String,

    /// The goal to accomplish
    #[arg(long)]
    goal: String,

    /// Shared run context, a JSON or YAML object
    #[arg(long, value_name = "PATH")]
    context: Option<PathBuf>,

    /// Knowledge entries for RAG-enabled agents (YAML or JSON)
    #[arg(long, value_name = "PATH")]
    knowledge: Option<PathBuf>,

    /// Where to write the Run JSON (stdout when omitted)
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let agents = loader::load_agents(&args.agents)?;
    for problem in loader::validate_agents(&agents) {
        tracing::warn!("{}", problem);
    }

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let provider = std::env::var("MAESTRO_PROVIDER").unwrap_or_else(|_| "openai".to_string());
    let client = create_completion_client(&provider)?;

    let mut engine = Engine::new(client, config);
    if let Some(path) = &args.knowledge {
        let entries = loader::load_knowledge(path)?;
        tracing::info!(entries = entries.len(), "knowledge loaded");
        engine = engine.with_knowledge(Arc::new(InMemoryKnowledgeBase::new(entries)));
    }

    let mut run = Run::new(&args.orchestrator, &args.goal);
    if let Some(path) = &args.context {
        run = run.with_context(loader::load_context(path)?);
    }

    tracing::info!(run_id = %run.id, orchestrator = %args.orchestrator, "starting run");
    let run = engine.run_to_completion(run, &agents, &TracingObserver).await;

    let json = serde_json::to_string_pretty(&run).context("failed to serialize run")?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "run written");
        }
        None => println!("{}", json),
    }

    if let Some(final_output) = &run.final_output {
        eprintln!("\n{}", final_output);
    }
    if run.status == RunStatus::Failed {
        anyhow::bail!("run {} failed", run.id);
    }
    Ok(())
}

fn list_agents(path: &std::path::Path) -> anyhow::Result<()> {
    let agents = loader::load_agents(path)?;
    for agent in &agents {
        let kind = if agent.is_orchestrator() {
            format!(
                "orchestrator -> [{}] ({:?})",
                agent.allowed_agents.join(", "),
                agent.orchestration().execution_mode
            )
        } else {
            "specialist".to_string()
        };
        println!("{:<20} {:<24} {:<28} {}", agent.id, agent.name, agent.model, kind);
    }

    let problems = loader::validate_agents(&agents);
    if problems.is_empty() {
        println!("\n{} agent(s), no problems found", agents.len());
        return Ok(());
    }
    for problem in &problems {
        println!("problem: {}", problem);
    }
    anyhow::bail!("{} problem(s) found in {}", problems.len(), path.display())
}
