//! `switchyard` command line: discover agents, run workflow plans, and serve
//! echo workers for local testing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{AgentCard, SwitchyardConfig};
use switchyard_orchestrator::{Orchestrator, WorkflowPlan, WorkflowStatus};
use switchyard_worker::{DelayedHandler, EchoHandler, TaskHandler, WorkerServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchyard", about = "Switchyard: resilient orchestration of networked agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "switchyard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every configured agent and print the cards that answered
    Discover,
    /// Discover agents, then run a workflow plan and print its result
    Run {
        /// Path to the TOML workflow plan
        #[arg(short, long)]
        plan: PathBuf,
    },
    /// Serve a local echo worker
    Worker {
        /// Agent id to advertise
        #[arg(long)]
        id: String,
        /// Port to listen on
        #[arg(short, long)]
        port: u16,
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Skills to advertise (repeatable)
        #[arg(long = "skill")]
        skills: Vec<String>,
        /// Hold every answer back this long
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Discover => {
            let orchestrator = Orchestrator::from_config(load_config(&cli.config)?)?;
            let report = orchestrator.discover().await;

            let mut agents = orchestrator.registry().list();
            agents.sort_by(|a, b| a.id.cmp(&b.id));
            let failed: Vec<serde_json::Value> = report
                .failed
                .iter()
                .map(|(endpoint, e)| {
                    serde_json::json!({"endpoint": endpoint, "kind": e.kind, "message": e.message})
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "agents": agents,
                    "failed": failed,
                }))?
            );
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Run { plan } => {
            let plan = WorkflowPlan::load(&plan)?;
            let orchestrator = Arc::new(Orchestrator::from_config(load_config(&cli.config)?)?);
            orchestrator.discover().await;
            let maintenance = orchestrator.clone().spawn_maintenance();

            let result = orchestrator.dispatch(&plan).await?;
            maintenance.abort();

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "workflow": result,
                    "agents": orchestrator.monitor().to_json(),
                }))?
            );
            Ok(match result.status {
                WorkflowStatus::Failed => ExitCode::FAILURE,
                WorkflowStatus::Complete | WorkflowStatus::Partial => ExitCode::SUCCESS,
            })
        }
        Commands::Worker {
            id,
            port,
            host,
            skills,
            delay_ms,
        } => {
            let mut card = AgentCard::new(id.clone(), id, format!("http://{host}:{port}"))
                .with_description("Echo worker");
            for skill in skills {
                card = card.with_skill(skill);
            }
            let handler: Arc<dyn TaskHandler> = match delay_ms {
                Some(ms) => Arc::new(DelayedHandler::new(EchoHandler, Duration::from_millis(ms))),
                None => Arc::new(EchoHandler),
            };

            let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
            WorkerServer::serve(card, handler, listener, async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down worker");
            })
            .await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: &std::path::Path) -> anyhow::Result<SwitchyardConfig> {
    let config = SwitchyardConfig::load(path)?;
    info!(
        path = %path.display(),
        agents = config.agents.len(),
        "Configuration loaded"
    );
    Ok(config)
}
