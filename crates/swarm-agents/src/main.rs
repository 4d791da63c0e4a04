use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use swarm_core::events::{AgentStatus, PipelineCallbacks};
use swarm_core::guardrail::PipelineMode;
use tracing::info;

use swarm_agent::config;
use swarm_agent::orchestrator::{Orchestrator, PipelineRequest};

/// Multi-agent code orchestration pipeline (chat / swarm / project mode).
#[derive(Parser, Debug)]
#[command(name = "swarm-agent", version, about)]
struct Cli {
    /// The task prompt to run through the pipeline.
    prompt: String,

    /// Force a specific mode instead of letting the orchestrator detect one.
    #[arg(long, value_parser = ["chat", "swarm", "project"])]
    mode: Option<String>,

    /// Path to the project/repo the pipeline operates on (defaults to cwd).
    #[arg(long)]
    project_path: Option<PathBuf>,

    /// Path to a TOML settings file (defaults to ./swarm.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_mode(raw: &str) -> PipelineMode {
    match raw {
        "chat" => PipelineMode::Chat,
        "swarm" => PipelineMode::Swarm,
        "project" => PipelineMode::Project,
        _ => unreachable!("clap value_parser restricts to known modes"),
    }
}

/// Logs each stage event to stdout via `tracing`; the default callback
/// sink for a one-shot CLI run.
struct LoggingCallbacks;

impl PipelineCallbacks for LoggingCallbacks {
    fn on_agent_output(&self, agent_id: &str, chunk: &str) {
        info!(agent_id, "{chunk}");
    }

    fn on_agent_status(&self, agent_id: &str, status: AgentStatus, exit_code: Option<i32>) {
        info!(agent_id, %status, exit_code, "agent status");
    }

    fn on_mcp_tool_result(
        &self,
        server_id: &str,
        tool_name: &str,
        result: Option<&str>,
        error: Option<&str>,
    ) {
        info!(server_id, tool_name, result, error, "mcp tool result");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.or_else(|| {
        let default = config::default_config_path();
        default.exists().then_some(default)
    });
    let settings = config::load(config_path.as_deref())?;
    let project_path = cli.project_path.unwrap_or(std::env::current_dir()?);
    let mode = cli.mode.as_deref().map(parse_mode);

    info!(
        providers = ?settings.enabled_providers,
        project_path = %project_path.display(),
        mode = ?mode,
        "swarm-agent starting"
    );

    let orchestrator = Orchestrator::new(&settings)?;
    let request = PipelineRequest {
        prompt: cli.prompt,
        settings,
        project_path,
        mode,
        callbacks: Arc::new(LoggingCallbacks) as Arc<dyn PipelineCallbacks>,
    };

    let result = orchestrator.run(request).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.validation_passed {
        std::process::exit(1);
    }
    Ok(())
}
