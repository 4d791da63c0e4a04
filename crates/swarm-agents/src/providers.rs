//! Provider resolution and per-agent dispatch.
//!
//! The API-mode path follows a `CompletionsClient::builder()...build()`
//! then `.agent(model)...build()` then `.prompt(text).await` rig-core
//! dispatch pattern; the CLI-mode path follows an env-var-driven
//! defaults idiom.

use std::path::PathBuf;
use std::time::Duration;

use rig::completion::Prompt;
use swarm_core::Settings;
use tracing::{debug, warn};

use crate::config::ClientSet;

/// A provider resolved to one of the two dispatch strategies, or the
/// always-available fallback.
#[derive(Debug, Clone)]
pub enum ResolvedProvider {
    Cli { id: String, command_template: String },
    Api { id: String, model: String },
    Mock,
}

impl ResolvedProvider {
    pub fn id(&self) -> &str {
        match self {
            Self::Cli { id, .. } => id,
            Self::Api { id, .. } => id,
            Self::Mock => "mock",
        }
    }
}

/// Built-in CLI command templates, one `{PROMPT}` placeholder each. `custom_cli_command`
/// overrides every provider when set.
fn builtin_cli_template(provider: &str) -> String {
    match provider {
        "claude" => "claude --print --output-format text {PROMPT}".to_string(),
        "gemini" => "gemini --prompt {PROMPT}".to_string(),
        "codex" => "codex exec {PROMPT}".to_string(),
        other => format!("{other} {{PROMPT}}"),
    }
}

fn cli_binary_of(template: &str) -> &str {
    template.split_whitespace().next().unwrap_or(template)
}

fn api_model_for(provider: &str) -> &'static str {
    match provider {
        "chatgpt" => "gpt-4o",
        "gemini-api" => "gemini-1.5-pro",
        "claude" => "claude-3-5-sonnet-latest",
        _ => "gpt-4o",
    }
}

/// Probe `settings.enabled_providers` in order: prefer API mode when an
/// API key is configured for that provider, otherwise probe the CLI
/// binary; drop providers with neither. Falls back to a single
/// [`ResolvedProvider::Mock`] when nothing is installed.
pub async fn resolve(settings: &Settings) -> Vec<ResolvedProvider> {
    let mut resolved = Vec::new();

    for provider in &settings.enabled_providers {
        let is_api_backend = matches!(provider.as_str(), "chatgpt" | "gemini-api" | "claude");
        if is_api_backend && settings.provider_api_keys.contains_key(provider) {
            resolved.push(ResolvedProvider::Api {
                id: provider.clone(),
                model: api_model_for(provider).to_string(),
            });
            continue;
        }

        let template = settings
            .custom_cli_command
            .clone()
            .unwrap_or_else(|| builtin_cli_template(provider));
        let binary = cli_binary_of(&template).to_string();
        if check_cli_installed(&binary).await {
            resolved.push(ResolvedProvider::Cli {
                id: provider.clone(),
                command_template: template,
            });
        } else {
            debug!(provider, "CLI not installed, dropping provider");
        }
    }

    if resolved.is_empty() {
        warn!("no providers resolved, registering mock provider fallback");
        resolved.push(ResolvedProvider::Mock);
    }

    resolved
}

async fn check_cli_installed(binary: &str) -> bool {
    tokio::process::Command::new(binary)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Round-robin provider selection for agent `i`.
pub fn pick<'a>(providers: &'a [ResolvedProvider], i: usize) -> &'a ResolvedProvider {
    &providers[i % providers.len()]
}

#[derive(Debug)]
pub struct ChatOutcome {
    pub output: String,
    pub exit_code: i32,
}

/// Run a single chat against a resolved provider. Returns the
/// raw, unmasked output; the stage runner applies secret scanning and MCP
/// post-processing afterward. `cwd` is the agent's worktree (or
/// `projectPath` when worktree isolation is off or failed) — CLI-mode
/// providers inherit it so file edits land in the right tree.
pub async fn run_chat(
    provider: &ResolvedProvider,
    prompt: &str,
    cwd: &std::path::Path,
    clients: &ClientSet,
    timeout: Duration,
) -> Result<ChatOutcome, String> {
    let fut = match provider {
        ResolvedProvider::Cli { command_template, .. } => run_cli_chat(command_template, prompt, cwd),
        ResolvedProvider::Api { id, model } => run_api_chat(id, model, prompt, clients),
        ResolvedProvider::Mock => run_mock_chat(prompt),
    };

    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err("TIMEOUT".to_string()),
    }
}

async fn run_cli_chat(
    command_template: &str,
    prompt: &str,
    cwd: &std::path::Path,
) -> Result<ChatOutcome, String> {
    let prompt_file = tempfile::NamedTempFile::new().map_err(|e| format!("temp file create failed: {e}"))?;
    std::fs::write(prompt_file.path(), prompt).map_err(|e| format!("temp file write failed: {e}"))?;

    let command = command_template.replace("{PROMPT}", &prompt_file.path().display().to_string());
    let parts = shlex::split(&command).ok_or_else(|| "failed to tokenize command template".to_string())?;
    let (binary, args) = parts.split_first().ok_or_else(|| "empty command template".to_string())?;

    let mut cmd = tokio::process::Command::new(binary);
    cmd.args(args);
    cmd.current_dir(cwd);
    for (var, env_name) in [
        ("OPENAI_API_KEY", "OPENAI_API_KEY"),
        ("GOOGLE_API_KEY", "GOOGLE_API_KEY"),
        ("ANTHROPIC_API_KEY", "ANTHROPIC_API_KEY"),
        ("GITHUB_TOKEN", "GITHUB_TOKEN"),
    ] {
        if let Ok(val) = std::env::var(var) {
            cmd.env(env_name, val);
        }
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let output = cmd.output().await.map_err(|e| format!("spawn failed: {e}"))?;
    // Combined stdout+stderr approximates a pseudo-terminal capture; a
    // real PTY allocation needs a crate outside this dependency stack.
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        combined.push('\n');
        combined.push_str(&stderr);
    }

    Ok(ChatOutcome {
        output: combined,
        exit_code: output.status.code().unwrap_or(-1),
    })
}

async fn run_api_chat(
    provider_id: &str,
    model: &str,
    prompt: &str,
    clients: &ClientSet,
) -> Result<ChatOutcome, String> {
    let client = clients
        .get(provider_id)
        .ok_or_else(|| format!("no API client configured for provider {provider_id}"))?;

    let agent = client
        .agent(model)
        .name(provider_id)
        .description("swarm stage agent")
        .temperature(0.2)
        .build();

    match agent.prompt(prompt).await {
        Ok(text) => Ok(ChatOutcome { output: text, exit_code: 0 }),
        Err(e) => Err(format!("API call failed: {e}")),
    }
}

async fn run_mock_chat(prompt: &str) -> Result<ChatOutcome, String> {
    let snippet: String = prompt.chars().take(120).collect();
    Ok(ChatOutcome {
        output: format!("[mock provider] placeholder response for: {snippet}"),
        exit_code: 0,
    })
}

/// Merge `chatsPerAgent` independent chat outputs with
/// `--- chat k/K ---` separators.
pub fn merge_chats(outputs: &[String]) -> String {
    if outputs.len() == 1 {
        return outputs[0].clone();
    }
    let total = outputs.len();
    outputs
        .iter()
        .enumerate()
        .map(|(i, o)| format!("--- chat {}/{} ---\n{}", i + 1, total, o))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Temp-directory-backed worktree fallback path when worktree isolation
/// is disabled or fails.
pub fn fallback_path(project_path: &std::path::Path) -> PathBuf {
    project_path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_chat_echoes_a_placeholder_containing_the_prompt() {
        let outcome = run_mock_chat("hello world").await.unwrap();
        assert!(outcome.output.contains("hello world"));
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    fn merge_chats_single_output_is_unwrapped() {
        assert_eq!(merge_chats(&["solo".to_string()]), "solo");
    }

    #[test]
    fn merge_chats_multiple_outputs_use_separator() {
        let merged = merge_chats(&["a".to_string(), "b".to_string()]);
        assert!(merged.contains("--- chat 1/2 ---"));
        assert!(merged.contains("--- chat 2/2 ---"));
    }

    #[test]
    fn pick_wraps_round_robin() {
        let providers = vec![ResolvedProvider::Mock, ResolvedProvider::Mock];
        assert_eq!(pick(&providers, 2).id(), "mock");
    }

    #[tokio::test]
    async fn resolve_falls_back_to_mock_when_nothing_installed() {
        let mut settings = Settings::default();
        settings.enabled_providers = vec!["definitely-not-a-real-cli-xyz".to_string()];
        let resolved = resolve(&settings).await;
        assert_eq!(resolved.len(), 1);
        assert!(matches!(resolved[0], ResolvedProvider::Mock));
    }
}
