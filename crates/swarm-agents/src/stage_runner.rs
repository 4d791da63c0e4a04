//! Stage Runner: bounded parallel spawning of agents for one
//! (role, prompt, settings) tuple, with staggered start, output masking,
//! MCP post-processing, caching and the schema/confidence gate.
//!
//! A generic step-loop-with-budget-and-cancellation shape, generalized
//! from "one worker looping over steps" to "N workers fanning out over
//! one stage".

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use swarm_core::{
    mcp, secret_scan, AgentStatus, EvidenceLedger, OutputCache, PipelineCallbacks,
    SecretScanMetadata,
};
use tracing::{info, warn};

use crate::config::ClientSet;
use crate::orchestrator::CancellationToken;
use crate::providers::{self, ResolvedProvider};
use crate::worktree_bridge::WorktreeBridge;

const DEFAULT_STAGGER_MS: u64 = 200;
const DEFAULT_MAX_RETRIES: u8 = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;
/// Process exit codes for SIGKILL (137 = 128+9) and SIGTERM (143 =
/// 128+15); never retried.
const NON_RETRYABLE_EXIT_CODES: [i32; 2] = [137, 143];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,
    pub role: String,
    pub label: String,
    pub provider: String,
    pub status: AgentStatus,
    pub worktree: Option<String>,
    pub output: String,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub finished_at: Option<chrono::DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl AgentInstance {
    fn new(role: &str, label: String, provider: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: role.to_string(),
            label,
            provider: provider.to_string(),
            status: AgentStatus::Pending,
            worktree: None,
            output: String::new(),
            started_at: None,
            finished_at: None,
            exit_code: None,
        }
    }
}

/// Structural heuristic schema check.
fn passes_schema(output: &str) -> bool {
    let trimmed = output.trim();
    !trimmed.is_empty() && trimmed.len() >= 20 && (trimmed.contains('\n') || trimmed.contains(':'))
}

/// Per-role thresholds.
pub fn role_threshold(role: &str) -> u8 {
    match role {
        "researcher" => 40,
        "planner" => 50,
        "coder" => 60,
        "validator" => 70,
        "security" => 80,
        "synthesizer" => 50,
        _ => 50,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceGate {
    pub confidence: u8,
    pub passed: bool,
    pub role: String,
    pub threshold: u8,
    /// Percentage of outputs that passed the structural schema check —
    /// feeds `StageConfidence.pass_rate` for the rerun decision.
    pub pass_rate: u8,
    pub all_passed: bool,
}

/// Compute the stage's confidence gate over every agent's final output
///.
fn compute_gate(role: &str, outputs: &[String]) -> ConfidenceGate {
    let threshold = role_threshold(role);
    let total_count = outputs.len();
    if total_count == 0 {
        return ConfidenceGate {
            confidence: 0,
            passed: false,
            role: role.to_string(),
            threshold,
            pass_rate: 0,
            all_passed: false,
        };
    }

    let valid: Vec<&String> = outputs.iter().filter(|o| passes_schema(o)).collect();
    let valid_count = valid.len();
    let total_len: usize = valid.iter().map(|o| o.len()).sum();

    let length_score = if valid_count == 0 {
        0.0
    } else {
        (100.0 * total_len as f64 / (valid_count as f64 * 500.0)).min(100.0)
    };
    let validity_score = 100.0 * valid_count as f64 / total_count as f64;
    let all_schemas_valid = valid_count == total_count;
    let schema_score = if all_schemas_valid { 100.0 } else { 50.0 };

    let confidence =
        (0.3 * length_score + 0.4 * validity_score + 0.3 * schema_score).round() as u8;

    ConfidenceGate {
        confidence,
        passed: confidence >= threshold,
        role: role.to_string(),
        threshold,
        pass_rate: validity_score.round() as u8,
        all_passed: all_schemas_valid,
    }
}

pub struct StageRequest<'a> {
    pub role: &'a str,
    pub count: u8,
    pub prompt: String,
    pub chats_per_agent: u8,
    pub max_runtime_seconds: u32,
    pub providers: &'a [ResolvedProvider],
    pub clients: &'a ClientSet,
    pub cache: &'a OutputCache,
    pub evidence: &'a EvidenceLedger,
    pub evidence_id: &'a str,
    pub callbacks: &'a dyn PipelineCallbacks,
    pub worktree_bridge: Option<&'a WorktreeBridge>,
    pub project_path: &'a Path,
    pub cancel: &'a CancellationToken,
}

pub struct StageOutcome {
    pub outputs: Vec<String>,
    pub agents: Vec<AgentInstance>,
    pub gate: ConfidenceGate,
}

/// Run `request.count` agents for one stage. Returns as soon
/// as every agent has reached a terminal status.
pub async fn run_stage(request: StageRequest<'_>) -> StageOutcome {
    let mut agents = Vec::new();

    for i in 0..request.count as usize {
        if request.cancel.is_cancelled() {
            let mut agent = AgentInstance::new(request.role, format!("{}-{}", request.role, i), "cancelled");
            agent.status = AgentStatus::Cancelled;
            request.callbacks.on_agent_status(&agent.id, AgentStatus::Cancelled, None);
            agents.push(agent);
            continue;
        }

        if i > 0 {
            tokio::time::sleep(Duration::from_millis(DEFAULT_STAGGER_MS)).await;
        }

        let provider = providers::pick(request.providers, i);
        let agent = run_single_agent(&request, i, provider).await;
        agents.push(agent);
    }

    let outputs: Vec<String> = agents
        .iter()
        .filter(|a| a.status == AgentStatus::Completed)
        .map(|a| a.output.clone())
        .collect();

    let gate = compute_gate(request.role, &outputs);
    if !gate.passed {
        warn!(
            role = request.role,
            confidence = gate.confidence,
            threshold = gate.threshold,
            "gate failed: {} (score {} < {}) — rerun {} stage or lower codeValidation.minScore",
            request.role,
            gate.confidence,
            gate.threshold,
            request.role
        );
        request.callbacks.on_agent_output(
            "system",
            &format!(
                "gate failed: {} (score {} < {}) — rerun {} stage or lower codeValidation.minScore",
                request.role, gate.confidence, gate.threshold, request.role
            ),
        );
    }

    StageOutcome { outputs, agents, gate }
}

async fn run_single_agent(
    request: &StageRequest<'_>,
    index: usize,
    provider: &ResolvedProvider,
) -> AgentInstance {
    let label = format!("{}-{}", request.role, index);
    let mut agent = AgentInstance::new(request.role, label, provider.id());

    let fp = swarm_core::cache::fingerprint(&request.prompt, provider.id());

    if let Some(hit) = request.cache.get(&fp) {
        if hit.confidence > 70 {
            info!(agent_id = %agent.id, provider = provider.id(), "cache hit, skipping spawn");
            agent.status = AgentStatus::Completed;
            agent.output = hit.output;
            agent.exit_code = Some(0);
            agent.started_at = Some(Utc::now());
            agent.finished_at = Some(Utc::now());
            request.callbacks.on_agent_status(&agent.id, AgentStatus::Completed, Some(0));
            return agent;
        }
    }

    request.callbacks.on_agent_status(&agent.id, AgentStatus::Spawning, None);
    agent.status = AgentStatus::Spawning;

    let worktree_path = match request.worktree_bridge {
        Some(bridge) => match bridge.create(&agent.id) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "worktree create failed, falling back to project path");
                None
            }
        },
        None => None,
    };
    agent.worktree = worktree_path.as_ref().map(|p| p.display().to_string());
    let cwd = worktree_path.clone().unwrap_or_else(|| request.project_path.to_path_buf());

    agent.started_at = Some(Utc::now());
    request.callbacks.on_agent_status(&agent.id, AgentStatus::Running, None);
    agent.status = AgentStatus::Running;

    let timeout = Duration::from_secs(request.max_runtime_seconds as u64);
    let mut attempt: u8 = 0;
    let (raw_output, exit_code) = loop {
        let chat_results = run_chats_concurrently(
            provider,
            &request.prompt,
            &cwd,
            request.chats_per_agent,
            request.clients,
            timeout,
        )
        .await;

        match chat_results {
            Ok(merged) => break (merged, 0),
            Err((partial, code)) => {
                if NON_RETRYABLE_EXIT_CODES.contains(&code) || attempt >= DEFAULT_MAX_RETRIES {
                    break (partial, code);
                }
                attempt += 1;
                warn!(agent_id = %agent.id, attempt, exit_code = code, "agent chat failed, retrying");
                tokio::time::sleep(Duration::from_millis(DEFAULT_RETRY_DELAY_MS)).await;
            }
        }
    };

    agent.finished_at = Some(Utc::now());
    agent.exit_code = Some(exit_code);

    if let Some(bridge) = request.worktree_bridge {
        if worktree_path.is_some() {
            let _ = bridge.merge_and_remove(&agent.id);
        }
    }

    if exit_code != 0 {
        agent.status = AgentStatus::Failed;
        agent.output = raw_output;
        request.callbacks.on_agent_status(&agent.id, AgentStatus::Failed, Some(exit_code));
        return agent;
    }

    let processed = process_output(&raw_output, request).await;
    agent.output = processed;
    agent.status = AgentStatus::Completed;

    if !agent.output.is_empty() {
        let confidence = swarm_core::jaccard_confidence(std::slice::from_ref(&agent.output));
        request.cache.put(&fp, provider.id(), agent.output.clone(), confidence);
    }

    let _ = request.evidence.append_cli_excerpt(request.evidence_id, &agent.id, &agent.output).await;

    request.callbacks.on_agent_output(&agent.id, &agent.output);
    request.callbacks.on_agent_status(&agent.id, AgentStatus::Completed, Some(0));
    agent
}

/// Run `chatsPerAgent` concurrent chats and merge them; any
/// chat failure marks the whole agent failed.
async fn run_chats_concurrently(
    provider: &ResolvedProvider,
    prompt: &str,
    cwd: &Path,
    chats_per_agent: u8,
    clients: &ClientSet,
    timeout: Duration,
) -> Result<String, (String, i32)> {
    let n = chats_per_agent.max(1);
    let chats = (0..n).map(|_| providers::run_chat(provider, prompt, cwd, clients, timeout));
    let results = futures::future::join_all(chats).await;

    let mut outputs = Vec::with_capacity(n as usize);
    for result in results {
        match result {
            Ok(outcome) if outcome.exit_code == 0 => outputs.push(outcome.output),
            Ok(outcome) => return Err((outcome.output, outcome.exit_code)),
            Err(msg) if msg == "TIMEOUT" => return Err((String::new(), 124)),
            Err(msg) => return Err((msg, 1)),
        }
    }

    Ok(providers::merge_chats(&outputs))
}

/// Output processing pipeline: secret scan → MCP post-process → (cache
/// write-back happens in the caller once confidence is computed).
async fn process_output(raw: &str, request: &StageRequest<'_>) -> String {
    let (masked, scan_report) = secret_scan::mask_secrets(raw);
    if scan_report.finding_count > 0 {
        let metadata = SecretScanMetadata {
            high_confidence_count: scan_report.high_confidence_count,
            finding_count: scan_report.finding_count,
            ignored_path_count: 0,
            findings: scan_report.findings.iter().map(|f| f.rule.clone()).collect(),
        };
        let _ = request.evidence.append_secret_scan_metadata(request.evidence_id, metadata).await;
    }

    let tool_calls = mcp::extract_tool_calls(&masked);
    if tool_calls.is_empty() {
        return masked;
    }

    let mut results = Vec::with_capacity(tool_calls.len());
    for call in &tool_calls {
        // MCP subprocess transport is an external collaborator;
        // this core only records a "not dispatched" placeholder result.
        let result = swarm_core::McpToolResult {
            server_id: call.server_id.clone(),
            tool_name: call.tool_name.clone(),
            result: None,
            error: Some("MCP subprocess transport not available in this build".to_string()),
        };
        request.callbacks.on_mcp_tool_result(
            &call.server_id,
            &call.tool_name,
            None,
            result.error.as_deref(),
        );
        results.push(result);
    }

    mcp::append_result_blocks(&masked, &results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_passes_for_well_formed_outputs() {
        let outputs = vec![
            "## Plan\nstep one\nstep two\n".repeat(20),
            "## Plan\nstep one\nstep two\n".repeat(20),
        ];
        let gate = compute_gate("planner", &outputs);
        assert!(gate.passed);
    }

    #[test]
    fn gate_fails_for_empty_outputs() {
        let gate = compute_gate("security", &[]);
        assert!(!gate.passed);
        assert_eq!(gate.confidence, 0);
    }

    #[test]
    fn gate_penalizes_invalid_outputs() {
        let outputs = vec!["x".to_string(), "## Section\nreal content here\n".to_string()];
        let gate = compute_gate("coder", &outputs);
        assert!(gate.confidence < 100);
    }

    #[test]
    fn role_thresholds_match_spec_table() {
        assert_eq!(role_threshold("researcher"), 40);
        assert_eq!(role_threshold("security"), 80);
    }
}
