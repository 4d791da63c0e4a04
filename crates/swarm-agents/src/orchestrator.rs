//! Orchestrator: mode detection and the chat/swarm/project
//! mode runners, tying the stage runner, confidence engine, guardrail
//! policy and ticket manager together into one pipeline run.
//!
//! A mode-dispatching loop threads a cancellation flag and a budget
//! through every step, deciding deterministically and accumulating
//! failures rather than short-circuiting, generalized from "one mode,
//! one agent" to "three modes, N agents fanned out across stages".

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use swarm_core::guardrail::{GuardrailInput, GuardrailPolicy, PipelineKind, PipelineMode, RefusalPayload};
use swarm_core::{
    best_of_n, fact_check_penalty, jaccard_confidence, should_rerun_stage, weighted_final_confidence,
    Actor, ActorRole, AgentStatus, Complexity, ConfidenceMethod, CoreError, CoreResult, EvidenceLedger,
    OutputCache, PipelineCallbacks, Settings, StageConfidence, TicketLevel, TicketManager,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ClientSet;
use crate::providers::{self, ResolvedProvider};
use crate::stage_runner::{self, AgentInstance, StageOutcome, StageRequest};
use crate::worktree_bridge::WorktreeBridge;

/// Shared cancellation flag threaded through every stage so a caller can
/// ask an in-flight pipeline run to stop between stages or attempts.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PipelineRequest {
    pub prompt: String,
    pub settings: Settings,
    pub project_path: PathBuf,
    pub mode: Option<PipelineMode>,
    pub callbacks: Arc<dyn PipelineCallbacks>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwarmResult {
    pub final_output: String,
    pub confidence: u8,
    pub agents: Vec<AgentInstance>,
    pub sources: Vec<String>,
    pub validation_passed: bool,
}

const GUARDRAIL_MIN_CONFIDENCE: u8 = 40;
const GUARDRAIL_MIN_EVIDENCE_COUNT: usize = 1;
const MAX_CONTINUOUS_ATTEMPTS: u8 = 3;
const TICKET_ESCALATION_THRESHOLD: u32 = 3;

static SOURCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://[^\s)\]]+").unwrap());

fn extract_sources(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    SOURCE_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')']).to_string())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Mode detection: keyword and length heuristics, checked in
/// project → swarm → chat priority order.
pub fn detect_mode(prompt: &str) -> PipelineMode {
    const PROJECT_KEYWORDS: [&str; 5] =
        ["build", "create app", "full project", "application", "implement system"];
    const SWARM_KEYWORDS: [&str; 7] =
        ["refactor", "review", "fix", "optimize", "test", "security audit", "code"];

    let lower = prompt.to_lowercase();
    if prompt.len() > 200 && PROJECT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return PipelineMode::Project;
    }
    if SWARM_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return PipelineMode::Swarm;
    }
    PipelineMode::Chat
}

/// Split a planner's output into per-section work items on markdown
/// headers or numbered list items.
fn split_into_sections(text: &str) -> Vec<String> {
    static HEADER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^(#{1,6}\s+.+|\d+[.)]\s+.+)$").unwrap());

    let starts: Vec<usize> = HEADER.find_iter(text).map(|m| m.start()).collect();
    let mut sections = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        let section = text[start..end].trim();
        if !section.is_empty() {
            sections.push(section.to_string());
        }
    }
    sections
}

pub struct Orchestrator {
    clients: ClientSet,
    cache: OutputCache,
    evidence: EvidenceLedger,
    tickets: Mutex<TicketManager>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            clients: ClientSet::from_settings(settings)?,
            cache: OutputCache::default(),
            evidence: EvidenceLedger::new(),
            tickets: Mutex::new(TicketManager::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, request: PipelineRequest) -> SwarmResult {
        match self.run_inner(&request).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "pipeline failed");
                request.callbacks.on_agent_output("system", &err.as_system_line());
                SwarmResult {
                    final_output: format!("Pipeline failed: {}", err.message),
                    confidence: 0,
                    agents: Vec::new(),
                    sources: Vec::new(),
                    validation_passed: false,
                }
            }
        }
    }

    async fn run_inner(&self, request: &PipelineRequest) -> CoreResult<SwarmResult> {
        let mode = request.mode.unwrap_or_else(|| detect_mode(&request.prompt));
        info!(?mode, "dispatching pipeline");

        let resolved_providers = providers::resolve(&request.settings).await;
        let evidence_id = self.evidence.create_pipeline_evidence(&request.project_path).await;

        let worktree_bridge = if request.settings.worktree_isolation {
            WorktreeBridge::new(request.settings.worktree_base(), &request.project_path).ok()
        } else {
            None
        };
        if request.settings.worktree_isolation && worktree_bridge.is_none() {
            warn!("worktree isolation requested but the project path is not a git repo, falling back to projectPath");
        }

        let result = match mode {
            PipelineMode::Chat => self.run_chat_mode(request, &resolved_providers, &evidence_id).await?,
            PipelineMode::Swarm => {
                self.run_swarm_mode(request, &resolved_providers, worktree_bridge.as_ref(), &evidence_id)
                    .await?
            }
            PipelineMode::Project => {
                self.run_project_mode(request, &resolved_providers, worktree_bridge.as_ref(), &evidence_id)
                    .await?
            }
        };

        let _ = self.evidence.append_diff_summary(&evidence_id, &request.project_path).await;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_one_stage(
        &self,
        role: &str,
        count: u8,
        prompt: String,
        request: &PipelineRequest,
        resolved_providers: &[ResolvedProvider],
        worktree_bridge: Option<&WorktreeBridge>,
        evidence_id: &str,
    ) -> StageOutcome {
        stage_runner::run_stage(StageRequest {
            role,
            count,
            prompt,
            chats_per_agent: request.settings.chats_per_agent,
            max_runtime_seconds: request.settings.max_runtime_seconds,
            providers: resolved_providers,
            clients: &self.clients,
            cache: &self.cache,
            evidence: &self.evidence,
            evidence_id,
            callbacks: request.callbacks.as_ref(),
            worktree_bridge,
            project_path: &request.project_path,
            cancel: &self.cancel,
        })
        .await
    }

    fn stage_confidence(outcome: &StageOutcome) -> StageConfidence {
        StageConfidence {
            confidence: jaccard_confidence(&outcome.outputs),
            method: ConfidenceMethod::Jaccard,
            pass_rate: outcome.gate.pass_rate,
            all_passed: outcome.gate.all_passed,
        }
    }

    /// Run a stage and, if its confidence falls below the auto-rerun
    /// threshold, rerun it exactly once.
    /// Applied uniformly to all five graded stages, not just validation.
    #[allow(clippy::too_many_arguments)]
    async fn run_graded_stage(
        &self,
        role: &str,
        count: u8,
        prompt: String,
        request: &PipelineRequest,
        resolved_providers: &[ResolvedProvider],
        worktree_bridge: Option<&WorktreeBridge>,
        evidence_id: &str,
    ) -> (StageOutcome, u8) {
        let mut outcome = self
            .run_one_stage(role, count, prompt.clone(), request, resolved_providers, worktree_bridge, evidence_id)
            .await;
        let mut conf = Self::stage_confidence(&outcome);

        if should_rerun_stage(&conf, request.settings.auto_rerun_threshold) {
            info!(role, confidence = conf.confidence, "stage confidence below threshold, rerunning once");
            outcome = self
                .run_one_stage(role, count, prompt, request, resolved_providers, worktree_bridge, evidence_id)
                .await;
            conf = Self::stage_confidence(&outcome);
        }

        let confidence = conf.confidence;
        (outcome, confidence)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_guardrail(
        &self,
        request: &PipelineRequest,
        mode: PipelineMode,
        confidence: u8,
        evidence_count: usize,
        candidate_output: &str,
        upstream_validation_passed: bool,
    ) -> Option<RefusalPayload> {
        let input = GuardrailInput::new(
            GUARDRAIL_MIN_CONFIDENCE,
            GUARDRAIL_MIN_EVIDENCE_COUNT,
            confidence,
            evidence_count,
            candidate_output,
            upstream_validation_passed,
            PipelineKind::Orchestrator,
            mode,
            &request.prompt,
        );
        let result = GuardrailPolicy::evaluate(&input);
        if result.passed {
            None
        } else {
            result.refusal
        }
    }

    fn refused_result(&self, refusal: RefusalPayload, agents: Vec<AgentInstance>) -> SwarmResult {
        let final_output = serde_json::to_string(&refusal).unwrap_or_else(|_| refusal.message.clone());
        SwarmResult {
            final_output,
            confidence: refusal.confidence,
            agents,
            sources: Vec::new(),
            validation_passed: false,
        }
    }

    async fn run_chat_mode(
        &self,
        request: &PipelineRequest,
        resolved_providers: &[ResolvedProvider],
        evidence_id: &str,
    ) -> CoreResult<SwarmResult> {
        let outcome = self
            .run_one_stage("coder", 1, request.prompt.clone(), request, resolved_providers, None, evidence_id)
            .await;

        let final_output = outcome.outputs.first().cloned().unwrap_or_default();
        let sources = extract_sources(&final_output);
        let confidence: u8 = 50;
        let validation_passed = outcome.agents.iter().any(|a| a.status == AgentStatus::Completed);

        if let Some(refusal) = self.evaluate_guardrail(
            request, PipelineMode::Chat, confidence, sources.len(), &final_output, validation_passed,
        ) {
            return Ok(self.refused_result(refusal, outcome.agents));
        }

        Ok(SwarmResult { final_output, confidence, agents: outcome.agents, sources, validation_passed })
    }

    async fn run_swarm_mode(
        &self,
        request: &PipelineRequest,
        resolved_providers: &[ResolvedProvider],
        worktree_bridge: Option<&WorktreeBridge>,
        evidence_id: &str,
    ) -> CoreResult<SwarmResult> {
        let mut all_agents: Vec<AgentInstance> = Vec::new();
        let mut attempt: u8 = 0;

        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Ok(SwarmResult {
                    final_output: String::new(),
                    confidence: 0,
                    agents: all_agents,
                    sources: Vec::new(),
                    validation_passed: false,
                });
            }

            let mut result = self
                .run_swarm_attempt(request, resolved_providers, worktree_bridge, evidence_id)
                .await?;
            all_agents.append(&mut result.agents);
            result.agents = all_agents.clone();

            let keep_going = request.settings.continuous_mode
                && result.confidence < request.settings.auto_rerun_threshold
                && attempt < MAX_CONTINUOUS_ATTEMPTS
                && result.final_output != "refused";

            if !keep_going {
                return Ok(result);
            }
            info!(attempt, confidence = result.confidence, "continuous mode: rerunning full pipeline");
        }
    }

    async fn run_swarm_attempt(
        &self,
        request: &PipelineRequest,
        resolved_providers: &[ResolvedProvider],
        worktree_bridge: Option<&WorktreeBridge>,
        evidence_id: &str,
    ) -> CoreResult<SwarmResult> {
        let mut agents = Vec::new();

        let researcher_count = request.settings.parallel_counts.get("researcher").max(1);
        let (research, research_confidence) = self
            .run_graded_stage(
                "researcher", researcher_count,
                format!(
                    "Research depth: {:?}. Gather the background needed for this task.\nTask: {}",
                    request.settings.research_depth, request.prompt
                ),
                request, resolved_providers, worktree_bridge, evidence_id,
            )
            .await;
        agents.extend(research.agents);
        let research_context = research.outputs.join("\n\n");

        let planner_count = request.settings.parallel_counts.get("planner").max(1);
        let (plan, plan_confidence) = self
            .run_graded_stage(
                "planner", planner_count,
                format!(
                    "Produce an implementation plan.\nResearch findings:\n{research_context}\n\nTask: {}",
                    request.prompt
                ),
                request, resolved_providers, worktree_bridge, evidence_id,
            )
            .await;
        agents.extend(plan.agents.clone());
        let winning_plan = best_of_n(&plan.outputs)
            .and_then(|idx| plan.outputs.get(idx).cloned())
            .unwrap_or_default();

        let coder_count = request.settings.parallel_counts.get("coder").max(1);
        let (code, code_confidence) = self
            .run_graded_stage(
                "coder", coder_count,
                format!("Implement the plan below.\n{winning_plan}\n\nTask: {}", request.prompt),
                request, resolved_providers, worktree_bridge, evidence_id,
            )
            .await;
        agents.extend(code.agents.clone());
        let code_context = code.outputs.join("\n\n");

        let validator_count = request.settings.parallel_counts.get("validator").max(1);
        let (validate, validate_confidence) = self
            .run_graded_stage(
                "validator", validator_count,
                format!(
                    "Validate the implementation below against the plan.\nPlan:\n{winning_plan}\n\nImplementation:\n{code_context}"
                ),
                request, resolved_providers, worktree_bridge, evidence_id,
            )
            .await;
        agents.extend(validate.agents.clone());

        let security_count = request.settings.parallel_counts.get("security").max(1);
        let (security, security_confidence) = self
            .run_graded_stage(
                "security", security_count,
                format!("Security-review the implementation below.\n{code_context}"),
                request, resolved_providers, worktree_bridge, evidence_id,
            )
            .await;
        agents.extend(security.agents.clone());

        let stage_confidences =
            [research_confidence, plan_confidence, code_confidence, validate_confidence, security_confidence];
        let final_confidence = weighted_final_confidence(&stage_confidences);

        let evidence_text = format!(
            "{research_context}\n\n{winning_plan}\n\n{code_context}\n\n{}\n\n{}",
            validate.outputs.join("\n\n"),
            security.outputs.join("\n\n")
        );
        let sources = extract_sources(&evidence_text);

        if final_confidence < 30 && sources.is_empty() {
            warn!(confidence = final_confidence, "swarm refusal short-circuit: low confidence, no sources");
            return Ok(SwarmResult {
                final_output: "refused".to_string(),
                confidence: final_confidence,
                agents,
                sources,
                validation_passed: false,
            });
        }

        let synthesizer_count = request.settings.parallel_counts.get("synthesizer").max(1);
        let synth = self
            .run_one_stage(
                "synthesizer", synthesizer_count,
                format!(
                    "Synthesize the final answer for the task below from all prior stage output.\nTask: {}\n\n{evidence_text}",
                    request.prompt
                ),
                request, resolved_providers, worktree_bridge, evidence_id,
            )
            .await;
        agents.extend(synth.agents.clone());

        let best_synth = synth.outputs.first().cloned().unwrap_or_else(|| code_context.clone());
        let fact_check = fact_check_penalty(final_confidence, &best_synth, &request.project_path);
        let confidence = fact_check.adjusted_confidence;
        let validation_passed = validate.gate.passed;

        if let Some(refusal) =
            self.evaluate_guardrail(request, PipelineMode::Swarm, confidence, sources.len(), &best_synth, validation_passed)
        {
            return Ok(self.refused_result(refusal, agents));
        }

        Ok(SwarmResult { final_output: best_synth, confidence, agents, sources, validation_passed })
    }

    async fn run_project_mode(
        &self,
        request: &PipelineRequest,
        resolved_providers: &[ResolvedProvider],
        worktree_bridge: Option<&WorktreeBridge>,
        evidence_id: &str,
    ) -> CoreResult<SwarmResult> {
        let project_id = uuid::Uuid::new_v4().to_string();
        let admin = Actor { role: ActorRole::Admin, email: "orchestrator@swarm.internal".to_string() };
        let mut agents = Vec::new();

        let planner_count = request.settings.parallel_counts.get("planner").max(1);
        let plan_outcome = self
            .run_one_stage(
                "planner", planner_count,
                format!(
                    "Decompose the following project into discrete, section-headed work items.\nTask: {}",
                    request.prompt
                ),
                request, resolved_providers, worktree_bridge, evidence_id,
            )
            .await;
        agents.extend(plan_outcome.agents.clone());

        let plan_text = plan_outcome.outputs.first().cloned().unwrap_or_default();
        let sections = split_into_sections(&plan_text);
        let sections = if sections.is_empty() { vec![request.prompt.clone()] } else { sections };

        let mut ticket_outputs: Vec<String> = Vec::new();
        let mut failures: u32 = 0;

        for (i, section) in sections.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }

            let title = format!("Section {}: {}", i + 1, section.lines().next().unwrap_or(section).trim());
            let ticket_id = {
                let mut tickets = self.tickets.lock().await;
                tickets
                    .create_ticket(&project_id, &title, section, Complexity::M, "coder", TicketLevel::Feature, None)
                    .map_err(|e| CoreError::hierarchy_violation(e.to_string()))?
            };

            {
                let mut tickets = self.tickets.lock().await;
                let _ = tickets.execute_transition(&ticket_id, "backlog_to_in_progress", &admin);
            }

            // Retry the same ticket up to TICKET_ESCALATION_THRESHOLD times so
            // consecutive_no_progress can actually reach the escalation
            // threshold before moving on to the next section.
            let mut ticket_outcome = None;
            let mut succeeded = false;
            for attempt in 0..TICKET_ESCALATION_THRESHOLD {
                if self.cancel.is_cancelled() {
                    break;
                }
                if attempt > 0 {
                    tracing::debug!(ticket_id = %ticket_id, attempt, "retrying ticket after no-progress iteration");
                }

                let outcome = self
                    .run_one_stage(
                        "coder", 1,
                        format!("Implement the following work item.\n{section}\n\nOverall task: {}", request.prompt),
                        request, resolved_providers, worktree_bridge, evidence_id,
                    )
                    .await;
                agents.extend(outcome.agents.clone());

                let _ = self.evidence.link_ticket_to_evidence(evidence_id, &ticket_id).await;
                {
                    let mut tickets = self.tickets.lock().await;
                    let _ = tickets.update_ticket(&ticket_id, |t| t.evidence_ids.push(evidence_id.to_string()));
                }

                succeeded = outcome.gate.passed && !outcome.outputs.is_empty();
                {
                    let mut tickets = self.tickets.lock().await;
                    tickets.record_iteration_progress(&ticket_id, succeeded);
                }

                ticket_outcome = Some(outcome);
                if succeeded {
                    break;
                }
            }

            if succeeded {
                let ticket_outcome = ticket_outcome.expect("loop ran at least once on success");
                ticket_outputs.push(ticket_outcome.outputs.join("\n\n"));
                let mut tickets = self.tickets.lock().await;
                let _ = tickets.execute_transition(&ticket_id, "in_progress_to_review", &admin);
                let _ = tickets.execute_transition(&ticket_id, "review_to_approved", &admin);
                let _ = tickets.execute_transition(&ticket_id, "approved_to_done", &admin);
            } else {
                failures += 1;
                let mut tickets = self.tickets.lock().await;
                let consecutive = tickets.get(&ticket_id).map(|t| t.consecutive_no_progress).unwrap_or(0);
                if consecutive >= TICKET_ESCALATION_THRESHOLD {
                    let _ = tickets.create_escalation(&project_id, &ticket_id, "coder", "repeated implementation failures");
                }
            }
        }

        let combined = ticket_outputs.join("\n\n");

        let validator_count = request.settings.parallel_counts.get("validator").max(1);
        let validate_outcome = self
            .run_one_stage(
                "validator", validator_count,
                format!("Validate the combined implementation below.\n{combined}"),
                request, resolved_providers, worktree_bridge, evidence_id,
            )
            .await;
        agents.extend(validate_outcome.agents.clone());

        let security_count = request.settings.parallel_counts.get("security").max(1);
        let security_outcome = self
            .run_one_stage(
                "security", security_count,
                format!("Security-review the combined implementation below.\n{combined}"),
                request, resolved_providers, worktree_bridge, evidence_id,
            )
            .await;
        agents.extend(security_outcome.agents.clone());

        let evidence_text =
            format!("{combined}\n\n{}\n\n{}", validate_outcome.outputs.join("\n\n"), security_outcome.outputs.join("\n\n"));
        let sources = extract_sources(&evidence_text);

        let total_tickets = sections.len().max(1) as f64;
        let success_rate = 100.0 * (total_tickets - failures as f64).max(0.0) / total_tickets;
        // No dedicated research stage exists in project mode, so the
        // 5-slot weighted formula doesn't apply here; blend ticket
        // success rate with the shared validate/security stages instead.
        let confidence = (success_rate * 0.4
            + validate_outcome.gate.confidence as f64 * 0.35
            + security_outcome.gate.confidence as f64 * 0.25)
            .round() as u8;

        let validation_passed = validate_outcome.gate.passed && failures == 0;

        if let Some(refusal) = self.evaluate_guardrail(
            request, PipelineMode::Project, confidence, sources.len(), &evidence_text, validation_passed,
        ) {
            return Ok(self.refused_result(refusal, agents));
        }

        Ok(SwarmResult { final_output: combined, confidence, agents, sources, validation_passed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_mode_chat_for_a_short_generic_prompt() {
        assert_eq!(detect_mode("what's 2 + 2?"), PipelineMode::Chat);
    }

    #[test]
    fn detect_mode_swarm_for_a_code_keyword() {
        assert_eq!(detect_mode("please refactor this module"), PipelineMode::Swarm);
    }

    #[test]
    fn detect_mode_project_for_a_long_build_prompt() {
        let prompt = format!("build a full application that does the following: {}", "x".repeat(200));
        assert_eq!(detect_mode(&prompt), PipelineMode::Project);
    }

    #[test]
    fn detect_mode_short_build_prompt_is_not_project() {
        assert_eq!(detect_mode("build this"), PipelineMode::Chat);
    }

    #[test]
    fn cancellation_token_is_idempotent_and_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn extract_sources_dedupes_and_trims_trailing_punctuation() {
        let text = "see https://example.com/a. also https://example.com/a, and https://example.com/b)";
        let sources = extract_sources(text);
        assert_eq!(sources.len(), 2);
        assert!(sources.contains(&"https://example.com/a".to_string()));
        assert!(sources.contains(&"https://example.com/b".to_string()));
    }

    #[test]
    fn split_into_sections_finds_markdown_headers() {
        let text = "# One\nbody one\n# Two\nbody two\n";
        let sections = split_into_sections(text);
        assert_eq!(sections.len(), 2);
        assert!(sections[0].starts_with("# One"));
    }

    #[test]
    fn split_into_sections_empty_for_unstructured_text() {
        assert!(split_into_sections("just a paragraph, no headers here").is_empty());
    }
}
