//! Guardrail Policy.
//!
//! A deterministic `decide()`-style function with no LLM calls,
//! accumulating failure reasons rather than short-circuiting on the
//! first one.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use regex::RegexSet;

/// Orchestration mode a pipeline ran under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    Chat,
    Swarm,
    Project,
}

/// Which pipeline produced the refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Orchestrator,
    Scheduled,
}

/// Closed set of refusal reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefusalReason {
    LowConfidence,
    InsufficientEvidence,
    UpstreamValidationFailed,
    ExplicitRefusalTriggered,
}

static REFUSAL_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)i cannot",
        r"(?i)i can't",
        r"(?i)unable to",
        r"(?i)insufficient information",
        r"(?i)not enough context",
    ])
    .unwrap()
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailContext {
    pub pipeline: PipelineKind,
    pub mode: PipelineMode,
    /// Truncated to ≤200 chars by [`GuardrailInput::new`].
    pub prompt_snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailInput {
    pub min_confidence: u8,
    pub min_evidence_count: usize,
    pub confidence: u8,
    pub evidence_count: usize,
    pub candidate_output: String,
    pub upstream_validation_passed: bool,
    pub context: GuardrailContext,
}

impl GuardrailInput {
    pub fn new(
        min_confidence: u8,
        min_evidence_count: usize,
        confidence: u8,
        evidence_count: usize,
        candidate_output: impl Into<String>,
        upstream_validation_passed: bool,
        pipeline: PipelineKind,
        mode: PipelineMode,
        prompt: &str,
    ) -> Self {
        let prompt_snippet: String = prompt.chars().take(200).collect();
        Self {
            min_confidence,
            min_evidence_count,
            confidence,
            evidence_count,
            candidate_output: candidate_output.into(),
            upstream_validation_passed,
            context: GuardrailContext {
                pipeline,
                mode,
                prompt_snippet,
            },
        }
    }
}

/// The stable wire schema callers can serialize and forward as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefusalPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub reasons: Vec<RefusalReason>,
    pub confidence: u8,
    pub evidence_count: usize,
    pub policy: RefusalPolicySnapshot,
    pub context: GuardrailContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefusalPolicySnapshot {
    pub min_confidence: u8,
    pub min_evidence_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub passed: bool,
    pub failures: Vec<RefusalReason>,
    pub refusal: Option<RefusalPayload>,
}

/// Deterministic guardrail policy — accumulates every applicable
/// failure reason instead of short-circuiting on the first one.
pub struct GuardrailPolicy;

impl GuardrailPolicy {
    pub fn evaluate(input: &GuardrailInput) -> GuardrailResult {
        let mut failures = Vec::new();

        if input.confidence < input.min_confidence {
            failures.push(RefusalReason::LowConfidence);
        }
        if input.evidence_count < input.min_evidence_count {
            failures.push(RefusalReason::InsufficientEvidence);
        }
        if !input.upstream_validation_passed {
            failures.push(RefusalReason::UpstreamValidationFailed);
        }
        if REFUSAL_PATTERNS.is_match(&input.candidate_output) {
            failures.push(RefusalReason::ExplicitRefusalTriggered);
        }

        if failures.is_empty() {
            return GuardrailResult {
                passed: true,
                failures,
                refusal: None,
            };
        }

        let refusal = RefusalPayload {
            kind: "guardrail_refusal".to_string(),
            message: "Final output refused by guardrail policy.".to_string(),
            reasons: failures.clone(),
            confidence: input.confidence,
            evidence_count: input.evidence_count,
            policy: RefusalPolicySnapshot {
                min_confidence: input.min_confidence,
                min_evidence_count: input.min_evidence_count,
            },
            context: input.context.clone(),
        };

        GuardrailResult {
            passed: false,
            failures,
            refusal: Some(refusal),
        }
    }

    /// Evidence sufficiency check used by the guardrail in chat mode
    ///: refuse unless
    /// `confidence >= 40 AND (sourceCount > 0 OR (logRefs+diffRefs+testIds+artifactRefs) >= 2)`
    /// OR `references >= 3`.
    pub fn evidence_is_sufficient(
        confidence: u8,
        source_count: usize,
        log_refs: usize,
        diff_refs: usize,
        test_ids: usize,
        artifact_refs: usize,
        total_references: usize,
    ) -> bool {
        let secondary_evidence = log_refs + diff_refs + test_ids + artifact_refs;
        (confidence >= 40 && (source_count > 0 || secondary_evidence >= 2))
            || total_references >= 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> GuardrailInput {
        GuardrailInput::new(
            75,
            2,
            90,
            5,
            "here is the answer",
            true,
            PipelineKind::Orchestrator,
            PipelineMode::Swarm,
            "do the thing",
        )
    }

    #[test]
    fn passes_when_everything_is_healthy() {
        let result = GuardrailPolicy::evaluate(&base_input());
        assert!(result.passed);
        assert!(result.failures.is_empty());
        assert!(result.refusal.is_none());
    }

    #[test]
    fn accumulates_all_applicable_failures() {
        let mut input = base_input();
        input.confidence = 41;
        input.evidence_count = 0;
        input.upstream_validation_passed = false;
        input.candidate_output = "I cannot complete this request".to_string();

        let result = GuardrailPolicy::evaluate(&input);
        assert!(!result.passed);
        assert!(result.failures.contains(&RefusalReason::LowConfidence));
        assert!(result.failures.contains(&RefusalReason::InsufficientEvidence));
        assert!(result
            .failures
            .contains(&RefusalReason::UpstreamValidationFailed));
        assert!(result
            .failures
            .contains(&RefusalReason::ExplicitRefusalTriggered));
        assert_eq!(result.failures.len(), 4);
        assert!(result.refusal.is_some());
    }

    #[test]
    fn prompt_snippet_is_truncated_to_200_chars() {
        let long_prompt = "x".repeat(500);
        let input = GuardrailInput::new(
            10,
            0,
            90,
            5,
            "fine",
            true,
            PipelineKind::Orchestrator,
            PipelineMode::Chat,
            &long_prompt,
        );
        assert_eq!(input.context.prompt_snippet.len(), 200);
    }

    #[test]
    fn refusal_pattern_matching_is_case_insensitive() {
        let mut input = base_input();
        input.candidate_output = "UNABLE TO proceed further".to_string();
        let result = GuardrailPolicy::evaluate(&input);
        assert!(result
            .failures
            .contains(&RefusalReason::ExplicitRefusalTriggered));
    }

    #[test]
    fn evidence_sufficiency_matches_spec_formula() {
        assert!(GuardrailPolicy::evidence_is_sufficient(40, 1, 0, 0, 0, 0, 0));
        assert!(GuardrailPolicy::evidence_is_sufficient(40, 0, 1, 1, 0, 0, 0));
        assert!(!GuardrailPolicy::evidence_is_sufficient(40, 0, 0, 0, 0, 0, 0));
        assert!(GuardrailPolicy::evidence_is_sufficient(0, 0, 0, 0, 0, 0, 3));
    }
}
