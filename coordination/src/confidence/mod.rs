//! Anti-Hallucination & Confidence Engine.
//!
//! Picks a winner among several model outputs (a voting-protocol shape)
//! and produces a confidence-gate outcome. No LLM calls live here — every
//! decision in this module is deterministic, the same discipline the
//! escalation engine applies one layer up.

mod best_of_n_impl;
mod fact_check_impl;
mod hybrid_impl;
mod jaccard_impl;

pub use best_of_n_impl::best_of_n;
pub use fact_check_impl::{fact_check_penalty, FactCheckResult};
pub use hybrid_impl::hybrid_confidence;
pub use jaccard_impl::jaccard_confidence;

use serde::{Deserialize, Serialize};

/// Which algorithm produced a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMethod {
    Jaccard,
    Semantic,
    Hybrid,
}

/// Per-stage confidence bundle, used for the rerun decision and the final
/// weighted aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfidence {
    pub confidence: u8,
    pub method: ConfidenceMethod,
    pub pass_rate: u8,
    pub all_passed: bool,
}

/// Stage rerun decision:
/// `rerun iff confidence < threshold OR passRate < 50 OR (!allPassed AND confidence < 60)`.
pub fn should_rerun_stage(stage: &StageConfidence, threshold: u8) -> bool {
    stage.confidence < threshold
        || stage.pass_rate < 50
        || (!stage.all_passed && stage.confidence < 60)
}

/// Stage weights for the final weighted confidence.
pub const STAGE_WEIGHTS: [(&str, f64); 5] = [
    ("research", 0.10),
    ("plan", 0.15),
    ("code", 0.30),
    ("validate", 0.25),
    ("security", 0.20),
];

/// Final weighted confidence across research/plan/code/validate/security
///. `stage_confidences` must be given in the same order as
/// [`STAGE_WEIGHTS`]; any stage below 30 caps the final score at 50.
pub fn weighted_final_confidence(stage_confidences: &[u8; 5]) -> u8 {
    let weighted: f64 = stage_confidences
        .iter()
        .zip(STAGE_WEIGHTS.iter())
        .map(|(&c, &(_, w))| c as f64 * w)
        .sum();
    let rounded = weighted.round() as u8;
    if stage_confidences.iter().any(|&c| c < 30) {
        rounded.min(50)
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rerun_fires_on_low_confidence() {
        let stage = StageConfidence {
            confidence: 30,
            method: ConfidenceMethod::Jaccard,
            pass_rate: 100,
            all_passed: true,
        };
        assert!(should_rerun_stage(&stage, 40));
    }

    #[test]
    fn rerun_fires_on_low_pass_rate() {
        let stage = StageConfidence {
            confidence: 90,
            method: ConfidenceMethod::Jaccard,
            pass_rate: 40,
            all_passed: true,
        };
        assert!(should_rerun_stage(&stage, 40));
    }

    #[test]
    fn rerun_fires_on_not_all_passed_and_moderate_confidence() {
        let stage = StageConfidence {
            confidence: 55,
            method: ConfidenceMethod::Jaccard,
            pass_rate: 80,
            all_passed: false,
        };
        assert!(should_rerun_stage(&stage, 40));
    }

    #[test]
    fn no_rerun_when_everything_is_healthy() {
        let stage = StageConfidence {
            confidence: 90,
            method: ConfidenceMethod::Jaccard,
            pass_rate: 90,
            all_passed: true,
        };
        assert!(!should_rerun_stage(&stage, 40));
    }

    #[test]
    fn autorerun_threshold_zero_never_fires_beyond_base_conditions() {
        // threshold=0 means the `confidence < threshold` arm can never
        // fire; pass_rate/all_passed arms still can.
        let stage = StageConfidence {
            confidence: 90,
            method: ConfidenceMethod::Jaccard,
            pass_rate: 90,
            all_passed: true,
        };
        assert!(!should_rerun_stage(&stage, 0));
    }

    #[test]
    fn weighted_confidence_matches_weights() {
        let stages = [100, 100, 100, 100, 100];
        assert_eq!(weighted_final_confidence(&stages), 100);
    }

    #[test]
    fn weighted_confidence_caps_at_50_when_any_stage_below_30() {
        let stages = [100, 100, 100, 100, 20];
        // raw weighted = 0.1*100+0.15*100+0.3*100+0.25*100+0.2*20 = 84
        assert_eq!(weighted_final_confidence(&stages), 50);
    }
}
