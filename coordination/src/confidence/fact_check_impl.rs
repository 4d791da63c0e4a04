//! Fact-checking penalty.
//!
//! Parses file/path references out of the best output and verifies each
//! exists under `project_path`, then penalizes the raw confidence for
//! unverified references.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Matches backtick-quoted paths (`src/foo.rs`) and bare relative paths
/// that look like source files, the same way a `file:line` reference
/// gets pulled out of rustc output.
static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`([\w./-]+\.\w+)`|\b([\w./-]+/[\w.-]+\.\w{1,8})\b").unwrap()
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactCheckResult {
    pub adjusted_confidence: u8,
    pub total_references: usize,
    pub unverified_references: usize,
    pub evidence_insufficient: bool,
}

/// Extract candidate file paths referenced in `text`.
fn extract_paths(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for caps in PATH_PATTERN.captures_iter(text) {
        let candidate = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string());
        if let Some(path) = candidate {
            if seen.insert(path.clone()) {
                out.push(path);
            }
        }
    }
    out
}

/// Apply the fact-checking penalty:
/// `penalty = round(unverified/total * 40)`, `adjusted = max(0, raw - penalty)`.
/// If every reference is unverified and there's at least one, flag
/// insufficient evidence and cap adjusted confidence at 25.
pub fn fact_check_penalty(raw_confidence: u8, best_output: &str, project_path: &Path) -> FactCheckResult {
    let references = extract_paths(best_output);
    let total = references.len();

    if total == 0 {
        return FactCheckResult {
            adjusted_confidence: raw_confidence,
            total_references: 0,
            unverified_references: 0,
            evidence_insufficient: false,
        };
    }

    let unverified = references
        .iter()
        .filter(|rel| !project_path.join(rel).exists())
        .count();

    let u = unverified as f64 / total as f64;
    let penalty = (u * 40.0).round() as i32;
    let mut adjusted = (raw_confidence as i32 - penalty).max(0) as u8;

    let evidence_insufficient = unverified == total;
    if evidence_insufficient {
        adjusted = adjusted.min(25);
    }

    FactCheckResult {
        adjusted_confidence: adjusted,
        total_references: total,
        unverified_references: unverified,
        evidence_insufficient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn no_references_leaves_confidence_untouched() {
        let dir = tempdir().unwrap();
        let result = fact_check_penalty(80, "no paths here", dir.path());
        assert_eq!(result.adjusted_confidence, 80);
        assert_eq!(result.total_references, 0);
    }

    #[test]
    fn existing_file_reference_is_verified() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let result = fact_check_penalty(80, "see `main.rs` for details", dir.path());
        assert_eq!(result.unverified_references, 0);
        assert_eq!(result.adjusted_confidence, 80);
    }

    #[test]
    fn missing_file_reference_is_penalized_and_capped() {
        let dir = tempdir().unwrap();
        let result = fact_check_penalty(80, "see `missing/file.rs` for details", dir.path());
        assert_eq!(result.unverified_references, 1);
        assert_eq!(result.total_references, 1);
        assert!(result.evidence_insufficient);
        assert!(result.adjusted_confidence <= 25);
    }
}
