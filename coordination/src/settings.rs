//! `Settings` — the pipeline's configuration data model, with range
//! validation at load time rather than silent clamping.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Depth of the research stage's prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Shallow,
    Medium,
    Deep,
}

impl Default for ResearchDepth {
    fn default() -> Self {
        Self::Medium
    }
}

/// MCP server configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// GitHub integration toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub auto_pr: bool,
}

/// Testing integration toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Template with exactly one `{PROMPT}` placeholder; no general
    /// string interpolation.
    pub custom_command: Option<String>,
}

/// Code validation gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeValidationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub block_on_errors: bool,
    #[serde(default = "default_min_score")]
    pub min_score: u8,
}

fn default_min_score() -> u8 {
    60
}

impl Default for CodeValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_on_errors: false,
            min_score: default_min_score(),
        }
    }
}

/// Per-role parallel agent counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelCounts {
    pub researcher: u8,
    pub planner: u8,
    pub coder: u8,
    pub validator: u8,
    pub security: u8,
    pub synthesizer: u8,
}

impl Default for ParallelCounts {
    fn default() -> Self {
        Self {
            researcher: 1,
            planner: 1,
            coder: 1,
            validator: 1,
            security: 1,
            synthesizer: 1,
        }
    }
}

impl ParallelCounts {
    pub fn get(&self, role: &str) -> u8 {
        match role {
            "researcher" => self.researcher,
            "planner" => self.planner,
            "coder" => self.coder,
            "validator" => self.validator,
            "security" => self.security,
            "synthesizer" => self.synthesizer,
            _ => 0,
        }
    }
}

/// The full configuration surface. Immutable for the duration of a run
/// once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub enabled_providers: Vec<String>,
    pub parallel_counts: ParallelCounts,
    pub chats_per_agent: u8,
    pub max_runtime_seconds: u32,
    pub research_depth: ResearchDepth,
    pub auto_rerun_threshold: u8,
    pub worktree_isolation: bool,
    pub continuous_mode: bool,
    pub max_concurrent_jobs: u8,
    pub custom_cli_command: Option<String>,
    #[serde(default)]
    pub provider_api_keys: HashMap<String, String>,
    #[serde(default)]
    pub github_config: GithubConfig,
    #[serde(default)]
    pub testing_config: TestingConfig,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub code_validation: CodeValidationConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled_providers: vec!["claude".to_string()],
            parallel_counts: ParallelCounts::default(),
            chats_per_agent: 1,
            max_runtime_seconds: 120,
            research_depth: ResearchDepth::default(),
            auto_rerun_threshold: 70,
            worktree_isolation: true,
            continuous_mode: false,
            max_concurrent_jobs: 1,
            custom_cli_command: None,
            provider_api_keys: HashMap::new(),
            github_config: GithubConfig::default(),
            testing_config: TestingConfig::default(),
            mcp_servers: Vec::new(),
            code_validation: CodeValidationConfig::default(),
        }
    }
}

impl Settings {
    /// Load from a TOML file, then validate. Environment overrides are
    /// applied by the caller (`swarm_agent::config`) before this is
    /// called — a single boundary, not scattered `env::var` reads.
    pub fn from_toml_str(raw: &str) -> Result<Self, CoreError> {
        let settings: Settings = toml::from_str(raw)
            .map_err(|e| CoreError::validation(format!("invalid settings TOML: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let mut problems = Vec::new();

        for (role, n) in [
            ("researcher", self.parallel_counts.researcher),
            ("planner", self.parallel_counts.planner),
            ("coder", self.parallel_counts.coder),
            ("validator", self.parallel_counts.validator),
            ("security", self.parallel_counts.security),
            ("synthesizer", self.parallel_counts.synthesizer),
        ] {
            if n > 6 {
                problems.push(format!("parallelCounts.{role} = {n} exceeds max of 6"));
            }
        }

        if !(1..=20).contains(&self.chats_per_agent) {
            problems.push(format!(
                "chatsPerAgent = {} out of range 1..=20",
                self.chats_per_agent
            ));
        }
        if !(10..=600).contains(&self.max_runtime_seconds) {
            problems.push(format!(
                "maxRuntimeSeconds = {} out of range 10..=600",
                self.max_runtime_seconds
            ));
        }
        if self.auto_rerun_threshold > 100 {
            problems.push(format!(
                "autoRerunThreshold = {} out of range 0..=100",
                self.auto_rerun_threshold
            ));
        }
        if !(1..=5).contains(&self.max_concurrent_jobs) {
            problems.push(format!(
                "maxConcurrentJobs = {} out of range 1..=5",
                self.max_concurrent_jobs
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::validation(problems.join("; ")))
        }
    }

    pub fn worktree_base(&self) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_parallel_count() {
        let mut s = Settings::default();
        s.parallel_counts.coder = 7;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_chats_per_agent_zero() {
        let mut s = Settings::default();
        s.chats_per_agent = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn accepts_zero_parallel_count_for_a_role() {
        let mut s = Settings::default();
        s.parallel_counts.researcher = 0;
        assert!(s.validate().is_ok());
    }
}
