//! Settings loading: `swarm_core::Settings` from a TOML file, with
//! environment variable overrides applied at this single boundary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rig::providers::openai;
use swarm_core::Settings;

/// API-key env vars the core passes through to a spawned CLI agent and
/// reads directly for API-mode dispatch.
const PROVIDER_API_KEY_ENVS: [(&str, &str); 4] = [
    ("chatgpt", "OPENAI_API_KEY"),
    ("gemini-api", "GOOGLE_API_KEY"),
    ("claude", "ANTHROPIC_API_KEY"),
    ("github", "GITHUB_TOKEN"),
];

/// Load settings from `path`, falling back to [`Settings::default`] when
/// the file does not exist, then apply environment variable overrides for
/// provider API keys.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let mut settings = match path {
        Some(p) if p.exists() => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read settings file: {}", p.display()))?;
            Settings::from_toml_str(&raw).with_context(|| "invalid settings file")?
        }
        _ => Settings::default(),
    };

    apply_env_overrides(&mut settings);
    settings.validate().context("settings failed validation after env overrides")?;
    Ok(settings)
}

fn apply_env_overrides(settings: &mut Settings) {
    for (provider, env_var) in PROVIDER_API_KEY_ENVS {
        if let Ok(key) = std::env::var(env_var) {
            if !key.is_empty() {
                settings.provider_api_keys.insert(provider.to_string(), key);
            }
        }
    }
}

/// Default config file path a CLI invocation looks for when none is
/// given explicitly.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("swarm.toml")
}

/// Pre-built rig completions clients for the configured API-mode
/// providers, one per provider that has both an API key and a mapped
/// base URL.
pub struct ClientSet {
    pub clients: Vec<(String, openai::CompletionsClient)>,
}

impl ClientSet {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut clients = Vec::new();
        for provider in &settings.enabled_providers {
            let Some(base_url) = api_base_url(provider) else {
                continue;
            };
            let Some(api_key) = settings.provider_api_keys.get(provider) else {
                continue;
            };
            let client = openai::CompletionsClient::builder()
                .api_key(api_key)
                .base_url(base_url)
                .build()
                .with_context(|| format!("failed to build API client for provider {provider}"))?;
            clients.push((provider.clone(), client));
        }
        Ok(Self { clients })
    }

    pub fn get(&self, provider: &str) -> Option<&openai::CompletionsClient> {
        self.clients.iter().find(|(p, _)| p == provider).map(|(_, c)| c)
    }
}

fn api_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "chatgpt" => Some("https://api.openai.com/v1"),
        "gemini-api" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        "claude" => Some("https://api.anthropic.com/v1"),
        _ => None,
    }
}

/// Probe whether a CLI binary is installed and runnable.
pub async fn check_cli_installed(binary: &str) -> bool {
    tokio::process::Command::new(binary)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Check if an HTTP-reachable inference endpoint is alive, for the rarer
/// self-hosted provider case.
pub async fn check_endpoint(url: &str, api_key: Option<&str>) -> bool {
    let client = reqwest::Client::new();
    let mut req = client
        .get(format!("{url}/models"))
        .timeout(std::time::Duration::from_secs(5));
    if let Some(key) = api_key {
        req = req.bearer_auth(key);
    }
    match req.send().await {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            tracing::warn!(endpoint = url, status = %resp.status(), "endpoint returned non-success status");
            false
        }
        Err(e) => {
            tracing::warn!(endpoint = url, error = %e, "endpoint unreachable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_a_file_falls_back_to_defaults() {
        let settings = load(None).unwrap();
        assert_eq!(settings.enabled_providers, vec!["claude".to_string()]);
    }

    #[test]
    fn env_override_populates_provider_api_key() {
        std::env::set_var("ANTHROPIC_API_KEY", "sk-test-key");
        let mut settings = Settings::default();
        apply_env_overrides(&mut settings);
        assert_eq!(settings.provider_api_keys.get("claude").unwrap(), "sk-test-key");
        std::env::remove_var("ANTHROPIC_API_KEY");
    }

    #[test]
    fn api_base_url_covers_the_three_api_mode_providers() {
        assert!(api_base_url("chatgpt").is_some());
        assert!(api_base_url("gemini-api").is_some());
        assert!(api_base_url("claude").is_some());
        assert!(api_base_url("some-cli-only-provider").is_none());
    }
}
