//! Evidence Ledger: an append-only per-pipeline record of
//! branch/commit, per-agent CLI excerpts, diff summaries, ticket links,
//! file snapshots, screenshots and secret-scan metadata.
//!
//! A session captures git state once at creation and accumulates
//! immutable history entries after that. Here there is one entry per
//! pipeline run instead of one per chat session, but the "capture git
//! state once, append everything else" shape carries over unchanged.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};

const CLI_EXCERPT_MAX_BYTES: usize = 2 * 1024;
const DIFF_SUMMARY_MAX_BYTES: usize = 1024;
const FILE_SNAPSHOT_MAX_BYTES: usize = 100 * 1024;
const TRUNCATION_SUFFIX: &str = "\n...[truncated]";

/// Truncate `content` to at most `max_bytes` (on a char boundary) and
/// append the truncation suffix. Idempotent: truncating an already
/// truncated string returns it unchanged.
fn truncate_with_suffix(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    if content.ends_with(TRUNCATION_SUFFIX) && content.len() <= max_bytes + TRUNCATION_SUFFIX.len()
    {
        return content.to_string();
    }
    let budget = max_bytes.saturating_sub(TRUNCATION_SUFFIX.len());
    let mut end = budget.min(content.len());
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &content[..end], TRUNCATION_SUFFIX)
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultLink {
    pub test_id: String,
    pub passed: bool,
    pub output: String,
}

/// Secret-scan summary attached to an evidence entry. The scan rules themselves live in
/// [`crate::secret_scan`]; this is just the recorded outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretScanMetadata {
    pub high_confidence_count: usize,
    pub finding_count: usize,
    pub ignored_path_count: usize,
    pub findings: Vec<String>,
}

/// One append-only evidence record per pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub diff_summary: Option<String>,
    pub cli_excerpts: HashMap<String, String>,
    pub test_results: Vec<TestResultLink>,
    pub ticket_ids: Vec<String>,
    pub file_snapshots: Vec<FileSnapshot>,
    pub screenshots: Vec<String>,
    pub secret_scan: Option<SecretScanMetadata>,
}

impl EvidenceEntry {
    pub fn test_ids(&self) -> Vec<String> {
        self.test_results.iter().map(|t| t.test_id.clone()).collect()
    }
}

fn git_output(project_path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").current_dir(project_path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Append-only ledger of [`EvidenceEntry`] records. Writes are serialized
/// per evidence id; a single
/// `tokio::sync::Mutex` over the whole map is adequate at this scale and
/// keeps cross-entry independence trivially true (no entry ever reads
/// another's state).
#[derive(Default)]
pub struct EvidenceLedger {
    entries: Mutex<HashMap<String, EvidenceEntry>>,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture git branch + commit if `project_path` is a git repo;
    /// fields stay `None` otherwise.
    pub async fn create_pipeline_evidence(&self, project_path: &Path) -> String {
        let branch = git_output(project_path, &["rev-parse", "--abbrev-ref", "HEAD"]);
        let commit_hash = git_output(project_path, &["rev-parse", "HEAD"]);

        let id = uuid::Uuid::new_v4().to_string();
        let entry = EvidenceEntry {
            id: id.clone(),
            timestamp: Utc::now(),
            branch,
            commit_hash,
            diff_summary: None,
            cli_excerpts: HashMap::new(),
            test_results: Vec::new(),
            ticket_ids: Vec::new(),
            file_snapshots: Vec::new(),
            screenshots: Vec::new(),
            secret_scan: None,
        };
        info!(evidence_id = %id, "evidence entry created");
        self.entries.lock().await.insert(id.clone(), entry);
        id
    }

    async fn with_entry<F, T>(&self, id: &str, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut EvidenceEntry) -> T,
    {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| CoreError::validation(format!("unknown evidence entry: {id}")))?;
        Ok(f(entry))
    }

    pub async fn get(&self, id: &str) -> Option<EvidenceEntry> {
        self.entries.lock().await.get(id).cloned()
    }

    /// At most 2 KiB per agent; re-appending an agent's
    /// excerpt overwrites its slot, it does not concatenate — there is no
    /// "append" growth semantics for a single agent's excerpt, only for
    /// the map as a whole.
    pub async fn append_cli_excerpt(
        &self,
        id: &str,
        agent_id: &str,
        output: &str,
    ) -> CoreResult<()> {
        let truncated = truncate_with_suffix(output, CLI_EXCERPT_MAX_BYTES);
        self.with_entry(id, |entry| {
            entry.cli_excerpts.insert(agent_id.to_string(), truncated);
        })
        .await
    }

    /// Runs `git diff --stat` and stores the first 1 KiB.
    pub async fn append_diff_summary(&self, id: &str, project_path: &Path) -> CoreResult<()> {
        let stat = git_output(project_path, &["diff", "--stat"]).unwrap_or_default();
        let truncated = truncate_with_suffix(&stat, DIFF_SUMMARY_MAX_BYTES);
        self.with_entry(id, |entry| entry.diff_summary = Some(truncated)).await
    }

    /// Bidirectional linkage: this links the ticket on the evidence
    /// side. The caller (the Ticket Manager's exclusive owner) is
    /// responsible for also pushing `id` onto the ticket's `evidenceIds`,
    /// since evidence entries never hold a mutable reference into ticket
    /// state.
    pub async fn link_ticket_to_evidence(&self, id: &str, ticket_id: &str) -> CoreResult<()> {
        self.with_entry(id, |entry| {
            if !entry.ticket_ids.contains(&ticket_id.to_string()) {
                entry.ticket_ids.push(ticket_id.to_string());
            }
        })
        .await
    }

    /// Truncated to 100 KiB; snapshots dedupe by path, last write wins
    ///.
    pub async fn append_file_snapshot(&self, id: &str, path: &str, content: &str) -> CoreResult<()> {
        let truncated = truncate_with_suffix(content, FILE_SNAPSHOT_MAX_BYTES);
        let sha256 = sha256_hex(&truncated);
        self.with_entry(id, |entry| {
            entry.file_snapshots.retain(|s| s.path != path);
            entry.file_snapshots.push(FileSnapshot {
                path: path.to_string(),
                content: truncated,
                sha256,
            });
        })
        .await
    }

    pub async fn link_test_result(
        &self,
        id: &str,
        test_id: &str,
        passed: bool,
        output: &str,
    ) -> CoreResult<()> {
        self.with_entry(id, |entry| {
            entry.test_results.push(TestResultLink {
                test_id: test_id.to_string(),
                passed,
                output: truncate_with_suffix(output, CLI_EXCERPT_MAX_BYTES),
            });
        })
        .await
    }

    pub async fn append_screenshot(&self, id: &str, path_or_url: &str) -> CoreResult<()> {
        self.with_entry(id, |entry| entry.screenshots.push(path_or_url.to_string()))
            .await
    }

    pub async fn append_secret_scan_metadata(
        &self,
        id: &str,
        metadata: SecretScanMetadata,
    ) -> CoreResult<()> {
        if metadata.high_confidence_count > 0 {
            warn!(evidence_id = %id, count = metadata.high_confidence_count, "high-confidence secrets redacted");
        }
        self.with_entry(id, |entry| entry.secret_scan = Some(metadata)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_idempotent() {
        let long = "x".repeat(5000);
        let once = truncate_with_suffix(&long, CLI_EXCERPT_MAX_BYTES);
        let twice = truncate_with_suffix(&once, CLI_EXCERPT_MAX_BYTES);
        assert_eq!(once, twice);
        assert!(once.len() <= CLI_EXCERPT_MAX_BYTES + TRUNCATION_SUFFIX.len());
    }

    #[test]
    fn truncation_never_enlarges_short_content() {
        let short = "hello";
        assert_eq!(truncate_with_suffix(short, CLI_EXCERPT_MAX_BYTES), short);
    }

    #[tokio::test]
    async fn create_and_append_excerpt() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = EvidenceLedger::new();
        let id = ledger.create_pipeline_evidence(tmp.path()).await;

        ledger.append_cli_excerpt(&id, "agent-1", "hello world").await.unwrap();
        let entry = ledger.get(&id).await.unwrap();
        assert_eq!(entry.cli_excerpts.get("agent-1").unwrap(), "hello world");
        assert!(entry.branch.is_none());
    }

    #[tokio::test]
    async fn file_snapshot_dedupes_by_path_last_write_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = EvidenceLedger::new();
        let id = ledger.create_pipeline_evidence(tmp.path()).await;

        ledger.append_file_snapshot(&id, "src/main.rs", "v1").await.unwrap();
        ledger.append_file_snapshot(&id, "src/main.rs", "v2").await.unwrap();

        let entry = ledger.get(&id).await.unwrap();
        assert_eq!(entry.file_snapshots.len(), 1);
        assert_eq!(entry.file_snapshots[0].content, "v2");
    }

    #[tokio::test]
    async fn unknown_evidence_id_is_validation_error() {
        let ledger = EvidenceLedger::new();
        let result = ledger.append_cli_excerpt("missing", "a", "x").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ticket_link_is_idempotent_on_repeat_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = EvidenceLedger::new();
        let id = ledger.create_pipeline_evidence(tmp.path()).await;

        ledger.link_ticket_to_evidence(&id, "ticket-1").await.unwrap();
        ledger.link_ticket_to_evidence(&id, "ticket-1").await.unwrap();

        let entry = ledger.get(&id).await.unwrap();
        assert_eq!(entry.ticket_ids, vec!["ticket-1".to_string()]);
    }
}
