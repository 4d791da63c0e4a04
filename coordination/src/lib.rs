//! Swarm Core
//!
//! Deterministic engine pieces for the multi-agent code orchestration
//! pipeline: confidence scoring, guardrail policy, the ticket hierarchy and
//! its transition engine, the append-only evidence ledger, the output
//! cache, secret scanning/masking, and MCP tool-call post-processing.
//!
//! This crate never spawns a process and never calls an LLM. Everything
//! here is deterministic state machinery that the `swarm_agent` binary
//! drives.

#![allow(clippy::uninlined_format_args)]

pub mod cache;
pub mod confidence;
pub mod error;
pub mod events;
pub mod evidence;
pub mod guardrail;
pub mod mcp;
pub mod secret_scan;
pub mod settings;
pub mod ticket;

pub use cache::{CacheEntry, CacheStats, OutputCache};
pub use confidence::{
    best_of_n, fact_check_penalty, hybrid_confidence, jaccard_confidence, should_rerun_stage,
    weighted_final_confidence, ConfidenceMethod, FactCheckResult, StageConfidence,
};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use events::{AgentStatus, EventBus, PipelineCallbacks, SharedEventBus};
pub use evidence::{EvidenceEntry, EvidenceLedger, SecretScanMetadata};
pub use guardrail::{GuardrailInput, GuardrailPolicy, GuardrailResult, RefusalPayload};
pub use mcp::{McpToolCall, McpToolResult};
pub use secret_scan::{mask_secrets, SecretScanReport};
pub use settings::Settings;
pub use ticket::{
    Actor, ActorRole, ApprovalRecord, Complexity, Condition, Ticket, TicketLevel, TicketManager,
    TicketStatus, TransitionRule,
};
