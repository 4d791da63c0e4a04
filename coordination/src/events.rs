//! Callback interface and event bus for pipeline progress.
//!
//! Built around a `tokio::sync::broadcast` channel but narrowed to three
//! callbacks: `onAgentOutput`, `onAgentStatus`, `onMCPToolResult`.
//! Callbacks are interfaces, not
//! globals, so the orchestrator holds a `Arc<dyn PipelineCallbacks>`
//! rather than reading a process-wide sender.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Monotonic agent lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Spawning,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AgentStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A single progress event published during a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    AgentOutput {
        agent_id: String,
        chunk: String,
    },
    AgentStatus {
        agent_id: String,
        status: AgentStatus,
        exit_code: Option<i32>,
    },
    McpToolResult {
        server_id: String,
        tool_name: String,
        result: Option<String>,
        error: Option<String>,
    },
}

/// The callback interface the orchestrator invokes. Implementors decide
/// how to surface progress to the caller (stdout, a websocket, a test
/// collector); the core never assumes a transport.
pub trait PipelineCallbacks: Send + Sync {
    fn on_agent_output(&self, agent_id: &str, chunk: &str);
    fn on_agent_status(&self, agent_id: &str, status: AgentStatus, exit_code: Option<i32>);
    fn on_mcp_tool_result(
        &self,
        server_id: &str,
        tool_name: &str,
        result: Option<&str>,
        error: Option<&str>,
    );
}

const CHANNEL_CAPACITY: usize = 512;

/// Broadcast-backed implementation of [`PipelineCallbacks`] for callers
/// that want to subscribe to the stream instead of implementing the trait
/// directly (e.g. a test harness or a websocket bridge).
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

pub type SharedEventBus = Arc<EventBus>;

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared() -> SharedEventBus {
        Arc::new(Self::new())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: PipelineEvent) {
        // A lagging/absent subscriber must never block or fail the
        // pipeline; broadcast::send only errors when there are zero
        // receivers, which is the common case in a one-shot CLI run.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineCallbacks for EventBus {
    fn on_agent_output(&self, agent_id: &str, chunk: &str) {
        self.publish(PipelineEvent::AgentOutput {
            agent_id: agent_id.to_string(),
            chunk: chunk.to_string(),
        });
    }

    fn on_agent_status(&self, agent_id: &str, status: AgentStatus, exit_code: Option<i32>) {
        self.publish(PipelineEvent::AgentStatus {
            agent_id: agent_id.to_string(),
            status,
            exit_code,
        });
    }

    fn on_mcp_tool_result(
        &self,
        server_id: &str,
        tool_name: &str,
        result: Option<&str>,
        error: Option<&str>,
    ) {
        self.publish(PipelineEvent::McpToolResult {
            server_id: server_id.to_string(),
            tool_name: tool_name.to_string(),
            result: result.map(str::to_string),
            error: error.map(str::to_string),
        });
    }
}

/// A no-op sink for tests and for modes that don't need progress
/// reporting (e.g. scheduled/headless runs).
pub struct NullCallbacks;

impl PipelineCallbacks for NullCallbacks {
    fn on_agent_output(&self, _agent_id: &str, _chunk: &str) {}
    fn on_agent_status(&self, _agent_id: &str, _status: AgentStatus, _exit_code: Option<i32>) {}
    fn on_mcp_tool_result(
        &self,
        _server_id: &str,
        _tool_name: &str,
        _result: Option<&str>,
        _error: Option<&str>,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordering_is_monotonic() {
        assert!(AgentStatus::Pending < AgentStatus::Spawning);
        assert!(AgentStatus::Spawning < AgentStatus::Running);
        assert!(AgentStatus::Running < AgentStatus::Completed);
    }

    #[test]
    fn terminal_statuses() {
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Failed.is_terminal());
        assert!(AgentStatus::Cancelled.is_terminal());
        assert!(!AgentStatus::Running.is_terminal());
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.on_agent_output("agent-1", "hello");
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.on_agent_status("agent-1", AgentStatus::Running, None);
        let event = rx.recv().await.unwrap();
        match event {
            PipelineEvent::AgentStatus { agent_id, status, .. } => {
                assert_eq!(agent_id, "agent-1");
                assert_eq!(status, AgentStatus::Running);
            }
            _ => panic!("unexpected event"),
        }
    }
}
