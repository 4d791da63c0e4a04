//! MCP tool-call post-processing: the pure, stateless
//! part of turning agent output into tool-call requests and rendering
//! their results back into the output stream.
//!
//! The actual subprocess transport to an MCP server is explicitly out of
//! scope and is an external collaborator `swarm_agent` drives; this
//! module only specifies the request/result shapes and the deterministic
//! parse/format functions around them, matching a typed request/result
//! contract rather than freeform strings.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolCall {
    pub server_id: String,
    pub tool_name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolResult {
    pub server_id: String,
    pub tool_name: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

static TOOL_CALL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\[MCP_TOOL_CALL\]\s+server=(\S+)\s+tool=(\S+)(?:\s+args=(\{.*\}))?\s*$")
        .unwrap()
});

/// Scan agent output for `[MCP_TOOL_CALL] server=… tool=… args=<json>`
/// lines. Malformed
/// `args` JSON falls back to `Value::Null` rather than dropping the call —
/// the dispatcher surfaces the failure as an error result instead.
pub fn extract_tool_calls(output: &str) -> Vec<McpToolCall> {
    TOOL_CALL_PATTERN
        .captures_iter(output)
        .map(|caps| {
            let args = caps
                .get(3)
                .and_then(|m| serde_json::from_str(m.as_str()).ok())
                .unwrap_or(Value::Null);
            McpToolCall {
                server_id: caps[1].to_string(),
                tool_name: caps[2].to_string(),
                args,
            }
        })
        .collect()
}

/// Render one `[MCP_TOOL_RESULT] server=… tool=… …` block.
pub fn format_result_block(result: &McpToolResult) -> String {
    match &result.error {
        Some(err) => format!(
            "[MCP_TOOL_RESULT] server={} tool={} error={}",
            result.server_id, result.tool_name, err
        ),
        None => {
            let payload = result
                .result
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_string());
            format!(
                "[MCP_TOOL_RESULT] server={} tool={} result={}",
                result.server_id, result.tool_name, payload
            )
        }
    }
}

/// Append every result's rendered block to `output`, one per line (used
/// by the stage runner after dispatching every extracted call).
pub fn append_result_blocks(output: &str, results: &[McpToolResult]) -> String {
    if results.is_empty() {
        return output.to_string();
    }
    let mut out = output.to_string();
    for result in results {
        out.push('\n');
        out.push_str(&format_result_block(result));
    }
    out
}
