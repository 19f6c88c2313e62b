//! Execution error types.

use thiserror::Error;

use super::types::ExecutionStatus;
use crate::mcp_client::errors::McpError;

/// Errors produced while executing a tool call.
///
/// `ConcurrencyLimit` and `DuplicateToolCall` are returned before a record
/// exists. Everything else ends up in a finalized record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("concurrency limit reached: {limit} executions already active")]
    ConcurrencyLimit { limit: usize },

    #[error("tool call '{tool_call_id}' is already executing")]
    DuplicateToolCall { tool_call_id: String },

    /// Malformed arguments or a missing required field.
    #[error("{reason}")]
    Validation { reason: String },

    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// The server ran the call and reported a failure.
    #[error("tool '{tool}' failed: {reason}")]
    Provider { tool: String, reason: String },

    /// The target server could not be reached.
    #[error("connection unavailable for '{tool}': {reason}")]
    Connection { tool: String, reason: String },

    #[error("execution of tool call '{tool_call_id}' was cancelled")]
    Cancelled { tool_call_id: String },
}

impl ExecutionError {
    /// Record status this error finalizes to.
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Timeout { .. } => ExecutionStatus::Timeout,
            Self::Cancelled { .. } => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Error,
        }
    }

    /// Map a tool-resolution failure.
    pub(crate) fn from_resolve(tool: &str, error: McpError) -> Self {
        match error {
            McpError::InvalidToolName { .. } => Self::Validation {
                reason: error.to_string(),
            },
            other => Self::Connection {
                tool: tool.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
