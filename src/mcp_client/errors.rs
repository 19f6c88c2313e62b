//! MCP client error types.

use thiserror::Error;

use super::classify::is_connection_error;

/// Errors raised while supervising MCP servers and talking to them.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// Server configuration is unusable (disabled, missing or duplicate id,
    /// unreadable config file).
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The transport did not come up before the connection timeout.
    #[error("connection timeout after {timeout_ms}ms for server '{name}'")]
    ConnectTimeout { name: String, timeout_ms: u64 },

    /// No connection record exists for this id.
    #[error("server not found: '{name}'")]
    ServerNotFound { name: String },

    /// The connection exists but is not in the `connected` state.
    #[error("server '{name}' is not connected (status: {status})")]
    ServerNotConnected { name: String, status: String },

    /// A tool name that is not of the form `server.tool`.
    #[error("invalid tool name '{name}': expected '<server>.<tool>'")]
    InvalidToolName { name: String },

    /// All reconnection attempts have been used up.
    #[error("server '{name}': max reconnection attempts exceeded ({attempts})")]
    ReconnectExhausted { name: String, attempts: u32 },

    /// The operation observed a cancellation signal.
    #[error("operation cancelled for server '{name}'")]
    Cancelled { name: String },
}

impl McpError {
    /// Whether this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, McpError::Cancelled { .. })
    }

    /// Whether the link to the server itself is broken. A JSON-RPC error
    /// response means the server answered, so it never counts.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            McpError::ServerError { .. } | McpError::Cancelled { .. } => false,
            other => is_connection_error(&other.to_string()),
        }
    }
}
