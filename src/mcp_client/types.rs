//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, server launch configuration, and the
//! connection / tool descriptor data model.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classify::ToolCategory;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Standard JSON-RPC error code used when a response carries neither
/// `result` nor `error`.
pub const INTERNAL_ERROR: i32 = -32603;

/// MCP protocol revision sent during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── MCP Protocol Types ─────────────────────────────────────────────────────

/// A tool exactly as a server reports it from `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Payload of a `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

// ─── Launch Configuration ───────────────────────────────────────────────────

fn default_enabled() -> bool {
    true
}

/// How to launch and supervise one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable, unique server id. Also the namespace prefix of its tools.
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Connection timeout override in milliseconds.
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
    /// Concurrency hint for this server.
    #[serde(default, alias = "maxConcurrency")]
    pub max_concurrency: Option<u32>,
    /// Working directory for the server process.
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ServerConfig {
    /// Minimal enabled config for `command`.
    pub fn new(id: &str, command: &str) -> Self {
        Self {
            id: id.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            enabled: true,
            timeout_ms: None,
            max_concurrency: None,
            cwd: None,
        }
    }

    /// Whether switching from `self` to `other` requires relaunching the server.
    pub fn launch_differs(&self, other: &ServerConfig) -> bool {
        self.command != other.command
            || self.args != other.args
            || self.env != other.env
            || self.enabled != other.enabled
            || self.timeout_ms != other.timeout_ms
            || self.max_concurrency != other.max_concurrency
            || self.cwd != other.cwd
    }
}

// ─── Connection Model ───────────────────────────────────────────────────────

/// Lifecycle state of a supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A tool as exposed to callers, namespaced by its server id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// `"{connection_id}.{raw_name}"`.
    pub namespaced_name: String,
    pub raw_name: String,
    pub connection_id: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub category: ToolCategory,
    pub dangerous: bool,
    pub requires_confirmation: bool,
}

/// One supervised server connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub config: ServerConfig,
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub connection_start_time: Option<DateTime<Utc>>,
    pub last_reconnect_time: Option<DateTime<Utc>>,
    pub tools: Vec<ToolDescriptor>,
}

impl Connection {
    /// A fresh record in the `connecting` state.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            config,
            status: ConnectionStatus::Connecting,
            reconnect_attempts: 0,
            last_error: None,
            last_health_check: None,
            connection_start_time: None,
            last_reconnect_time: None,
            tools: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Connection status snapshot returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusInfo {
    pub id: String,
    pub status: ConnectionStatus,
    pub enabled: bool,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub connection_start_time: Option<DateTime<Utc>>,
    pub last_reconnect_time: Option<DateTime<Utc>>,
    pub tool_count: usize,
}

impl From<&Connection> for ServerStatusInfo {
    fn from(conn: &Connection) -> Self {
        Self {
            id: conn.id.clone(),
            status: conn.status,
            enabled: conn.config.enabled,
            reconnect_attempts: conn.reconnect_attempts,
            last_error: conn.last_error.clone(),
            last_health_check: conn.last_health_check,
            connection_start_time: conn.connection_start_time,
            last_reconnect_time: conn.last_reconnect_time,
            tool_count: conn.tools.len(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
