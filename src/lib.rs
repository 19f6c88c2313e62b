//! mcp-conductor — supervised MCP server connections and bounded tool execution.
//!
//! - [`mcp_client`]: server processes, the connection state machine, tool discovery
//! - [`execution`]: the execution coordinator, its history and events
//! - [`Conductor`]: wires both together with config reloading and health checks

pub mod conductor;
pub mod config;
pub mod execution;
pub mod logging;
pub mod mcp_client;

pub use conductor::Conductor;
pub use config::{find_config_path, load_runtime_config, RuntimeConfig};
pub use execution::{ExecutionCoordinator, ExecutionError, ExecutionOutcome, ToolCall};
pub use mcp_client::{ConnectionSupervisor, McpError, ServerConfig};
