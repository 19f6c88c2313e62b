//! MCP Client — supervised connections to out-of-process MCP servers.
//!
//! This module handles:
//! - Spawning MCP server child processes and speaking JSON-RPC over stdio
//! - The per-server connection state machine (connect, backoff reconnect,
//!   health checks, config-driven reconciliation)
//! - Tool discovery, namespacing (`server.tool`) and the TTL tool cache
//!
//! The execution coordinator resolves tool calls through
//! [`ConnectionSupervisor::resolve_tool`] and never touches processes directly.

pub mod catalog;
pub mod classify;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod supervisor;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use catalog::{namespaced_name, parse_tool_name, ToolCatalog};
pub use classify::ToolCategory;
pub use config::{validate_server_configs, ConfigFileWatcher};
pub use errors::McpError;
pub use lifecycle::{ManagedServer, StdioTransportFactory};
pub use registry::ConnectionRegistry;
pub use supervisor::{ConnectionSupervisor, HealthCheckSummary, ResolvedTool, SupervisorConfig};
pub use transport::{McpTransport, TransportFactory};
pub use types::{Connection, ConnectionStatus, ServerConfig, ServerStatusInfo, ToolDescriptor};
