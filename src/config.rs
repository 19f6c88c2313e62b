//! Runtime configuration (mirrors `mcp-conductor.yaml`).
//!
//! ```yaml
//! logging:
//!   level: debug
//!   json: false
//! supervisor:
//!   max_reconnect_attempts: 5
//!   reconnect_base_delay_ms: 1000
//! execution:
//!   max_concurrent_executions: 5
//!   per_tool_timeout_ms:
//!     search.web_search: 60000
//! servers:
//!   - id: filesystem
//!     command: npx
//!     args: ["-y", "@modelcontextprotocol/server-filesystem", "${HOME}"]
//! ```
//!
//! Durations are milliseconds. String values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::execution::{CoordinatorConfig, TimeoutPolicy};
use crate::logging::LoggingConfig;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::supervisor::SupervisorConfig;
use crate::mcp_client::types::ServerConfig;

/// File name searched for by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "mcp-conductor.yaml";

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MCP_CONDUCTOR_CONFIG";

// ─── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub logging: LoggingConfig,
    pub supervisor: SupervisorSettings,
    pub execution: ExecutionSettings,
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub connection_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub tool_cache_ttl_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_base_delay_ms: config.reconnect_base_delay.as_millis() as u64,
            connection_timeout_ms: config.connection_timeout.as_millis() as u64,
            health_check_interval_ms: config.health_check_interval.as_millis() as u64,
            tool_cache_ttl_ms: config.tool_cache_ttl.as_millis() as u64,
        }
    }
}

impl SupervisorSettings {
    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            health_check_interval: Duration::from_millis(self.health_check_interval_ms.max(1)),
            tool_cache_ttl: Duration::from_millis(self.tool_cache_ttl_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub max_concurrent_executions: usize,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Elapsed time after which a still-running call gets a warning status.
    /// `0` disables the warning.
    pub warning_threshold_ms: u64,
    /// Timeout overrides keyed by namespaced tool name.
    pub per_tool_timeout_ms: HashMap<String, u64>,
    pub history_capacity: usize,
    pub event_capacity: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        let coordinator = CoordinatorConfig::default();
        let timeouts = &coordinator.timeouts;
        Self {
            max_concurrent_executions: coordinator.max_concurrent_executions,
            default_timeout_ms: timeouts.default_timeout.as_millis() as u64,
            max_timeout_ms: timeouts.max_timeout.as_millis() as u64,
            warning_threshold_ms: timeouts
                .warning_threshold
                .map_or(0, |d| d.as_millis() as u64),
            per_tool_timeout_ms: HashMap::new(),
            history_capacity: coordinator.history_capacity,
            event_capacity: coordinator.event_capacity,
        }
    }
}

impl ExecutionSettings {
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrent_executions: self.max_concurrent_executions,
            history_capacity: self.history_capacity.max(1),
            event_capacity: self.event_capacity.max(1),
            timeouts: TimeoutPolicy {
                default_timeout: Duration::from_millis(self.default_timeout_ms),
                max_timeout: Duration::from_millis(self.max_timeout_ms),
                per_tool: self
                    .per_tool_timeout_ms
                    .iter()
                    .map(|(tool, ms)| (tool.clone(), Duration::from_millis(*ms)))
                    .collect(),
                warning_threshold: (self.warning_threshold_ms > 0)
                    .then(|| Duration::from_millis(self.warning_threshold_ms)),
            },
        }
    }
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `MCP_CONDUCTOR_CONFIG`, then walks upward from `start` looking for
/// `mcp-conductor.yaml`, then falls back to the platform config directory.
pub fn find_config_path(start: &Path) -> Result<PathBuf, McpError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
        return Err(McpError::ConfigError {
            reason: format!("{CONFIG_ENV_VAR} points at missing file {}", candidate.display()),
        });
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("mcp-conductor").join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(McpError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Read, interpolate and parse a config file. JSON is accepted too since it
/// is a subset of YAML.
pub fn load_runtime_config(path: &Path) -> Result<RuntimeConfig, McpError> {
    let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_runtime_config(&raw)
}

pub fn parse_runtime_config(raw: &str) -> Result<RuntimeConfig, McpError> {
    let interpolated = interpolate_env_vars(raw);
    let config: RuntimeConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| McpError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;
    crate::mcp_client::config::validate_server_configs(&config.servers)?;
    Ok(config)
}

// ─── Env-var interpolation ──────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
