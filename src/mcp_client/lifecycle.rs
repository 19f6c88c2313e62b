//! Server process lifecycle.
//!
//! Spawns MCP server child processes, performs the initialize handshake, and
//! exposes each running process as an [`McpTransport`]. Reconnection policy
//! lives in the supervisor; this module only knows how to start and stop one
//! process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::McpError;
use super::transport::{extract_result, McpTransport, StdioTransport, TransportFactory};
use super::types::{InitializeResult, ListToolsResult, McpToolDefinition, ServerConfig, PROTOCOL_VERSION};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for stderr output when a server fails to start.
const STDERR_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

/// Cap on captured stderr included in error messages.
const STDERR_CAPTURE_LIMIT: usize = 2000;

/// Upper bound on `tools/list` pages followed for one listing.
const MAX_LIST_PAGES: usize = 32;

// ─── ManagedServer ──────────────────────────────────────────────────────────

/// A running MCP server process with its JSON-RPC transport.
pub struct ManagedServer {
    name: String,
    process: tokio::sync::Mutex<Child>,
    transport: StdioTransport,
    stderr_task: Option<JoinHandle<()>>,
    server_version: Option<String>,
}

impl ManagedServer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version string reported by the server during initialization.
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    /// Check if the server process is still running.
    pub async fn is_alive(&self) -> bool {
        matches!(self.process.lock().await.try_wait(), Ok(None))
    }

    /// Ask the server to exit, force-killing it after [`SHUTDOWN_TIMEOUT`].
    pub async fn shutdown(&self) -> Result<(), McpError> {
        if let Err(e) = self.transport.notify("shutdown", None).await {
            tracing::debug!(server = %self.name, error = %e, "shutdown notification not delivered");
        }

        let mut process = self.process.lock().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, process.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "server exited");
            }
            _ => {
                tracing::warn!(server = %self.name, "server did not exit in time, killing");
                process.kill().await.map_err(|e| McpError::TransportError {
                    server: self.name.clone(),
                    reason: format!("failed to kill process: {e}"),
                })?;
            }
        }
        if let Some(task) = &self.stderr_task {
            task.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl McpTransport for ManagedServer {
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let response = self.transport.request("tools/list", params).await?;
            let result = extract_result(response)?;

            cursor = result
                .get("nextCursor")
                .and_then(|v| v.as_str())
                .map(String::from);
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::TransportError {
                    server: self.name.clone(),
                    reason: format!("malformed tools/list response: {e}"),
                })?;
            tools.extend(page.tools);

            if cursor.is_none() {
                break;
            }
        }

        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let response = self
            .transport
            .request_cancellable("tools/call", Some(params), &cancel)
            .await?;
        let result = extract_result(response)?;

        if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
            return Err(McpError::ServerError {
                code: super::types::INTERNAL_ERROR,
                message: content_text(&result).unwrap_or_else(|| "tool reported an error".into()),
                data: Some(result),
            });
        }
        Ok(result)
    }

    async fn close(&self) -> Result<(), McpError> {
        self.shutdown().await
    }
}

/// Join the `text` items of an MCP `content` array.
fn content_text(result: &serde_json::Value) -> Option<String> {
    let text: Vec<&str> = result
        .get("content")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}

// ─── Spawning ───────────────────────────────────────────────────────────────

/// Spawn a single MCP server process and perform the initialization handshake.
///
/// The child is killed if the returned future is dropped before completion,
/// so callers may race this against a timeout.
pub async fn spawn_server(
    config: &ServerConfig,
    working_dir: Option<&str>,
) -> Result<ManagedServer, McpError> {
    let name = config.id.as_str();
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    if let Some(dir) = config.cwd.as_deref().or(working_dir) {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;
    let stderr = child.stderr.take();

    let transport = StdioTransport::new(name, stdin, stdout);

    let server_version = match initialize(&transport, name).await {
        Ok(version) => version,
        Err(e) => {
            let stderr_ctx = read_stderr_on_failure(stderr).await;
            if !stderr_ctx.is_empty() {
                tracing::warn!(server = name, stderr = %stderr_ctx, "server stderr captured on failure");
            }
            let _ = child.kill().await;
            return Err(McpError::InitFailed {
                name: name.to_string(),
                reason: format!("{e}{}", format_stderr_suffix(&stderr_ctx)),
            });
        }
    };

    tracing::info!(server = name, version = ?server_version, "server initialized");

    Ok(ManagedServer {
        name: name.to_string(),
        process: tokio::sync::Mutex::new(child),
        transport,
        stderr_task: stderr.map(|s| tokio::spawn(forward_stderr(name.to_string(), s))),
        server_version,
    })
}

/// Perform the MCP initialization handshake. Returns the server version.
async fn initialize(transport: &StdioTransport, server_name: &str) -> Result<Option<String>, McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let response = transport.request("initialize", Some(params)).await?;
    let result = extract_result(response)?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    transport.notify("notifications/initialized", None).await?;

    if let Some(version) = &init.protocol_version {
        if version != PROTOCOL_VERSION {
            tracing::debug!(server = server_name, protocol = %version, "server negotiated a different protocol version");
        }
    }
    Ok(init.server_info.and_then(|info| info.version))
}

/// Relay server stderr into the log at debug level.
async fn forward_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %server, "{line}");
    }
}

/// Read any available stderr output from a failed server process.
async fn read_stderr_on_failure(stderr_handle: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(STDERR_CAPTURE_TIMEOUT, stderr.read_to_string(&mut buf)).await {
        Ok(Ok(_)) => {
            if buf.len() > STDERR_CAPTURE_LIMIT {
                let mut cut = STDERR_CAPTURE_LIMIT;
                while !buf.is_char_boundary(cut) {
                    cut -= 1;
                }
                buf.truncate(cut);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Factory ────────────────────────────────────────────────────────────────

/// Opens connections by spawning server processes.
#[derive(Debug, Clone, Default)]
pub struct StdioTransportFactory {
    /// Default working directory for servers without their own `cwd`.
    pub working_dir: Option<String>,
}

impl StdioTransportFactory {
    pub fn new(working_dir: Option<String>) -> Self {
        Self { working_dir }
    }
}

#[async_trait]
impl TransportFactory for StdioTransportFactory {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError> {
        let server = spawn_server(config, self.working_dir.as_deref()).await?;
        Ok(Arc::new(server))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
