//! Transport adapter contract and the JSON-RPC over stdio transport.
//!
//! The supervisor and coordinator only see [`McpTransport`] and
//! [`TransportFactory`]. [`StdioTransport`] is the line-delimited JSON-RPC
//! implementation used by spawned server processes:
//! - requests are written to stdin, one JSON object per line
//! - a background reader routes responses from stdout to waiting callers by id
//! - non-JSON lines and server notifications are skipped

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::McpError;
use super::types::{JsonRpcRequest, JsonRpcResponse, McpToolDefinition, ServerConfig, INTERNAL_ERROR};

// ─── Adapter Contract ───────────────────────────────────────────────────────

/// A live connection to one tool server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// List the tools the server currently exposes.
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError>;

    /// Invoke a tool by its raw (unprefixed) name.
    ///
    /// Implementations must return promptly with [`McpError::Cancelled`]
    /// once `cancel` fires.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, McpError>;

    /// Close the connection. Best-effort; safe to call more than once.
    async fn close(&self) -> Result<(), McpError>;
}

/// Opens transports from launch configs.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError>;
}

// ─── Stdio Transport ────────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

fn lock_pending(
    pending: &Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<JsonRpcResponse>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a pending request slot when the waiting future goes away.
struct PendingSlot {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        lock_pending(&self.pending).remove(&self.id);
    }
}

/// Bi-directional JSON-RPC transport over a byte stream pair.
pub struct StdioTransport {
    server_name: String,
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl StdioTransport {
    /// Wrap a writer/reader pair (typically a child's stdin/stdout).
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader_task = tokio::spawn(read_responses(
            server_name.to_string(),
            BufReader::new(reader),
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Self {
            server_name: server_name.to_string(),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader_task,
        }
    }

    fn transport_error(&self, reason: impl Into<String>) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason: reason.into(),
        }
    }

    /// Whether the server's output stream has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a request and wait for the matching response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        self.request_cancellable(method, params, &CancellationToken::new())
            .await
    }

    /// Like [`request`](Self::request) but gives up when `cancel` fires,
    /// telling the server with a `notifications/cancelled` message.
    pub async fn request_cancellable(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, McpError> {
        if self.is_closed() {
            return Err(self.transport_error("server stdout closed (process may have exited)"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _slot = PendingSlot {
            pending: Arc::clone(&self.pending),
            id,
        };
        // The reader may have drained the map between the first check and the insert.
        if self.is_closed() {
            return Err(self.transport_error("server stdout closed (process may have exited)"));
        }

        let req = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;
        self.write_line(line).await?;

        tokio::select! {
            response = rx => response.map_err(|_| {
                self.transport_error("server stdout closed (process may have exited)")
            }),
            _ = cancel.cancelled() => {
                let params = serde_json::json!({ "requestId": id, "reason": "cancelled by client" });
                if let Err(e) = self.notify("notifications/cancelled", Some(params)).await {
                    tracing::debug!(server = %self.server_name, error = %e, "failed to send cancel notification");
                }
                Err(McpError::Cancelled { name: self.server_name.clone() })
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }
        let line = serde_json::to_string(&notification)
            .map_err(|e| self.transport_error(format!("failed to serialize notification: {e}")))?;
        self.write_line(line).await
    }

    async fn write_line(&self, mut line: String) -> Result<(), McpError> {
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Route response lines to their waiting requests until the stream ends.
async fn read_responses<R>(
    server_name: String,
    mut reader: BufReader<R>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(server = %server_name, error = %e, "failed to read from server stdout");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Log output and server-initiated notifications are not responses.
        let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) else {
            tracing::trace!(server = %server_name, line = trimmed, "skipping non-response line");
            continue;
        };

        let waiter = lock_pending(&pending).remove(&response.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => {
                tracing::debug!(server = %server_name, id = response.id, "dropping response with no waiter");
            }
        }
    }

    closed.store(true, Ordering::Release);
    // Dropping the senders wakes every waiter with a closed-channel error.
    lock_pending(&pending).clear();
    tracing::debug!(server = %server_name, "server output stream ended");
}

// ─── Response Helpers ───────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
