//! Connection supervisor — lifecycle state machine for every MCP server.
//!
//! ```text
//! connecting ──ok──▶ connected ──disconnect──▶ disconnected
//!     │                  │
//!     └──fail──▶ error ◀─┘ (probe / runtime failure)
//!                 │  ▲
//!   backoff timer │  │ attempts exhausted (terminal until reconnect)
//!                 ▼  │
//!              connecting
//! ```
//!
//! All mutable state sits behind one async mutex that is never held across a
//! transport call. Each connection carries a generation number, bumped on
//! every connect attempt and disconnect, so results that arrive after the
//! connection moved on are discarded. At most one reconnection timer is
//! pending per connection: scheduling always cancels the previous one first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::catalog::{build_descriptors, discover_tools, parse_tool_name, ToolCatalog, DEFAULT_CACHE_TTL};
use super::config::validate_server_configs;
use super::errors::McpError;
use super::registry::ConnectionRegistry;
use super::transport::{McpTransport, TransportFactory};
use super::types::{
    Connection, ConnectionStatus, McpToolDefinition, ServerConfig, ServerStatusInfo, ToolDescriptor,
};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Tuning knobs for the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Reconnection attempts allowed before a server is left in `error`.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Connect + discovery deadline, unless the server config overrides it.
    pub connection_timeout: Duration,
    pub health_check_interval: Duration,
    pub tool_cache_ttl: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(30),
            tool_cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Backoff delay before reconnection attempt number `attempt` (0-based):
/// `base * 2^attempt`, saturating.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

// ─── Public Result Types ────────────────────────────────────────────────────

/// A namespaced tool name resolved to a live transport.
#[derive(Clone)]
pub struct ResolvedTool {
    pub connection_id: String,
    pub raw_name: String,
    pub transport: Arc<dyn McpTransport>,
}

/// Outcome counts of one health-check pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCheckSummary {
    pub checked: usize,
    pub healthy: usize,
    pub failed: usize,
}

// ─── State ──────────────────────────────────────────────────────────────────

struct PendingReconnect {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SupervisorState {
    registry: ConnectionRegistry,
    catalog: ToolCatalog,
    transports: HashMap<String, Arc<dyn McpTransport>>,
    generations: HashMap<String, u64>,
    timers: HashMap<String, PendingReconnect>,
    next_timer_token: u64,
}

impl SupervisorState {
    fn bump_generation(&mut self, id: &str) -> u64 {
        let generation = self.generations.entry(id.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn generation(&self, id: &str) -> u64 {
        self.generations.get(id).copied().unwrap_or(0)
    }

    fn cancel_timer(&mut self, id: &str) -> bool {
        match self.timers.remove(id) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Armed while a connect attempt is in flight. If the attempt's future is
/// dropped first, the record is moved out of `connecting`.
struct PendingConnect {
    supervisor: ConnectionSupervisor,
    id: String,
    generation: u64,
    armed: bool,
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let supervisor = self.supervisor.clone();
        let id = std::mem::take(&mut self.id);
        let generation = self.generation;
        runtime.spawn(async move {
            supervisor.abandon_connect(&id, generation).await;
        });
    }
}

struct Inner {
    config: SupervisorConfig,
    factory: Arc<dyn TransportFactory>,
    state: Mutex<SupervisorState>,
    shutting_down: AtomicBool,
    background: CancellationToken,
}

// ─── ConnectionSupervisor ───────────────────────────────────────────────────

/// Cheaply cloneable handle to the supervisor.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl ConnectionSupervisor {
    pub fn new(config: SupervisorConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let state = SupervisorState {
            catalog: ToolCatalog::new(config.tool_cache_ttl),
            ..SupervisorState::default()
        };
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                state: Mutex::new(state),
                shutting_down: AtomicBool::new(false),
                background: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    fn connection_timeout_for(&self, config: &ServerConfig) -> Duration {
        config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.inner.config.connection_timeout)
    }

    // ─── Connect ────────────────────────────────────────────────────────

    /// Connect a server and discover its tools.
    ///
    /// Disabled configs and already-connected servers are left alone. On
    /// failure the record moves to `error`, a reconnection is scheduled, and
    /// the error is also returned to the caller.
    pub async fn connect(&self, config: &ServerConfig) -> Result<(), McpError> {
        if !config.enabled {
            tracing::debug!(server = %config.id, "server disabled, not connecting");
            return Ok(());
        }
        validate_server_configs(std::slice::from_ref(config))?;

        let generation = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            if state.registry.get(&config.id).is_some_and(Connection::is_connected) {
                return Ok(());
            }
            state.cancel_timer(&config.id);
            state.registry.upsert_connecting(config);
            state.bump_generation(&config.id)
        };
        let mut pending = PendingConnect {
            supervisor: self.clone(),
            id: config.id.clone(),
            generation,
            armed: true,
        };

        let timeout = self.connection_timeout_for(config);
        tracing::info!(server = %config.id, command = %config.command, timeout_ms = timeout.as_millis() as u64, "connecting");

        let attempt = async {
            let transport = self.inner.factory.connect(config).await?;
            match discover_tools(&config.id, transport.as_ref()).await {
                Ok(tools) => Ok((transport, tools)),
                Err(e) => {
                    close_quietly(&config.id, transport).await;
                    Err(e)
                }
            }
        };

        let outcome = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(McpError::ConnectTimeout {
                name: config.id.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        let result = match outcome {
            Ok((transport, tools)) => {
                self.finish_connect(&config.id, generation, transport, tools)
                    .await;
                Ok(())
            }
            Err(e) => {
                self.fail_connect(&config.id, generation, &e).await;
                Err(e)
            }
        };
        pending.armed = false;
        result
    }

    /// Settle a `connecting` record whose connect future was dropped.
    async fn abandon_connect(&self, id: &str, generation: u64) {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if state.generation(id) != generation {
            return;
        }
        if let Some(conn) = state
            .registry
            .get_mut(id)
            .filter(|c| c.status == ConnectionStatus::Connecting)
        {
            conn.status = ConnectionStatus::Error;
            conn.last_error = Some("connect attempt abandoned before completion".into());
            tracing::warn!(server = id, "connect attempt abandoned");
        }
    }

    async fn finish_connect(
        &self,
        id: &str,
        generation: u64,
        transport: Arc<dyn McpTransport>,
        tools: Vec<ToolDescriptor>,
    ) {
        let tool_count = tools.len();
        let (applied, superseded) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let current = state.generation(id) == generation && !self.is_shutting_down();
            match state.registry.get_mut(id).filter(|_| current) {
                Some(conn) => {
                    let now = Utc::now();
                    conn.status = ConnectionStatus::Connected;
                    conn.reconnect_attempts = 0;
                    conn.last_error = None;
                    conn.connection_start_time = Some(now);
                    conn.last_health_check = Some(now);
                    conn.tools = tools.clone();
                    state.catalog.store(id, tools);
                    state.cancel_timer(id);
                    (true, state.transports.insert(id.to_string(), transport))
                }
                None => (false, Some(transport)),
            }
        };

        if let Some(old) = superseded {
            tracing::debug!(server = id, "closing superseded transport");
            close_quietly(id, old).await;
        }
        if applied {
            tracing::info!(server = id, tools = tool_count, "connected");
        }
    }

    async fn fail_connect(&self, id: &str, generation: u64, error: &McpError) {
        let should_retry = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            if state.generation(id) != generation {
                tracing::debug!(server = id, error = %error, "ignoring failure of superseded connect attempt");
                return;
            }
            let Some(conn) = state.registry.get_mut(id) else {
                return;
            };
            conn.status = ConnectionStatus::Error;
            conn.last_error = Some(error.to_string());
            conn.config.enabled && !self.is_shutting_down()
        };

        tracing::warn!(server = id, error = %error, "connection failed");
        if should_retry {
            self.schedule_reconnection(id).await;
        }
    }

    // ─── Disconnect / Reconnect ─────────────────────────────────────────

    /// Disconnect a server. Idempotent; unknown ids are ignored.
    pub async fn disconnect(&self, id: &str) {
        let transport = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            if state.cancel_timer(id) {
                tracing::debug!(server = id, "cancelled pending reconnection");
            }
            state.catalog.invalidate(id);
            if state.registry.contains(id) {
                state.bump_generation(id);
            }
            if let Some(conn) = state.registry.get_mut(id) {
                conn.status = ConnectionStatus::Disconnected;
                conn.tools.clear();
            }
            state.transports.remove(id)
        };

        if let Some(transport) = transport {
            close_quietly(id, transport).await;
            tracing::info!(server = id, "disconnected");
        }
    }

    /// Disconnect, reset the attempt counter, and connect again.
    pub async fn reconnect(&self, id: &str) -> Result<(), McpError> {
        let config = {
            let state = self.inner.state.lock().await;
            state.registry.get(id).map(|c| c.config.clone())
        }
        .ok_or_else(|| McpError::ServerNotFound {
            name: id.to_string(),
        })?;

        self.disconnect(id).await;
        {
            let mut state = self.inner.state.lock().await;
            if let Some(conn) = state.registry.get_mut(id) {
                conn.reconnect_attempts = 0;
            }
        }
        self.connect(&config).await
    }

    // ─── Backoff ────────────────────────────────────────────────────────

    /// Schedule the next reconnection attempt for a failed server, replacing
    /// any pending one. Once attempts are exhausted the server stays in
    /// `error` and nothing is scheduled.
    pub async fn schedule_reconnection(&self, id: &str) {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if self.is_shutting_down() {
            return;
        }
        let Some(conn) = state.registry.get_mut(id) else {
            return;
        };
        if !conn.config.enabled {
            return;
        }

        let max = self.inner.config.max_reconnect_attempts;
        if conn.reconnect_attempts >= max {
            let exhausted = McpError::ReconnectExhausted {
                name: id.to_string(),
                attempts: max,
            };
            conn.status = ConnectionStatus::Error;
            conn.last_error = Some(exhausted.to_string());
            state.cancel_timer(id);
            tracing::error!(server = id, attempts = max, "giving up on server");
            return;
        }

        let attempt = conn.reconnect_attempts;
        let delay = backoff_delay(self.inner.config.reconnect_base_delay, attempt);
        state.cancel_timer(id);
        state.next_timer_token += 1;
        let token = state.next_timer_token;
        let handle = tokio::spawn(self.clone().reconnect_after(id.to_string(), token, delay));
        state.timers.insert(id.to_string(), PendingReconnect { token, handle });

        tracing::info!(
            server = id,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduled reconnection"
        );
    }

    /// Timer body. Boxed so the connect → schedule → connect cycle has a
    /// nameable future type.
    fn reconnect_after(self, id: String, token: u64, delay: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tokio::time::sleep(delay).await;

            let config = {
                let mut guard = self.inner.state.lock().await;
                let state = &mut *guard;
                match state.timers.get(&id) {
                    Some(pending) if pending.token == token => {
                        state.timers.remove(&id);
                    }
                    _ => return,
                }
                if self.is_shutting_down() {
                    return;
                }
                let Some(conn) = state.registry.get_mut(&id) else {
                    return;
                };
                conn.reconnect_attempts += 1;
                conn.last_reconnect_time = Some(Utc::now());
                tracing::info!(server = %id, attempt = conn.reconnect_attempts, "reconnecting");
                conn.config.clone()
            };

            if let Err(e) = self.connect(&config).await {
                tracing::debug!(server = %id, error = %e, "reconnection attempt failed");
            }
        })
    }

    /// Number of pending reconnection timers for `id` (0 or 1).
    pub async fn pending_reconnect_count(&self, id: &str) -> usize {
        let state = self.inner.state.lock().await;
        usize::from(state.timers.contains_key(id))
    }

    // ─── Runtime Failures ───────────────────────────────────────────────

    /// Mark a connected server as failed after a connection-level error seen
    /// outside the supervisor (e.g. during a tool call) and schedule a retry.
    pub async fn report_connection_failure(&self, id: &str, message: &str) {
        let (transport, should_retry) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let Some(conn) = state.registry.get_mut(id).filter(|c| c.is_connected()) else {
                return;
            };
            conn.status = ConnectionStatus::Error;
            conn.last_error = Some(message.to_string());
            let should_retry = conn.config.enabled && !self.is_shutting_down();
            state.bump_generation(id);
            (state.transports.remove(id), should_retry)
        };

        tracing::warn!(server = id, error = message, "connection failure reported");
        if let Some(transport) = transport {
            close_quietly(id, transport).await;
        }
        if should_retry {
            self.schedule_reconnection(id).await;
        }
    }

    // ─── Health Checks ──────────────────────────────────────────────────

    /// Probe every connected server by listing its tools.
    pub async fn perform_health_check(&self) -> HealthCheckSummary {
        let targets: Vec<(String, u64, Duration, Arc<dyn McpTransport>)> = {
            let state = self.inner.state.lock().await;
            state
                .registry
                .iter()
                .filter(|c| c.is_connected())
                .filter_map(|c| {
                    state.transports.get(&c.id).map(|t| {
                        (
                            c.id.clone(),
                            state.generation(&c.id),
                            self.connection_timeout_for(&c.config),
                            Arc::clone(t),
                        )
                    })
                })
                .collect()
        };

        let probes = targets.into_iter().map(|(id, generation, timeout, transport)| async move {
            let result = match tokio::time::timeout(timeout, transport.list_tools()).await {
                Ok(result) => result,
                Err(_) => Err(McpError::TransportError {
                    server: id.clone(),
                    reason: format!("health check timed out after {}ms", timeout.as_millis()),
                }),
            };
            (id, generation, result)
        });
        let results = join_all(probes).await;

        let mut summary = HealthCheckSummary {
            checked: results.len(),
            ..HealthCheckSummary::default()
        };
        for (id, generation, result) in results {
            if result.is_ok() {
                summary.healthy += 1;
            } else {
                summary.failed += 1;
            }
            self.apply_probe(&id, generation, result).await;
        }
        summary
    }

    async fn apply_probe(
        &self,
        id: &str,
        generation: u64,
        result: Result<Vec<McpToolDefinition>, McpError>,
    ) {
        let (transport, should_retry) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            if state.generation(id) != generation {
                return;
            }
            let Some(conn) = state.registry.get_mut(id).filter(|c| c.is_connected()) else {
                return;
            };

            match result {
                Ok(raw) => {
                    conn.last_health_check = Some(Utc::now());
                    if state.catalog.is_expired(id) {
                        let tools = build_descriptors(id, raw);
                        tracing::debug!(server = id, tools = tools.len(), "refreshed tool cache");
                        conn.tools = tools.clone();
                        state.catalog.store(id, tools);
                    }
                    return;
                }
                Err(e) => {
                    let message = e.to_string();
                    if !e.is_connection_failure() {
                        tracing::warn!(server = id, error = %message, "health check failed");
                        conn.last_error = Some(message);
                        return;
                    }
                    tracing::warn!(server = id, error = %message, "health check lost connection");
                    conn.status = ConnectionStatus::Error;
                    conn.last_error = Some(message);
                    let should_retry = conn.config.enabled && !self.is_shutting_down();
                    state.bump_generation(id);
                    (state.transports.remove(id), should_retry)
                }
            }
        };

        if let Some(transport) = transport {
            close_quietly(id, transport).await;
        }
        if should_retry {
            self.schedule_reconnection(id).await;
        }
    }

    /// Run health checks every `health_check_interval` until shutdown.
    pub fn spawn_health_monitor(&self) -> JoinHandle<()> {
        let this = self.clone();
        let cancel = self.inner.background.clone();
        let period = self.inner.config.health_check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; servers were just probed by connect.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let summary = this.perform_health_check().await;
                        tracing::debug!(
                            checked = summary.checked,
                            healthy = summary.healthy,
                            failed = summary.failed,
                            "health check complete"
                        );
                    }
                }
            }
        })
    }

    // ─── Config Updates ─────────────────────────────────────────────────

    /// Reconcile connections with a new set of server configs.
    pub async fn update_server_configs(&self, configs: Vec<ServerConfig>) -> Result<(), McpError> {
        validate_server_configs(&configs)?;
        let incoming: HashMap<&str, &ServerConfig> =
            configs.iter().map(|c| (c.id.as_str(), c)).collect();

        let current: Vec<(String, ServerConfig)> = {
            let state = self.inner.state.lock().await;
            state
                .registry
                .iter()
                .map(|c| (c.id.clone(), c.config.clone()))
                .collect()
        };

        let mut relaunch = Vec::new();
        for (id, old) in &current {
            match incoming.get(id.as_str()) {
                None => {
                    tracing::info!(server = %id, "server removed from config");
                    self.disconnect(id).await;
                    self.remove_record(id).await;
                }
                Some(new) if !new.enabled => {
                    if old.enabled {
                        tracing::info!(server = %id, "server disabled");
                        self.disconnect(id).await;
                    }
                    self.set_config(new).await;
                }
                Some(new) if old.launch_differs(new) => {
                    tracing::info!(server = %id, "server config changed, reconnecting");
                    self.set_config(new).await;
                    relaunch.push(id.clone());
                }
                Some(_) => {}
            }
        }

        let known: Vec<&str> = current.iter().map(|(id, _)| id.as_str()).collect();
        let reconnects = relaunch.iter().map(|id| async move {
            // Failures are recorded on the connection and retried by the backoff timer.
            let _ = self.reconnect(id).await;
        });
        let connects = configs
            .iter()
            .filter(|c| c.enabled && !known.contains(&c.id.as_str()))
            .map(|config| async move {
                let _ = self.connect(config).await;
            });

        join_all(reconnects).await;
        join_all(connects).await;
        Ok(())
    }

    async fn set_config(&self, config: &ServerConfig) {
        let mut state = self.inner.state.lock().await;
        if let Some(conn) = state.registry.get_mut(&config.id) {
            conn.config = config.clone();
        }
    }

    async fn remove_record(&self, id: &str) {
        let mut state = self.inner.state.lock().await;
        state.cancel_timer(id);
        state.catalog.invalidate(id);
        state.generations.remove(id);
        state.registry.remove(id);
    }

    /// Apply every config set published on `rx`, starting with the current one.
    pub fn spawn_config_listener(&self, mut rx: watch::Receiver<Vec<ServerConfig>>) -> JoinHandle<()> {
        let this = self.clone();
        let cancel = self.inner.background.clone();

        tokio::spawn(async move {
            loop {
                let configs = rx.borrow_and_update().clone();
                if let Err(e) = this.update_server_configs(configs).await {
                    tracing::error!(error = %e, "rejected server config update");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            tracing::debug!("config provider closed");
                            break;
                        }
                    }
                }
            }
        })
    }

    // ─── Shutdown ───────────────────────────────────────────────────────

    /// Stop background tasks, cancel timers, and disconnect every server.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        self.inner.background.cancel();

        let ids = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            for (_, pending) in state.timers.drain() {
                pending.handle.abort();
            }
            state.registry.ids()
        };

        join_all(ids.iter().map(|id| self.disconnect(id))).await;
        tracing::info!(servers = ids.len(), "supervisor shut down");
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub async fn connection_statuses(&self) -> Vec<ServerStatusInfo> {
        self.inner.state.lock().await.registry.statuses()
    }

    pub async fn connection(&self, id: &str) -> Option<Connection> {
        self.inner.state.lock().await.registry.get(id).cloned()
    }

    pub async fn all_tools(&self) -> Vec<ToolDescriptor> {
        let state = self.inner.state.lock().await;
        state.catalog.all_tools(&state.registry)
    }

    pub async fn server_tools(&self, id: &str) -> Vec<ToolDescriptor> {
        let state = self.inner.state.lock().await;
        state.catalog.server_tools(&state.registry, id)
    }

    /// Resolve `"server.tool"` to a connected server's transport.
    pub async fn resolve_tool(&self, namespaced_name: &str) -> Result<ResolvedTool, McpError> {
        let (server, raw_name) = parse_tool_name(namespaced_name)?;
        let state = self.inner.state.lock().await;
        let conn = state
            .registry
            .get(server)
            .ok_or_else(|| McpError::ServerNotFound {
                name: server.to_string(),
            })?;
        let not_connected = || McpError::ServerNotConnected {
            name: server.to_string(),
            status: conn.status.to_string(),
        };
        if !conn.is_connected() {
            return Err(not_connected());
        }
        let transport = state.transports.get(server).cloned().ok_or_else(not_connected)?;

        Ok(ResolvedTool {
            connection_id: server.to_string(),
            raw_name: raw_name.to_string(),
            transport,
        })
    }
}

/// Close a transport, logging instead of propagating failures.
async fn close_quietly(id: &str, transport: Arc<dyn McpTransport>) {
    if let Err(e) = transport.close().await {
        tracing::warn!(server = id, error = %e, "error while closing connection");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
