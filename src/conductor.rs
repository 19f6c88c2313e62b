//! Conductor — owns the supervisor, the coordinator and their background tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::execution::ExecutionCoordinator;
use crate::mcp_client::config::ConfigFileWatcher;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::lifecycle::StdioTransportFactory;
use crate::mcp_client::supervisor::ConnectionSupervisor;
use crate::mcp_client::transport::TransportFactory;
use crate::mcp_client::types::ServerConfig;

pub struct Conductor {
    supervisor: ConnectionSupervisor,
    coordinator: Arc<ExecutionCoordinator>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Conductor {
    pub fn new(config: &RuntimeConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let supervisor =
            ConnectionSupervisor::new(config.supervisor.to_supervisor_config(), factory);
        let coordinator = Arc::new(ExecutionCoordinator::new(
            supervisor.clone(),
            config.execution.to_coordinator_config(),
        ));
        Self {
            supervisor,
            coordinator,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Conductor that launches servers as child processes.
    pub fn with_stdio_transport(config: &RuntimeConfig, working_dir: Option<String>) -> Self {
        Self::new(config, Arc::new(StdioTransportFactory::new(working_dir)))
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    /// Connect the current server set, then follow `servers` for updates and
    /// start the health monitor.
    pub async fn start(&mut self, servers: watch::Receiver<Vec<ServerConfig>>) -> Result<(), McpError> {
        let initial = servers.borrow().clone();
        self.supervisor.update_server_configs(initial).await?;

        self.tasks.push(self.supervisor.spawn_config_listener(servers));
        self.tasks.push(self.supervisor.spawn_health_monitor());
        Ok(())
    }

    /// [`start`](Self::start) with a file-backed server set.
    pub async fn start_with_config_file(
        &mut self,
        path: PathBuf,
        initial: Vec<ServerConfig>,
        poll_interval: Duration,
    ) -> Result<(), McpError> {
        let watcher = ConfigFileWatcher::new(path, poll_interval);
        let (rx, handle) = watcher.spawn(initial, self.cancel.clone());
        self.tasks.push(handle);
        self.start(rx).await
    }

    /// Cancel in-flight executions, stop background tasks and disconnect
    /// every server.
    pub async fn shutdown(self) {
        let cancelled = self.coordinator.cancel_all();
        if cancelled > 0 {
            tracing::info!(executions = cancelled, "cancelled in-flight executions");
        }

        self.cancel.cancel();
        self.supervisor.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "background task failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionStatus, ToolCall};
    use crate::mcp_client::testing::{MockFactory, MockTransport};

    #[tokio::test]
    async fn test_start_execute_shutdown() {
        let factory = Arc::new(MockFactory::new());
        let transport = MockTransport::with_tools(&["list_dir"]);
        factory.serve("fs", Arc::clone(&transport));

        let mut conductor = Conductor::new(&RuntimeConfig::default(), factory);
        let (_tx, rx) = watch::channel(vec![ServerConfig::new("fs", "mock")]);
        conductor.start(rx).await.unwrap();

        let tools = conductor.supervisor().all_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].namespaced_name, "fs.list_dir");

        let outcome = conductor
            .coordinator()
            .execute_tool(&ToolCall::new("c1", "fs.list_dir", "{}"), "s1")
            .await
            .unwrap();
        assert_eq!(outcome.status(), Some(ExecutionStatus::Success));

        let supervisor = conductor.supervisor().clone();
        conductor.shutdown().await;
        assert!(transport.is_closed());
        assert!(supervisor.all_tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_server_set() {
        let factory = Arc::new(MockFactory::new());
        let mut conductor = Conductor::new(&RuntimeConfig::default(), factory);
        let (_tx, rx) = watch::channel(vec![ServerConfig::new("", "mock")]);

        assert!(matches!(
            conductor.start(rx).await,
            Err(McpError::ConfigError { .. })
        ));
        conductor.shutdown().await;
    }
}
