//! ExecutionCoordinator — runs tool calls against supervised servers.
//!
//! Each call goes through the same lifecycle:
//! admit (concurrency ceiling) → validate → resolve → invoke → process →
//! complete, raced against the call's timeout and its cancellation token.
//! Every admitted call produces exactly one finalized [`ExecutionRecord`],
//! which is appended to the bounded history. The coordinator never retries.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::errors::ExecutionError;
use super::events::{EventBus, EventKind, ExecutionEvent, ExecutionObserver, StatusKind};
use super::history::{ExecutionHistory, ExecutionStats};
use super::types::{
    CoordinatorConfig, ExecutionOutcome, ExecutionRecord, ExecutionStage, ExecutionStatus,
    ProgressEvent, TimeoutPolicy, ToolCall,
};
use super::validation::{check_required_fields, parse_arguments};
use crate::mcp_client::catalog::parse_tool_name;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::supervisor::ConnectionSupervisor;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ActiveExecution {
    session_id: String,
    tool_name: String,
    cancel: CancellationToken,
}

type ActiveMap = Mutex<HashMap<String, ActiveExecution>>;

/// Frees an execution slot when the call settles or its future is dropped.
struct ActiveSlot<'a> {
    active: &'a ActiveMap,
    tool_call_id: String,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        lock(self.active).remove(&self.tool_call_id);
    }
}

/// How long a cancelled or timed-out call may take to wind down after its
/// token fires.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

enum Settled {
    Finished(Result<Value, ExecutionError>),
    TimedOut,
    Cancelled,
}

// ─── ExecutionCoordinator ───────────────────────────────────────────────────

pub struct ExecutionCoordinator {
    supervisor: ConnectionSupervisor,
    config: CoordinatorConfig,
    active: ActiveMap,
    history: Mutex<ExecutionHistory>,
    events: EventBus,
}

impl ExecutionCoordinator {
    pub fn new(supervisor: ConnectionSupervisor, config: CoordinatorConfig) -> Self {
        Self {
            history: Mutex::new(ExecutionHistory::new(config.history_capacity)),
            events: EventBus::new(config.event_capacity),
            active: Mutex::new(HashMap::new()),
            supervisor,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Execute with the coordinator's default timeout policy.
    pub async fn execute_tool(
        &self,
        tool_call: &ToolCall,
        session_id: &str,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        self.execute_tool_with_feedback(tool_call, session_id, &self.config.timeouts, None)
            .await
    }

    /// Execute one tool call with staged progress reporting.
    ///
    /// Returns `Err` only when the call is not admitted (concurrency ceiling
    /// or a duplicate active `tool_call.id`); no record is created then.
    /// Every other failure is reported through the returned outcome.
    pub async fn execute_tool_with_feedback(
        &self,
        tool_call: &ToolCall,
        session_id: &str,
        timeouts: &TimeoutPolicy,
        observer: Option<&dyn ExecutionObserver>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let cancel = CancellationToken::new();
        let _slot = self.acquire_slot(tool_call, session_id, cancel.clone())?;

        let timeout = timeouts.timeout_for(&tool_call.name);
        let timeout_ms = timeout.as_millis() as u64;
        let warning = timeouts.warning_for(timeout);
        let mut record = ExecutionRecord::pending(tool_call, session_id, timeout);
        let started = Instant::now();

        tracing::info!(
            tool = %tool_call.name,
            tool_call_id = %tool_call.id,
            session = session_id,
            timeout_ms,
            "executing tool"
        );
        self.notify_status(
            tool_call,
            session_id,
            observer,
            StatusKind::Started,
            &format!("Executing {}", tool_call.name),
        );

        let (settled, elapsed) = {
            let pipeline = self.run_stages(tool_call, &cancel, &mut record, observer);
            tokio::pin!(pipeline);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            let warn_at = tokio::time::sleep(warning.unwrap_or(timeout));
            tokio::pin!(warn_at);
            let mut warned = warning.is_none();

            let settled = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Settled::Cancelled,
                    result = &mut pipeline => break Settled::Finished(result),
                    _ = &mut deadline => break Settled::TimedOut,
                    _ = &mut warn_at, if !warned => {
                        warned = true;
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        tracing::warn!(
                            tool = %tool_call.name,
                            tool_call_id = %tool_call.id,
                            elapsed_ms,
                            timeout_ms,
                            "tool is approaching its time limit"
                        );
                        self.notify_status(
                            tool_call,
                            session_id,
                            observer,
                            StatusKind::Warning,
                            &format!(
                                "{} still running after {elapsed_ms}ms (limit {timeout_ms}ms)",
                                tool_call.name
                            ),
                        );
                    }
                }
            };
            let elapsed = started.elapsed();

            // Let the transport observe the token; its late result is discarded.
            if !matches!(settled, Settled::Finished(_)) {
                cancel.cancel();
                let drained = tokio::time::timeout(CANCEL_GRACE, &mut pipeline).await;
                if drained.is_err() {
                    tracing::warn!(
                        tool = %tool_call.name,
                        tool_call_id = %tool_call.id,
                        grace_ms = CANCEL_GRACE.as_millis() as u64,
                        "transport did not acknowledge cancellation"
                    );
                }
            }
            (settled, elapsed)
        };

        let execution_time_ms = elapsed.as_millis() as u64;
        let (result, error) = match settled {
            Settled::Finished(Ok(value)) => (Some(value), None),
            Settled::Finished(Err(e)) => (None, Some(e)),
            Settled::TimedOut => {
                let error = ExecutionError::Timeout {
                    tool: tool_call.name.clone(),
                    timeout_ms,
                };
                (None, Some(error))
            }
            Settled::Cancelled => {
                if let Some(observer) = observer {
                    observer.on_status(&tool_call.id, StatusKind::Cancelled, "Execution cancelled");
                }
                let error = ExecutionError::Cancelled {
                    tool_call_id: tool_call.id.clone(),
                };
                (None, Some(error))
            }
        };

        let status = error
            .as_ref()
            .map_or(ExecutionStatus::Success, ExecutionError::status);
        record.finalize(
            status,
            result.clone(),
            error.as_ref().map(ToString::to_string),
            execution_time_ms,
        );
        lock(&self.history).push(record.clone());

        match &error {
            None => tracing::info!(
                tool = %tool_call.name,
                tool_call_id = %tool_call.id,
                execution_time_ms,
                "tool execution succeeded"
            ),
            Some(e) => {
                tracing::warn!(
                    tool = %tool_call.name,
                    tool_call_id = %tool_call.id,
                    status = ?status,
                    execution_time_ms,
                    error = %e,
                    "tool execution failed"
                );
                self.publish(tool_call, session_id, EventKind::Error { message: e.to_string() });
            }
        }
        self.publish(
            tool_call,
            session_id,
            EventKind::Completed {
                status,
                execution_time_ms,
            },
        );

        Ok(ExecutionOutcome {
            result,
            execution_time_ms,
            history_entry: record,
            error,
        })
    }

    fn acquire_slot(
        &self,
        tool_call: &ToolCall,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<ActiveSlot<'_>, ExecutionError> {
        let mut active = lock(&self.active);
        let limit = self.config.max_concurrent_executions;
        if active.len() >= limit {
            tracing::warn!(tool = %tool_call.name, limit, "rejecting tool call, concurrency limit reached");
            return Err(ExecutionError::ConcurrencyLimit { limit });
        }
        if active.contains_key(&tool_call.id) {
            return Err(ExecutionError::DuplicateToolCall {
                tool_call_id: tool_call.id.clone(),
            });
        }

        active.insert(
            tool_call.id.clone(),
            ActiveExecution {
                session_id: session_id.to_string(),
                tool_name: tool_call.name.clone(),
                cancel,
            },
        );
        Ok(ActiveSlot {
            active: &self.active,
            tool_call_id: tool_call.id.clone(),
        })
    }

    // ─── Stages ─────────────────────────────────────────────────────────

    async fn run_stages(
        &self,
        tool_call: &ToolCall,
        cancel: &CancellationToken,
        record: &mut ExecutionRecord,
        observer: Option<&dyn ExecutionObserver>,
    ) -> Result<Value, ExecutionError> {
        self.progress(record, observer, ExecutionStage::Validate, "Validating arguments");
        let arguments = parse_arguments(&tool_call.arguments)?;
        record.parameters = Some(Value::Object(arguments.clone()));
        let raw_name = parse_tool_name(&tool_call.name).map_or(tool_call.name.as_str(), |(_, raw)| raw);
        check_required_fields(raw_name, &arguments)?;

        self.progress(
            record,
            observer,
            ExecutionStage::Resolve,
            format!("Resolving {}", tool_call.name),
        );
        let resolved = self
            .supervisor
            .resolve_tool(&tool_call.name)
            .await
            .map_err(|e| ExecutionError::from_resolve(&tool_call.name, e))?;
        record.connection_id = resolved.connection_id.clone();
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled {
                tool_call_id: tool_call.id.clone(),
            });
        }

        self.progress(
            record,
            observer,
            ExecutionStage::Invoke,
            format!("Calling {} on {}", resolved.raw_name, resolved.connection_id),
        );
        let value = resolved
            .transport
            .call_tool(&resolved.raw_name, Value::Object(arguments), cancel.clone())
            .await
            .map_err(|e| self.invoke_failure(tool_call, &resolved.connection_id, e))?;

        self.progress(record, observer, ExecutionStage::Process, "Processing result");
        self.progress(record, observer, ExecutionStage::Complete, "Execution complete");
        Ok(value)
    }

    /// Classify a failed transport call. Connection-level failures are handed
    /// to the supervisor so the server gets reconnected in the background.
    fn invoke_failure(&self, tool_call: &ToolCall, connection_id: &str, error: McpError) -> ExecutionError {
        if error.is_cancelled() {
            return ExecutionError::Cancelled {
                tool_call_id: tool_call.id.clone(),
            };
        }

        let reason = error.to_string();
        if error.is_connection_failure() {
            let supervisor = self.supervisor.clone();
            let id = connection_id.to_string();
            let message = reason.clone();
            tokio::spawn(async move {
                supervisor.report_connection_failure(&id, &message).await;
            });
            return ExecutionError::Connection {
                tool: tool_call.name.clone(),
                reason,
            };
        }

        ExecutionError::Provider {
            tool: tool_call.name.clone(),
            reason,
        }
    }

    // ─── Notifications ──────────────────────────────────────────────────

    fn progress(
        &self,
        record: &mut ExecutionRecord,
        observer: Option<&dyn ExecutionObserver>,
        stage: ExecutionStage,
        message: impl Into<String>,
    ) {
        let event = ProgressEvent::new(stage, message);
        tracing::debug!(
            tool_call_id = %record.tool_call_id,
            stage = ?stage,
            percent = event.percent,
            "{}",
            event.message
        );
        if let Some(observer) = observer {
            observer.on_progress(&record.tool_call_id, &event);
        }
        self.events.publish(ExecutionEvent::new(
            &record.tool_call_id,
            &record.session_id,
            EventKind::Progress(event.clone()),
        ));
        record.progress.push(event);
    }

    fn notify_status(
        &self,
        tool_call: &ToolCall,
        session_id: &str,
        observer: Option<&dyn ExecutionObserver>,
        status: StatusKind,
        message: &str,
    ) {
        if let Some(observer) = observer {
            observer.on_status(&tool_call.id, status, message);
        }
        self.publish(
            tool_call,
            session_id,
            EventKind::Status {
                status,
                message: message.to_string(),
            },
        );
    }

    fn publish(&self, tool_call: &ToolCall, session_id: &str, kind: EventKind) {
        self.events
            .publish(ExecutionEvent::new(&tool_call.id, session_id, kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    // ─── Cancellation ───────────────────────────────────────────────────

    /// Cancel an active execution. Returns `false` if `tool_call_id` is not
    /// currently executing.
    pub fn cancel_execution(&self, tool_call_id: &str) -> bool {
        let target = lock(&self.active).get(tool_call_id).map(|a| {
            (a.cancel.clone(), a.session_id.clone(), a.tool_name.clone())
        });
        let Some((token, session_id, tool_name)) = target else {
            return false;
        };

        token.cancel();
        tracing::info!(tool = %tool_name, tool_call_id, "execution cancelled");
        self.events.publish(ExecutionEvent::new(
            tool_call_id,
            &session_id,
            EventKind::Status {
                status: StatusKind::Cancelled,
                message: format!("Execution of {tool_name} cancelled"),
            },
        ));
        true
    }

    /// Cancel every active execution. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = lock(&self.active).keys().cloned().collect();
        ids.iter().filter(|id| self.cancel_execution(id)).count()
    }

    pub fn active_execution_count(&self) -> usize {
        lock(&self.active).len()
    }

    // ─── History ────────────────────────────────────────────────────────

    /// Finalized records, newest first.
    pub fn execution_history(&self, session_id: Option<&str>, limit: Option<usize>) -> Vec<ExecutionRecord> {
        lock(&self.history).query(session_id, limit)
    }

    pub fn clear_history(&self, session_id: Option<&str>) -> usize {
        lock(&self.history).clear(session_id)
    }

    pub fn execution_stats(&self, session_id: Option<&str>) -> ExecutionStats {
        lock(&self.history).stats(session_id)
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::supervisor::SupervisorConfig;
    use crate::mcp_client::testing::{MockFactory, MockTransport};
    use crate::mcp_client::transport::TransportFactory;
    use crate::mcp_client::types::{ConnectionStatus, ServerConfig};
    use std::sync::Arc;

    async fn setup(max_concurrent: usize) -> (Arc<ExecutionCoordinator>, Arc<MockTransport>) {
        let factory = Arc::new(MockFactory::new());
        let transport = MockTransport::with_tools(&["read_file", "list_dir", "web_search"]);
        factory.serve("fs", Arc::clone(&transport));

        let supervisor = ConnectionSupervisor::new(
            SupervisorConfig {
                reconnect_base_delay: Duration::from_secs(3600),
                ..SupervisorConfig::default()
            },
            factory as Arc<dyn TransportFactory>,
        );
        supervisor.connect(&ServerConfig::new("fs", "mock")).await.unwrap();

        let coordinator = ExecutionCoordinator::new(
            supervisor,
            CoordinatorConfig {
                max_concurrent_executions: max_concurrent,
                ..CoordinatorConfig::default()
            },
        );
        (Arc::new(coordinator), transport)
    }

    fn policy(timeout: Duration, warning: Option<Duration>) -> TimeoutPolicy {
        TimeoutPolicy {
            default_timeout: timeout,
            max_timeout: Duration::from_secs(300),
            per_tool: HashMap::new(),
            warning_threshold: warning,
        }
    }

    #[derive(Default)]
    struct Recorder {
        stages: Mutex<Vec<ExecutionStage>>,
        statuses: Mutex<Vec<StatusKind>>,
    }

    impl ExecutionObserver for Recorder {
        fn on_progress(&self, _tool_call_id: &str, event: &ProgressEvent) {
            self.stages.lock().unwrap().push(event.stage);
        }

        fn on_status(&self, _tool_call_id: &str, status: StatusKind, _message: &str) {
            self.statuses.lock().unwrap().push(status);
        }
    }

    #[tokio::test]
    async fn test_successful_execution_runs_every_stage() {
        let (coordinator, transport) = setup(5).await;
        let recorder = Recorder::default();
        let call = ToolCall::new("call_1", "fs.read_file", r#"{"path": "/tmp/a.txt"}"#);

        let outcome = coordinator
            .execute_tool_with_feedback(&call, "s1", &coordinator.config().timeouts, Some(&recorder))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert!(outcome.error.is_none());
        assert_eq!(outcome.history_entry.connection_id, "fs");
        assert_eq!(outcome.history_entry.parameters, Some(serde_json::json!({"path": "/tmp/a.txt"})));
        assert_eq!(
            *recorder.stages.lock().unwrap(),
            vec![
                ExecutionStage::Validate,
                ExecutionStage::Resolve,
                ExecutionStage::Invoke,
                ExecutionStage::Process,
                ExecutionStage::Complete
            ]
        );
        assert_eq!(*recorder.statuses.lock().unwrap(), vec![StatusKind::Started]);
        assert_eq!(outcome.history_entry.progress.last().unwrap().percent, 100);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "read_file");
        assert_eq!(coordinator.execution_history(None, None).len(), 1);
        assert_eq!(coordinator.active_execution_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_json_is_recorded_as_error() {
        let (coordinator, transport) = setup(5).await;
        let call = ToolCall::new("call_1", "fs.list_dir", "not-json");

        let outcome = coordinator.execute_tool(&call, "s1").await.unwrap();

        assert_eq!(outcome.status(), Some(ExecutionStatus::Error));
        let message = outcome.history_entry.error.clone().unwrap();
        assert!(message.contains("Invalid tool arguments JSON"), "{message}");
        assert!(matches!(outcome.error, Some(ExecutionError::Validation { .. })));
        assert!(outcome.history_entry.parameters.is_none());
        assert_eq!(outcome.history_entry.progress.len(), 1);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_field_fails_validation() {
        let (coordinator, transport) = setup(5).await;
        let outcome = coordinator
            .execute_tool(&ToolCall::new("call_1", "fs.web_search", "{}"), "s1")
            .await
            .unwrap();

        assert!(outcome.history_entry.error.unwrap().contains("'query'"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_arguments_treated_as_object() {
        let (coordinator, transport) = setup(5).await;
        let outcome = coordinator
            .execute_tool(&ToolCall::new("call_1", "fs.list_dir", ""), "s1")
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(transport.calls()[0].1, serde_json::json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling_rejects_without_record() {
        let (coordinator, transport) = setup(2).await;
        transport.set_call_delay(Duration::from_millis(100));

        let a = ToolCall::new("a", "fs.list_dir", "{}");
        let b = ToolCall::new("b", "fs.list_dir", "{}");
        let c = ToolCall::new("c", "fs.list_dir", "{}");
        let (ra, rb, rc) = tokio::join!(
            coordinator.execute_tool(&a, "s1"),
            coordinator.execute_tool(&b, "s1"),
            coordinator.execute_tool(&c, "s1"),
        );

        let results = [ra, rb, rc];
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(ExecutionError::ConcurrencyLimit { limit: 2 })))
            .count();
        let succeeded = results
            .iter()
            .filter(|r| r.as_ref().is_ok_and(ExecutionOutcome::is_success))
            .count();
        assert_eq!(rejected, 1);
        assert_eq!(succeeded, 2);
        assert_eq!(coordinator.execution_history(None, None).len(), 2);
        assert_eq!(transport.max_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_tool_call_id_rejected() {
        let (coordinator, transport) = setup(5).await;
        transport.set_call_delay(Duration::from_millis(100));
        let call = ToolCall::new("same", "fs.list_dir", "{}");

        let (first, second) = tokio::join!(
            coordinator.execute_tool(&call, "s1"),
            coordinator.execute_tool(&call, "s1"),
        );
        let duplicates = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Err(ExecutionError::DuplicateToolCall { .. })))
            .count();
        assert_eq!(duplicates, 1);
        assert_eq!(coordinator.execution_history(None, None).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_finalizes_as_timeout() {
        let (coordinator, transport) = setup(5).await;
        transport.set_call_delay(Duration::from_secs(10));
        let call = ToolCall::new("call_1", "fs.list_dir", "{}");

        let outcome = coordinator
            .execute_tool_with_feedback(&call, "s1", &policy(Duration::from_millis(50), None), None)
            .await
            .unwrap();

        assert_eq!(outcome.status(), Some(ExecutionStatus::Timeout));
        assert_eq!(outcome.execution_time_ms, 50);
        assert_eq!(outcome.history_entry.metadata.timeout_ms, 50);
        assert!(outcome.history_entry.error.unwrap().contains("timed out"));
        assert!(outcome.result.is_none());
        assert_eq!(coordinator.active_execution_count(), 0);
        assert_eq!(transport.cancellations_observed(), 1);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_emitted_before_completion() {
        let (coordinator, transport) = setup(5).await;
        transport.set_call_delay(Duration::from_millis(100));
        let recorder = Recorder::default();
        let call = ToolCall::new("call_1", "fs.list_dir", "{}");

        let outcome = coordinator
            .execute_tool_with_feedback(
                &call,
                "s1",
                &policy(Duration::from_secs(1), Some(Duration::from_millis(20))),
                Some(&recorder),
            )
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(
            *recorder.statuses.lock().unwrap(),
            vec![StatusKind::Started, StatusKind::Warning]
        );
    }

    #[tokio::test]
    async fn test_cancel_execution() {
        let (coordinator, transport) = setup(5).await;
        transport.set_call_delay(Duration::from_secs(30));

        let task = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .execute_tool(&ToolCall::new("call_1", "fs.list_dir", "{}"), "s1")
                    .await
            })
        };
        for _ in 0..100 {
            if transport.in_flight() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!coordinator.cancel_execution("unknown"));
        assert!(coordinator.cancel_execution("call_1"));
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.status(), Some(ExecutionStatus::Cancelled));
        assert!(matches!(outcome.error, Some(ExecutionError::Cancelled { .. })));
        assert!(!coordinator.cancel_execution("call_1"));
        assert_eq!(transport.cancellations_observed(), 1);
        assert_eq!(transport.in_flight(), 0);

        transport.set_call_delay(Duration::ZERO);
        let success = coordinator
            .execute_tool(&ToolCall::new("call_2", "fs.list_dir", "{}"), "s1")
            .await
            .unwrap();

        let stats = coordinator.execution_stats(None);
        assert_eq!(stats.overall.cancelled, 1);
        assert_eq!(stats.overall.success, 1);
        assert_eq!(
            stats.overall.average_execution_time_ms,
            success.execution_time_ms as f64
        );
    }

    #[tokio::test]
    async fn test_stats_after_successes_and_failures() {
        let (coordinator, _transport) = setup(5).await;
        for i in 0..3 {
            let call = ToolCall::new(&format!("ok_{i}"), "fs.list_dir", "{}");
            coordinator.execute_tool(&call, "s1").await.unwrap();
        }
        for i in 0..2 {
            let call = ToolCall::new(&format!("bad_{i}"), "fs.list_dir", "not-json");
            coordinator.execute_tool(&call, "s2").await.unwrap();
        }

        let stats = coordinator.execution_stats(None);
        assert_eq!(stats.overall.total, 5);
        assert_eq!(stats.overall.success, 3);
        assert_eq!(stats.overall.error, 2);
        assert_eq!(stats.by_tool["fs.list_dir"].total, 5);

        assert_eq!(coordinator.execution_stats(Some("s2")).overall.total, 2);
        assert_eq!(coordinator.execution_history(Some("s1"), Some(2)).len(), 2);
        assert_eq!(coordinator.clear_history(Some("s2")), 2);
        assert_eq!(coordinator.execution_stats(None).overall.total, 3);
    }

    #[tokio::test]
    async fn test_unknown_server_and_bad_name() {
        let (coordinator, _transport) = setup(5).await;

        let missing = coordinator
            .execute_tool(&ToolCall::new("c1", "web.fetch", "{}"), "s1")
            .await
            .unwrap();
        assert!(matches!(missing.error, Some(ExecutionError::Connection { .. })));
        assert!(missing.history_entry.connection_id.is_empty());

        let unqualified = coordinator
            .execute_tool(&ToolCall::new("c2", "list_dir", "{}"), "s1")
            .await
            .unwrap();
        assert!(matches!(unqualified.error, Some(ExecutionError::Validation { .. })));
        assert_eq!(unqualified.status(), Some(ExecutionStatus::Error));
    }

    #[tokio::test]
    async fn test_connection_error_reports_to_supervisor() {
        let (coordinator, transport) = setup(5).await;
        transport.set_call_result(Err(McpError::TransportError {
            server: "fs".into(),
            reason: "broken pipe".into(),
        }));

        let outcome = coordinator
            .execute_tool(&ToolCall::new("c1", "fs.list_dir", "{}"), "s1")
            .await
            .unwrap();
        assert!(matches!(outcome.error, Some(ExecutionError::Connection { .. })));

        let mut status = ConnectionStatus::Connected;
        for _ in 0..100 {
            status = coordinator.supervisor().connection("fs").await.unwrap().status;
            if status == ConnectionStatus::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(status, ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection() {
        let (coordinator, transport) = setup(5).await;
        transport.set_call_result(Err(McpError::ServerError {
            code: -32000,
            message: "file not found".into(),
            data: None,
        }));

        let outcome = coordinator
            .execute_tool(&ToolCall::new("c1", "fs.list_dir", "{}"), "s1")
            .await
            .unwrap();
        assert!(matches!(outcome.error, Some(ExecutionError::Provider { .. })));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let conn = coordinator.supervisor().connection("fs").await.unwrap();
        assert_eq!(conn.status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_events_published_in_lifecycle_order() {
        let (coordinator, _transport) = setup(5).await;
        let mut rx = coordinator.subscribe();

        coordinator
            .execute_tool(&ToolCall::new("c1", "fs.list_dir", "{}"), "s1")
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(
            events.first().unwrap().kind,
            EventKind::Status { status: StatusKind::Started, .. }
        ));
        let progress = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Progress(_)))
            .count();
        assert_eq!(progress, 5);
        assert!(matches!(
            events.last().unwrap().kind,
            EventKind::Completed { status: ExecutionStatus::Success, .. }
        ));
        assert!(events.iter().all(|e| e.tool_call_id == "c1" && e.session_id == "s1"));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (coordinator, transport) = setup(5).await;
        transport.set_call_delay(Duration::from_secs(30));

        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    coordinator
                        .execute_tool(&ToolCall::new(&format!("c{i}"), "fs.list_dir", "{}"), "s1")
                        .await
                })
            })
            .collect();
        for _ in 0..100 {
            if transport.in_flight() == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(coordinator.cancel_all(), 3);
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            assert_eq!(outcome.status(), Some(ExecutionStatus::Cancelled));
        }
        assert_eq!(coordinator.active_execution_count(), 0);
        assert_eq!(transport.cancellations_observed(), 3);
    }
}
