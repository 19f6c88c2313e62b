//! Execution data model: tool calls, staged progress, and audit records.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ExecutionError;

// ─── Requests ───────────────────────────────────────────────────────────────

/// A tool call as produced by the caller (typically an LLM response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Namespaced tool name, `"server.tool"`.
    pub name: String,
    /// Raw JSON argument payload. Empty means `{}`.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}

/// Per-call timeout settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    pub default_timeout: Duration,
    /// Hard cap applied after per-tool overrides.
    pub max_timeout: Duration,
    /// Overrides keyed by namespaced tool name.
    pub per_tool: HashMap<String, Duration>,
    /// Emit a warning status when a call is still running after this long.
    pub warning_threshold: Option<Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(300),
            per_tool: HashMap::new(),
            warning_threshold: Some(Duration::from_secs(10)),
        }
    }
}

impl TimeoutPolicy {
    /// Effective timeout for `tool_name`.
    pub fn timeout_for(&self, tool_name: &str) -> Duration {
        self.per_tool
            .get(tool_name)
            .copied()
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// Warning delay, if it would fire before the deadline.
    pub fn warning_for(&self, timeout: Duration) -> Option<Duration> {
        self.warning_threshold
            .filter(|threshold| !threshold.is_zero() && *threshold < timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub max_concurrent_executions: usize,
    pub history_capacity: usize,
    /// Buffer size of the broadcast event channel.
    pub event_capacity: usize,
    pub timeouts: TimeoutPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
            history_capacity: super::history::DEFAULT_HISTORY_CAPACITY,
            event_capacity: 256,
            timeouts: TimeoutPolicy::default(),
        }
    }
}

// ─── Progress ───────────────────────────────────────────────────────────────

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStage {
    Validate,
    Resolve,
    Invoke,
    Process,
    Complete,
}

impl ExecutionStage {
    pub fn percent(self) -> u8 {
        match self {
            Self::Validate => 10,
            Self::Resolve => 25,
            Self::Invoke => 50,
            Self::Process => 85,
            Self::Complete => 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ExecutionStage,
    pub message: String,
    pub percent: u8,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(stage: ExecutionStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            percent: stage.percent(),
            timestamp: Utc::now(),
        }
    }
}

// ─── Records ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub retry_count: u32,
    pub timeout_ms: u64,
}

/// Audit entry for one invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub tool_call_id: String,
    pub session_id: String,
    pub tool_name: String,
    /// Empty until the tool is resolved to a server.
    pub connection_id: String,
    /// `None` while in flight.
    pub status: Option<ExecutionStatus>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
    pub parameters: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub progress: Vec<ProgressEvent>,
    pub metadata: ExecutionMetadata,
}

impl ExecutionRecord {
    pub fn pending(tool_call: &ToolCall, session_id: &str, timeout: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_call_id: tool_call.id.clone(),
            session_id: session_id.to_string(),
            tool_name: tool_call.name.clone(),
            connection_id: String::new(),
            status: None,
            start_time: Utc::now(),
            end_time: None,
            execution_time_ms: 0,
            parameters: None,
            result: None,
            error: None,
            progress: Vec::new(),
            metadata: ExecutionMetadata {
                retry_count: 0,
                timeout_ms: timeout.as_millis() as u64,
            },
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_some()
    }

    /// Settle the record. Later calls are ignored.
    pub fn finalize(
        &mut self,
        status: ExecutionStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
        execution_time_ms: u64,
    ) {
        if self.is_finalized() {
            return;
        }
        self.status = Some(status);
        self.end_time = Some(Utc::now());
        self.execution_time_ms = execution_time_ms;
        self.result = result;
        self.error = error;
    }
}

/// What `execute_tool*` hands back for every call that got a record.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub result: Option<serde_json::Value>,
    pub execution_time_ms: u64,
    pub history_entry: ExecutionRecord,
    pub error: Option<ExecutionError>,
}

impl ExecutionOutcome {
    pub fn status(&self) -> Option<ExecutionStatus> {
        self.history_entry.status
    }

    pub fn is_success(&self) -> bool {
        self.status() == Some(ExecutionStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_for_prefers_override_and_caps() {
        let mut policy = TimeoutPolicy {
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(60),
            per_tool: HashMap::new(),
            warning_threshold: None,
        };
        policy.per_tool.insert("search.web".into(), Duration::from_secs(45));
        policy.per_tool.insert("build.all".into(), Duration::from_secs(600));

        assert_eq!(policy.timeout_for("fs.read_file"), Duration::from_secs(30));
        assert_eq!(policy.timeout_for("search.web"), Duration::from_secs(45));
        assert_eq!(policy.timeout_for("build.all"), Duration::from_secs(60));
    }

    #[test]
    fn test_warning_only_before_deadline() {
        let policy = TimeoutPolicy {
            warning_threshold: Some(Duration::from_secs(10)),
            ..TimeoutPolicy::default()
        };
        assert_eq!(policy.warning_for(Duration::from_secs(30)), Some(Duration::from_secs(10)));
        assert_eq!(policy.warning_for(Duration::from_secs(5)), None);
    }

    #[test]
    fn test_finalize_is_one_shot() {
        let call = ToolCall::new("call_1", "fs.read_file", "{}");
        let mut record = ExecutionRecord::pending(&call, "s1", Duration::from_secs(5));
        assert!(!record.is_finalized());
        assert_eq!(record.metadata.timeout_ms, 5000);

        record.finalize(ExecutionStatus::Timeout, None, Some("late".into()), 5000);
        record.finalize(ExecutionStatus::Success, Some(serde_json::json!(1)), None, 10);

        assert_eq!(record.status, Some(ExecutionStatus::Timeout));
        assert_eq!(record.execution_time_ms, 5000);
        assert!(record.result.is_none());
        assert!(record.end_time.is_some());
    }

    #[test]
    fn test_stage_percent_increases() {
        let stages = [
            ExecutionStage::Validate,
            ExecutionStage::Resolve,
            ExecutionStage::Invoke,
            ExecutionStage::Process,
            ExecutionStage::Complete,
        ];
        assert!(stages.windows(2).all(|w| w[0].percent() < w[1].percent()));
    }
}
