//! Bounded execution history and aggregate statistics.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use super::types::{ExecutionRecord, ExecutionStatus};

/// Default number of records retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Counts and mean duration for a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: usize,
    pub success: usize,
    pub error: usize,
    pub timeout: usize,
    pub cancelled: usize,
    /// Mean over non-cancelled records; 0 when there are none.
    pub average_execution_time_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    #[serde(flatten)]
    pub overall: StatusCounts,
    pub by_tool: BTreeMap<String, StatusCounts>,
}

#[derive(Default)]
struct Accumulator {
    counts: StatusCounts,
    timed_ms: u64,
    timed: usize,
}

impl Accumulator {
    fn add(&mut self, record: &ExecutionRecord) {
        self.counts.total += 1;
        match record.status {
            Some(ExecutionStatus::Success) => self.counts.success += 1,
            Some(ExecutionStatus::Error) => self.counts.error += 1,
            Some(ExecutionStatus::Timeout) => self.counts.timeout += 1,
            Some(ExecutionStatus::Cancelled) => self.counts.cancelled += 1,
            None => {}
        }
        if record.status.is_some_and(|s| s != ExecutionStatus::Cancelled) {
            self.timed_ms += record.execution_time_ms;
            self.timed += 1;
        }
    }

    fn finish(mut self) -> StatusCounts {
        if self.timed > 0 {
            self.counts.average_execution_time_ms = self.timed_ms as f64 / self.timed as f64;
        }
        self.counts
    }
}

/// Finalized records ordered by start time, oldest first.
#[derive(Debug)]
pub struct ExecutionHistory {
    entries: VecDeque<ExecutionRecord>,
    capacity: usize,
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert by start time and evict the oldest beyond capacity.
    pub fn push(&mut self, record: ExecutionRecord) {
        let position = self
            .entries
            .iter()
            .rposition(|existing| existing.start_time <= record.start_time)
            .map_or(0, |i| i + 1);
        self.entries.insert(position, record);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first, optionally filtered by session and truncated to `limit`.
    pub fn query(&self, session_id: Option<&str>, limit: Option<usize>) -> Vec<ExecutionRecord> {
        self.entries
            .iter()
            .rev()
            .filter(|r| session_id.map_or(true, |s| r.session_id == s))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Remove all records, or only one session's. Returns the number removed.
    pub fn clear(&mut self, session_id: Option<&str>) -> usize {
        let before = self.entries.len();
        match session_id {
            Some(session) => self.entries.retain(|r| r.session_id != session),
            None => self.entries.clear(),
        }
        before - self.entries.len()
    }

    pub fn stats(&self, session_id: Option<&str>) -> ExecutionStats {
        let mut overall = Accumulator::default();
        let mut by_tool: BTreeMap<String, Accumulator> = BTreeMap::new();

        for record in self
            .entries
            .iter()
            .filter(|r| session_id.map_or(true, |s| r.session_id == s))
        {
            overall.add(record);
            by_tool.entry(record.tool_name.clone()).or_default().add(record);
        }

        ExecutionStats {
            overall: overall.finish(),
            by_tool: by_tool
                .into_iter()
                .map(|(tool, acc)| (tool, acc.finish()))
                .collect(),
        }
    }
}
