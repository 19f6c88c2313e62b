//! Execution — bounded, observable tool-call execution.
//!
//! The [`ExecutionCoordinator`] admits calls under a global concurrency
//! ceiling, runs them through validate → resolve → invoke → process →
//! complete with a timeout and a cancellation token, and keeps an audit
//! history with aggregate statistics.

pub mod coordinator;
pub mod errors;
pub mod events;
pub mod history;
pub mod types;
pub mod validation;

pub use coordinator::ExecutionCoordinator;
pub use errors::ExecutionError;
pub use events::{EventBus, EventKind, ExecutionEvent, ExecutionObserver, StatusKind};
pub use history::{ExecutionHistory, ExecutionStats, StatusCounts};
pub use types::{
    CoordinatorConfig, ExecutionOutcome, ExecutionRecord, ExecutionStage, ExecutionStatus,
    ProgressEvent, TimeoutPolicy, ToolCall,
};
