//! In-memory transports for supervisor and coordinator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::errors::McpError;
use super::transport::{McpTransport, TransportFactory};
use super::types::{McpToolDefinition, ServerConfig};

pub(crate) struct MockTransport {
    tools: Mutex<Vec<McpToolDefinition>>,
    list_error: Mutex<Option<McpError>>,
    call_delay: Mutex<Duration>,
    call_result: Mutex<Result<Value, McpError>>,
    calls: Mutex<Vec<(String, Value)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancellations_observed: AtomicUsize,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn with_tools(names: &[&str]) -> Arc<Self> {
        let transport = Self {
            tools: Mutex::new(Vec::new()),
            list_error: Mutex::new(None),
            call_delay: Mutex::new(Duration::ZERO),
            call_result: Mutex::new(Ok(json!({"content": [{"type": "text", "text": "ok"}]}))),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            cancellations_observed: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        transport.set_tools(names);
        Arc::new(transport)
    }

    pub fn set_tools(&self, names: &[&str]) {
        *self.tools.lock().unwrap() = names
            .iter()
            .map(|name| McpToolDefinition {
                name: name.to_string(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
            })
            .collect();
    }

    pub fn fail_listing(&self, reason: &str) {
        self.fail_listing_with(McpError::TransportError {
            server: "mock".into(),
            reason: reason.to_string(),
        });
    }

    pub fn fail_listing_with(&self, error: McpError) {
        *self.list_error.lock().unwrap() = Some(error);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock().unwrap() = delay;
    }

    pub fn set_call_result(&self, result: Result<Value, McpError>) {
        *self.call_result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Calls that returned because their cancellation token fired.
    pub fn cancellations_observed(&self) -> usize {
        self.cancellations_observed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpTransport for MockTransport {
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        if let Some(error) = self.list_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.tools.lock().unwrap().clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> Result<Value, McpError> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.call_delay.lock().unwrap();
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                self.cancellations_observed.fetch_add(1, Ordering::SeqCst);
                Err(McpError::Cancelled { name: "mock".into() })
            }
            _ = tokio::time::sleep(delay) => self.call_result.lock().unwrap().clone(),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

enum ConnectBehavior {
    Serve(Arc<MockTransport>),
    Fail(String),
    Hang,
}

/// Factory with a scripted outcome per server id.
#[derive(Default)]
pub(crate) struct MockFactory {
    behaviors: Mutex<HashMap<String, ConnectBehavior>>,
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, id: &str, transport: Arc<MockTransport>) {
        self.set(id, ConnectBehavior::Serve(transport));
    }

    pub fn fail(&self, id: &str, reason: &str) {
        self.set(id, ConnectBehavior::Fail(reason.to_string()));
    }

    pub fn hang(&self, id: &str) {
        self.set(id, ConnectBehavior::Hang);
    }

    fn set(&self, id: &str, behavior: ConnectBehavior) {
        self.behaviors.lock().unwrap().insert(id.to_string(), behavior);
    }

    pub fn connect_count(&self, id: &str) -> usize {
        self.connect_times(id).len()
    }

    pub fn connect_times(&self, id: &str) -> Vec<Instant> {
        self.attempts.lock().unwrap().get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError> {
        self.attempts
            .lock()
            .unwrap()
            .entry(config.id.clone())
            .or_default()
            .push(Instant::now());

        let outcome = match self.behaviors.lock().unwrap().get(&config.id) {
            Some(ConnectBehavior::Serve(transport)) => Some(Ok(Arc::clone(transport))),
            Some(ConnectBehavior::Fail(reason)) => Some(Err(reason.clone())),
            Some(ConnectBehavior::Hang) => None,
            None => Some(Err("no such server".to_string())),
        };

        match outcome {
            Some(Ok(transport)) => Ok(transport as Arc<dyn McpTransport>),
            Some(Err(reason)) => Err(McpError::SpawnFailed {
                name: config.id.clone(),
                reason,
            }),
            None => futures::future::pending().await,
        }
    }
}
