//! Consumer and lifecycle tests against the in-process broker


use crate::broker::memory::{MemoryBroker, SettlementRecord};
use crate::handlers::{EventHandler, HandlerError, RpcHandler};
use crate::messages::Envelope;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

pub(super) const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Event handler that records envelopes and fails or panics on request
#[derive(Default)]
pub(super) struct RecordingHandler {
    pub seen: Mutex<Vec<Envelope>>,
    pub fail_with: Option<String>,
    pub panic: bool,
    pub delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<Envelope> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(envelope);
        if self.panic {
            panic!("handler exploded");
        }
        match &self.fail_with {
            Some(message) => Err(HandlerError::failed(message.clone())),
            None => Ok(()),
        }
    }
}

/// RPC handler answering every request with a fixed outcome
pub(super) struct FixedRpcHandler {
    pub outcome: Result<Value, String>,
    pub calls: Mutex<Vec<Value>>,
}

impl FixedRpcHandler {
    pub fn ok(value: Value) -> Self {
        Self {
            outcome: Ok(value),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn err(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl RpcHandler for FixedRpcHandler {
    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        self.calls.lock().unwrap().push(request);
        self.outcome.clone().map_err(HandlerError::failed)
    }
}

/// Wait off the runtime threads until `count` settlements were recorded
pub(super) async fn wait_for_settlements(broker: &MemoryBroker, count: usize) -> Vec<SettlementRecord> {
    let waiter = broker.clone();
    let settled = tokio::task::spawn_blocking(move || waiter.wait_for_settlements(count, SETTLE_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert!(settled, "timed out waiting for {count} settlements");
    broker.settlements().unwrap()
}
