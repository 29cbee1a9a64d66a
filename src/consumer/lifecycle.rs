//! Consumer lifecycle management
//!
//! One [`ConsumerManager`] per consumer kind, owned by the composition root.
//! The manager enforces a single running consumer, runs its blocking receive
//! loop on tokio's blocking pool so runtime workers are never blocked, and
//! bounds how long `stop` waits for that loop to finish.

use crate::broker::{AsyncBridge, BrokerError, BrokerResult};
use crate::consumer::event::EventConsumerFactory;
use crate::consumer::rpc::RpcConsumerFactory;
use crate::consumer::{Consumer, ConsumerControl, ConsumerState};
use crate::core::error_handling::log_error_with_context;
use crate::core::retry::{retry_blocking, RetryPolicy};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds fresh consumers of one kind
pub trait ConsumerFactory: Send + Sync + 'static {
    type Handler: ?Sized + Send + Sync + 'static;
    type Consumer: Consumer + 'static;

    /// Short label used in log lines
    fn kind(&self) -> &'static str;

    fn build(&self, handler: Arc<Self::Handler>, bridge: AsyncBridge) -> Self::Consumer;
}

struct RunningConsumer {
    control: ConsumerControl,
    worker: JoinHandle<BrokerResult<()>>,
}

enum Slot {
    Idle,
    Running(RunningConsumer),
    Stopping,
}

pub struct ConsumerManager<F: ConsumerFactory> {
    factory: F,
    slot: Mutex<Slot>,
    connect_retry: RetryPolicy,
    shutdown_timeout: Duration,
}

pub type EventConsumerManager = ConsumerManager<EventConsumerFactory>;
pub type RpcConsumerManager = ConsumerManager<RpcConsumerFactory>;

/// Log context for a worker that ended with `error`
pub(crate) fn termination_context(kind: &str, error: &BrokerError) -> String {
    if error.is_transport() {
        format!("{kind} consumer lost its broker link")
    } else {
        format!("{kind} consumer terminated")
    }
}

impl<F: ConsumerFactory> ConsumerManager<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            slot: Mutex::new(Slot::Idle),
            connect_retry: RetryPolicy::none(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_connect_retry(mut self, policy: RetryPolicy) -> Self {
        self.connect_retry = policy;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| {
            log::warn!("{} consumer manager lock was poisoned", self.factory.kind());
            poisoned.into_inner()
        })
    }

    /// Start a consumer with `handler` unless one is already running
    ///
    /// Must be called from within a tokio runtime; the consumer's handler
    /// invocations are scheduled onto that runtime.
    pub async fn start(&self, handler: Arc<F::Handler>) {
        let kind = self.factory.kind();
        let mut slot = self.slot();
        if !matches!(*slot, Slot::Idle) {
            log::warn!("{} consumer is already running", kind);
            return;
        }

        log::info!("Starting {} consumer", kind);
        let mut consumer = self.factory.build(handler, AsyncBridge::current());
        let control = consumer.control();
        let retry_control = control.clone();
        let retry = self.connect_retry.clone();

        let worker = tokio::task::spawn_blocking(move || {
            let operation = format!("{kind} consumer connect");
            let result = retry_blocking(&operation, &retry, || !retry_control.stop_requested(), || {
                consumer.connect()
            })
            .and_then(|()| consumer.start_consuming());
            if let Err(e) = &result {
                log_error_with_context(e, &termination_context(kind, e));
            }
            result
        });

        *slot = Slot::Running(RunningConsumer { control, worker });
        log::info!("{} consumer started in background", kind);
    }

    /// Stop the running consumer and wait a bounded time for it to finish
    pub async fn stop(&self) {
        let kind = self.factory.kind();
        let running = {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, Slot::Stopping) {
                Slot::Running(running) => running,
                other => {
                    *slot = other;
                    log::warn!("No {} consumer to stop", kind);
                    return;
                }
            }
        };

        log::info!("Stopping {} consumer", kind);
        let control = running.control.clone();
        match tokio::task::spawn_blocking(move || control.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("{} consumer stop signal failed: {}", kind, e),
            Err(e) => log::warn!("{} consumer stop task failed: {}", kind, e),
        }

        let mut worker = running.worker;
        match tokio::time::timeout(self.shutdown_timeout, &mut worker).await {
            Ok(Ok(Ok(()))) => log::info!("{} consumer stopped", kind),
            Ok(Ok(Err(e))) => log::debug!("{} consumer had already failed: {}", kind, e),
            Ok(Err(e)) => log::warn!("{} consumer worker panicked: {}", kind, e),
            Err(_) => log::warn!(
                "{} consumer did not stop within {:?}, abandoning the wait",
                kind,
                self.shutdown_timeout
            ),
        }

        *self.slot() = Slot::Idle;
    }

    /// True from `start` until the matching `stop` completes
    pub fn is_running(&self) -> bool {
        !matches!(*self.slot(), Slot::Idle)
    }

    /// State of the current consumer, if any
    pub fn state(&self) -> Option<ConsumerState> {
        match &*self.slot() {
            Slot::Running(running) => Some(running.control.state()),
            _ => None,
        }
    }

    /// True when the worker exited on its own, e.g. after a broker failure
    pub fn worker_finished(&self) -> bool {
        match &*self.slot() {
            Slot::Running(running) => running.worker.is_finished(),
            _ => false,
        }
    }
}
