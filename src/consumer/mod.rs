//! Broker Consumers
//!
//! Two consumer kinds share one lifecycle:
//!
//! - [`EventConsumer`]: ingestion queue bound to a topic exchange; decodes
//!   envelopes and hands them to an [`EventHandler`](crate::handlers::EventHandler)
//! - [`RpcConsumer`]: directly addressed request queue; invokes an
//!   [`RpcHandler`](crate::handlers::RpcHandler) and publishes a correlated reply
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──declare ok──► ChannelReady
//!                                  │                          │
//!                                  ▼                  start_consuming()
//!                               Failed ◄── transport ──       ▼
//!                                          error        Consuming ──stop()──► Draining ──► Closed
//! ```
//!
//! A consumer owns its broker session exclusively and is driven from one
//! blocking worker thread. The only thing shared with other threads is its
//! [`ConsumerControl`], which reports state and requests a stop.
//! [`ConsumerManager`] runs consumers on tokio's blocking pool and bounds how
//! long shutdown may wait for them.

mod event;
mod lifecycle;
mod rpc;

#[cfg(test)]
mod tests;

pub use event::{EventConsumer, EventConsumerFactory, IngestionPolicy};
pub use lifecycle::{
    ConsumerFactory, ConsumerManager, EventConsumerManager, RpcConsumerManager,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use rpc::{RpcConsumer, RpcConsumerFactory};

use crate::broker::{
    BrokerError, BrokerResult, BrokerSession, Connector, Delivery, SessionInterrupt, Topology,
    PREFETCH_COUNT,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    ChannelReady,
    Consuming,
    Draining,
    Closed,
    Failed,
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connecting => "connecting",
            ConsumerState::ChannelReady => "channel ready",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Draining => "draining",
            ConsumerState::Closed => "closed",
            ConsumerState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Operations the lifecycle manager needs from a consumer
pub trait Consumer: Send {
    fn name(&self) -> &'static str;

    /// Open the session and declare the topology
    ///
    /// Failures are returned as-is; retrying is the caller's business.
    fn connect(&mut self) -> BrokerResult<()>;

    /// Consume until stopped or the broker link fails
    ///
    /// Connects first when not yet connected. Blocks the calling thread.
    fn start_consuming(&mut self) -> BrokerResult<()>;

    fn control(&self) -> ConsumerControl;

    fn state(&self) -> ConsumerState {
        self.control().state()
    }

    /// Request a stop; safe to call from any thread and more than once
    fn stop(&self) -> BrokerResult<()> {
        self.control().stop()
    }
}

struct ControlInner {
    state: Mutex<ConsumerState>,
    stop_requested: AtomicBool,
    interrupt: Mutex<Option<Arc<dyn SessionInterrupt>>>,
}

/// Cross-thread view of one consumer: its state and its stop switch
#[derive(Clone)]
pub struct ConsumerControl {
    inner: Arc<ControlInner>,
}

impl Default for ConsumerControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                state: Mutex::new(ConsumerState::Disconnected),
                stop_requested: AtomicBool::new(false),
                interrupt: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.inner
            .state
            .lock()
            .map(|state| *state)
            .unwrap_or(ConsumerState::Failed)
    }

    pub(crate) fn set_state(&self, state: ConsumerState) {
        match self.inner.state.lock() {
            Ok(mut current) => *current = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    /// Stop accepting deliveries and wake the consumer if it is waiting
    ///
    /// The in-flight delivery, if any, is finished and settled first. The
    /// consumer thread then closes its session.
    pub fn stop(&self) -> BrokerResult<()> {
        if self.inner.stop_requested.swap(true, Ordering::SeqCst) {
            log::debug!("Stop already requested");
            return Ok(());
        }
        let interrupt = crate::core::sync::handle_mutex_poison(self.inner.interrupt.lock(), |message| {
            BrokerError::Synchronisation { message }
        })?
        .clone();
        match interrupt {
            Some(interrupt) => interrupt.interrupt(),
            None => Ok(()),
        }
    }

    /// Publish the session's interrupt handle; returns whether a stop is already pending
    fn install(&self, interrupt: Arc<dyn SessionInterrupt>) -> BrokerResult<bool> {
        *crate::core::sync::handle_mutex_poison(self.inner.interrupt.lock(), |message| {
            BrokerError::Synchronisation { message }
        })? = Some(interrupt);
        Ok(self.stop_requested())
    }
}

/// Connection handling and the receive loop shared by both consumer kinds
struct ConsumerCore {
    name: &'static str,
    connector: Arc<dyn Connector>,
    topology: Topology,
    consumer_tag: String,
    session: Option<Box<dyn BrokerSession>>,
    control: ConsumerControl,
}

impl ConsumerCore {
    fn new(name: &'static str, connector: Arc<dyn Connector>, topology: Topology) -> Self {
        Self {
            name,
            connector,
            topology,
            consumer_tag: format!("{}-{}", name, std::process::id()),
            session: None,
            control: ConsumerControl::new(),
        }
    }

    fn connect(&mut self) -> BrokerResult<()> {
        let state = self.control.state();
        if !matches!(state, ConsumerState::Disconnected | ConsumerState::Failed) {
            return Err(BrokerError::InvalidState {
                state: state.to_string(),
                operation: "connect".to_string(),
            });
        }

        self.control.set_state(ConsumerState::Connecting);
        log::debug!("{} connecting to {}", self.name, self.connector.describe());
        let mut session = match self.connector.connect() {
            Ok(session) => session,
            Err(e) => {
                self.control.set_state(ConsumerState::Failed);
                return Err(e);
            }
        };

        if let Err(e) = session.declare(&self.topology, PREFETCH_COUNT) {
            if let Err(close_err) = session.close() {
                log::debug!("{} close after failed declare: {}", self.name, close_err);
            }
            self.control.set_state(ConsumerState::Failed);
            return Err(e);
        }

        self.session = Some(session);
        self.control.set_state(ConsumerState::ChannelReady);
        log::info!("{} channel ready on {}", self.name, self.topology);
        Ok(())
    }

    /// Receive loop; `process` must settle every delivery it is given
    fn run<F>(&mut self, mut process: F) -> BrokerResult<()>
    where
        F: FnMut(&mut dyn BrokerSession, Delivery) -> BrokerResult<()>,
    {
        if self.session.is_none() {
            self.connect()?;
        }
        let state = self.control.state();
        if state != ConsumerState::ChannelReady {
            return Err(BrokerError::InvalidState {
                state: state.to_string(),
                operation: "start consuming".to_string(),
            });
        }

        match self.consume_until_stopped(&mut process) {
            Ok(()) => self.drain(),
            Err(e) => {
                self.control.set_state(ConsumerState::Failed);
                if let Some(mut session) = self.session.take() {
                    if let Err(close_err) = session.close() {
                        log::debug!("{} close after failure: {}", self.name, close_err);
                    }
                }
                Err(e)
            }
        }
    }

    fn consume_until_stopped<F>(&mut self, process: &mut F) -> BrokerResult<()>
    where
        F: FnMut(&mut dyn BrokerSession, Delivery) -> BrokerResult<()>,
    {
        let session = self.session.as_mut().ok_or_else(|| BrokerError::NotConsuming {
            operation: "start consuming".to_string(),
        })?;

        if self.control.install(session.interrupt_handle())? {
            log::info!("{} stop requested before consuming started", self.name);
            return Ok(());
        }

        session.consume(self.topology.queue(), &self.consumer_tag)?;
        self.control.set_state(ConsumerState::Consuming);
        log::info!(
            "{} consuming from '{}' (consumer tag: {})",
            self.name,
            self.topology.queue(),
            self.consumer_tag
        );

        while let Some(delivery) = session.next_delivery()? {
            process(&mut **session, delivery)?;
        }
        Ok(())
    }

    fn drain(&mut self) -> BrokerResult<()> {
        self.control.set_state(ConsumerState::Draining);
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close() {
                log::warn!("{} did not close cleanly: {}", self.name, e);
            }
        }
        self.control.set_state(ConsumerState::Closed);
        log::info!("{} stopped", self.name);
        Ok(())
    }
}

impl Drop for ConsumerCore {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.close();
        }
    }
}
