//! Blocking-thread to async-runtime handoff
//!
//! Consumer loops run on dedicated blocking workers while handlers are async
//! and perform I/O on the tokio runtime. The bridge schedules a future onto
//! the runtime from the worker thread and parks the worker until it resolves,
//! so the acknowledgement decision is still made on the worker that owns the
//! delivery.

use crate::broker::{BrokerError, BrokerResult};
use std::future::Future;
use tokio::runtime::Handle;

#[derive(Debug, Clone)]
pub struct AsyncBridge {
    handle: Handle,
}

impl AsyncBridge {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bridge onto the runtime the caller is currently running on
    ///
    /// # Panics
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Spawn `future` on the runtime and block this thread until it completes
    ///
    /// Must not be called from an async context (runtime worker threads);
    /// blocking-pool threads and plain threads are fine. A panic inside the
    /// future is reported as [`BrokerError::HandoffFailed`].
    pub fn run<F>(&self, future: F) -> BrokerResult<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let task = self.handle.spawn(future);
        self.handle
            .block_on(task)
            .map_err(|join_error| BrokerError::HandoffFailed {
                message: if join_error.is_panic() {
                    "handler panicked".to_string()
                } else {
                    join_error.to_string()
                },
            })
    }

    /// Drive a broker client future to completion on the calling thread
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}
