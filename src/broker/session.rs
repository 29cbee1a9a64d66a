//! Delivery controller seam between consumers and a concrete broker client
//!
//! A [`BrokerSession`] is one connection plus one channel, owned by exactly one
//! consumer and driven from that consumer's worker thread. Every method blocks
//! the calling thread until the broker has answered, which is what lets the
//! consumer loop issue the ack/nack for a delivery on the thread that received
//! it.
//!
//! The only cross-thread entry point is the [`SessionInterrupt`] handed out by
//! [`BrokerSession::interrupt_handle`], which wakes a blocked
//! [`BrokerSession::next_delivery`] so the owning thread can drain and close.

use crate::broker::{BrokerResult, Delivery, Topology};
use std::sync::Arc;

/// Per-consumer broker primitives
pub trait BrokerSession: Send {
    /// Declare exchange/queue/binding for `topology` and set the QoS prefetch window
    fn declare(&mut self, topology: &Topology, prefetch: u16) -> BrokerResult<()>;

    /// Register a consumer on `queue` with manual acknowledgement
    fn consume(&mut self, queue: &str, consumer_tag: &str) -> BrokerResult<()>;

    /// Block until the next delivery arrives
    ///
    /// Returns `Ok(None)` once the consumer registration was cancelled or the
    /// session was interrupted.
    fn next_delivery(&mut self) -> BrokerResult<Option<Delivery>>;

    fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()>;

    fn nack(&mut self, delivery_tag: u64, requeue: bool) -> BrokerResult<()>;

    /// Publish `body` through the default exchange to the `reply_to` queue
    fn publish_reply(
        &mut self,
        reply_to: &str,
        correlation_id: Option<&str>,
        body: &[u8],
    ) -> BrokerResult<()>;

    /// Handle that can wake `next_delivery` from another thread
    fn interrupt_handle(&self) -> Arc<dyn SessionInterrupt>;

    /// Cancel the consumer registration, close the channel and the connection
    ///
    /// Calling it on an already closed session is a no-op.
    fn close(&mut self) -> BrokerResult<()>;
}

/// Cross-thread stop signal for a session blocked in `next_delivery`
pub trait SessionInterrupt: Send + Sync {
    fn interrupt(&self) -> BrokerResult<()>;
}

/// Opens a fresh, exclusively owned session
pub trait Connector: Send + Sync {
    fn connect(&self) -> BrokerResult<Box<dyn BrokerSession>>;

    /// Human-readable target for log lines, without credentials
    fn describe(&self) -> String;
}
