//! Broker Access
//!
//! Everything a consumer needs from the message broker: the exclusively owned
//! [`BrokerSession`] seam with its lapin ([`AmqpConnector`]) and in-process
//! (`memory::MemoryBroker`, `test-support` feature) implementations, queue [`Topology`], inbound
//! [`Delivery`] values and the [`AsyncBridge`] used to hand work from a
//! consumer's blocking worker thread to the tokio runtime.

mod amqp;
mod bridge;
mod delivery;
mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
mod session;
mod topology;

pub use amqp::AmqpConnector;
pub use bridge::AsyncBridge;
pub use delivery::{Delivery, Disposition};
pub use error::{redact_url, BrokerError, BrokerResult};
pub use session::{BrokerSession, Connector, SessionInterrupt};
pub use topology::{topic_matches, Topology, PREFETCH_COUNT};
