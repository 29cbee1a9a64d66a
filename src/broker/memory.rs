//! In-process broker implementing the session seam
//!
//! Models the parts of AMQP the consumers depend on: durable topic exchanges
//! with `*`/`#` bindings, the default exchange addressing queues by name,
//! per-session prefetch windows, manual ack/nack with optional requeue, and
//! requeue of unacknowledged deliveries when a session closes. Every reply a
//! session publishes and every settlement it issues is kept in a ledger so
//! tests can assert on exactly what the broker saw.

use crate::broker::topology::topic_matches;
use crate::broker::{
    BrokerError, BrokerResult, BrokerSession, Connector, Delivery, SessionInterrupt, Topology,
};
use crate::core::sync::handle_mutex_poison;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Message properties carried alongside a body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
}

/// A message published by a session (RPC replies)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Terminal action recorded for a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack { requeue: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    pub delivery_tag: u64,
    pub queue: String,
    pub settlement: Settlement,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    properties: MessageProperties,
}

#[derive(Debug, Clone)]
struct Binding {
    exchange: String,
    queue: String,
    pattern: String,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, VecDeque<StoredMessage>>,
    bindings: Vec<Binding>,
    published: Vec<PublishedMessage>,
    settlements: Vec<SettlementRecord>,
    unavailable: bool,
    next_delivery_tag: u64,
    connections_opened: usize,
    open_sessions: usize,
}

struct Shared {
    state: Mutex<BrokerState>,
    changed: Condvar,
}

/// Cheaply cloneable handle to one in-process broker
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> BrokerResult<MutexGuard<'_, BrokerState>> {
        lock_state(&self.shared)
    }

    /// Connector whose sessions attach to this broker
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// Refuse new connections, as if the broker were down
    pub fn set_unavailable(&self, unavailable: bool) -> BrokerResult<()> {
        self.lock()?.unavailable = unavailable;
        Ok(())
    }

    pub fn declare_queue(&self, queue: &str) -> BrokerResult<()> {
        self.lock()?.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    /// Publish through `exchange`; the empty exchange routes by queue name
    ///
    /// Returns the number of queues the message was routed to.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Vec<u8>>,
        properties: MessageProperties,
    ) -> BrokerResult<usize> {
        let mut state = self.lock()?;
        let routed = route(
            &mut state,
            exchange,
            routing_key,
            StoredMessage {
                body: body.into(),
                properties,
            },
        );
        drop(state);
        self.shared.changed.notify_all();
        Ok(routed)
    }

    /// Publish an RPC request directly to `queue`
    pub fn publish_request(
        &self,
        queue: &str,
        body: impl Into<Vec<u8>>,
        reply_to: Option<&str>,
        correlation_id: Option<&str>,
    ) -> BrokerResult<usize> {
        self.publish(
            "",
            queue,
            body,
            MessageProperties {
                correlation_id: correlation_id.map(str::to_string),
                reply_to: reply_to.map(str::to_string),
                content_type: Some("application/json".to_string()),
            },
        )
    }

    /// Messages sessions published to `routing_key` through the default exchange
    pub fn replies_to(&self, routing_key: &str) -> BrokerResult<Vec<PublishedMessage>> {
        Ok(self
            .lock()?
            .published
            .iter()
            .filter(|m| m.exchange.is_empty() && m.routing_key == routing_key)
            .cloned()
            .collect())
    }

    pub fn published(&self) -> BrokerResult<Vec<PublishedMessage>> {
        Ok(self.lock()?.published.clone())
    }

    pub fn settlements(&self) -> BrokerResult<Vec<SettlementRecord>> {
        Ok(self.lock()?.settlements.clone())
    }

    pub fn queue_depth(&self, queue: &str) -> BrokerResult<usize> {
        Ok(self.lock()?.queues.get(queue).map_or(0, VecDeque::len))
    }

    pub fn has_exchange(&self, exchange: &str) -> BrokerResult<bool> {
        Ok(self.lock()?.exchanges.contains(exchange))
    }

    pub fn has_binding(&self, exchange: &str, queue: &str, pattern: &str) -> BrokerResult<bool> {
        Ok(self
            .lock()?
            .bindings
            .iter()
            .any(|b| b.exchange == exchange && b.queue == queue && b.pattern == pattern))
    }

    pub fn connections_opened(&self) -> BrokerResult<usize> {
        Ok(self.lock()?.connections_opened)
    }

    pub fn open_sessions(&self) -> BrokerResult<usize> {
        Ok(self.lock()?.open_sessions)
    }

    /// Block until at least `count` settlements were recorded or `timeout` elapses
    pub fn wait_for_settlements(&self, count: usize, timeout: Duration) -> BrokerResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;
        while state.settlements.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = wait_state(&self.shared, state, deadline - now)?;
        }
        Ok(true)
    }
}

fn lock_state(shared: &Shared) -> BrokerResult<MutexGuard<'_, BrokerState>> {
    handle_mutex_poison(shared.state.lock(), |message| {
        BrokerError::Synchronisation { message }
    })
}

fn wait_state<'a>(
    shared: &'a Shared,
    guard: MutexGuard<'a, BrokerState>,
    timeout: Duration,
) -> BrokerResult<MutexGuard<'a, BrokerState>> {
    handle_mutex_poison(
        shared
            .changed
            .wait_timeout(guard, timeout)
            .map(|(guard, _)| guard)
            .map_err(|poisoned| std::sync::PoisonError::new(poisoned.into_inner().0)),
        |message| BrokerError::Synchronisation { message },
    )
}

fn route(state: &mut BrokerState, exchange: &str, routing_key: &str, message: StoredMessage) -> usize {
    let targets: Vec<String> = if exchange.is_empty() {
        vec![routing_key.to_string()]
    } else {
        state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect()
    };

    let mut routed = 0;
    for target in targets {
        if let Some(queue) = state.queues.get_mut(&target) {
            queue.push_back(message.clone());
            routed += 1;
        }
    }
    routed
}

/// Connector for [`MemoryBroker`] sessions
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BrokerResult<Box<dyn BrokerSession>> {
        let mut state = self.broker.lock()?;
        if state.unavailable {
            return Err(BrokerError::ConnectionFailed {
                url: self.describe(),
                message: "connection refused".to_string(),
            });
        }
        state.connections_opened += 1;
        state.open_sessions += 1;
        Ok(Box::new(MemorySession {
            broker: self.broker.clone(),
            prefetch: 0,
            queue: None,
            unacked: HashMap::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

struct MemorySession {
    broker: MemoryBroker,
    prefetch: u16,
    queue: Option<String>,
    unacked: HashMap<u64, (String, StoredMessage)>,
    interrupted: Arc<AtomicBool>,
    closed: bool,
}

impl MemorySession {
    fn ensure_open(&self, operation: &str) -> BrokerResult<()> {
        if self.closed {
            return Err(BrokerError::channel(operation, "channel is closed"));
        }
        Ok(())
    }

    fn settle(&mut self, delivery_tag: u64, settlement: Settlement) -> BrokerResult<()> {
        let operation = match settlement {
            Settlement::Ack => "basic.ack",
            Settlement::Nack { .. } => "basic.nack",
        };
        self.ensure_open(operation)?;
        let (queue, message) = self.unacked.remove(&delivery_tag).ok_or_else(|| {
            BrokerError::channel(
                operation,
                format!("PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"),
            )
        })?;

        let mut state = self.broker.lock()?;
        if settlement == (Settlement::Nack { requeue: true }) {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.push_front(message);
            }
        }
        state.settlements.push(SettlementRecord {
            delivery_tag,
            queue,
            settlement,
        });
        drop(state);
        self.broker.shared.changed.notify_all();
        Ok(())
    }
}

impl BrokerSession for MemorySession {
    fn declare(&mut self, topology: &Topology, prefetch: u16) -> BrokerResult<()> {
        self.ensure_open("queue.declare")?;
        let mut state = self.broker.lock()?;
        match topology {
            Topology::Bound {
                exchange,
                queue,
                routing_key,
            } => {
                state.exchanges.insert(exchange.clone());
                state.queues.entry(queue.clone()).or_default();
                let already_bound = state.bindings.iter().any(|b| {
                    b.exchange == *exchange && b.queue == *queue && b.pattern == *routing_key
                });
                if !already_bound {
                    state.bindings.push(Binding {
                        exchange: exchange.clone(),
                        queue: queue.clone(),
                        pattern: routing_key.clone(),
                    });
                }
            }
            Topology::Direct { queue } => {
                state.queues.entry(queue.clone()).or_default();
            }
        }
        self.prefetch = prefetch;
        Ok(())
    }

    fn consume(&mut self, queue: &str, _consumer_tag: &str) -> BrokerResult<()> {
        self.ensure_open("basic.consume")?;
        if !self.broker.lock()?.queues.contains_key(queue) {
            return Err(BrokerError::channel(
                "basic.consume",
                format!("NOT_FOUND - no queue '{queue}'"),
            ));
        }
        self.queue = Some(queue.to_string());
        Ok(())
    }

    fn next_delivery(&mut self) -> BrokerResult<Option<Delivery>> {
        let queue = self.queue.clone().ok_or_else(|| BrokerError::NotConsuming {
            operation: "next_delivery".to_string(),
        })?;
        let broker = self.broker.clone();
        let mut state = broker.lock()?;
        loop {
            if self.closed || self.interrupted.load(Ordering::Acquire) {
                return Ok(None);
            }
            let window_open = self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch);
            if window_open {
                if let Some(message) = state.queues.get_mut(&queue).and_then(VecDeque::pop_front) {
                    state.next_delivery_tag += 1;
                    let delivery_tag = state.next_delivery_tag;
                    let delivery = Delivery {
                        body: message.body.clone(),
                        delivery_tag,
                        correlation_id: message.properties.correlation_id.clone(),
                        reply_to: message.properties.reply_to.clone(),
                    };
                    self.unacked.insert(delivery_tag, (queue, message));
                    return Ok(Some(delivery));
                }
            }
            state = wait_state(&broker.shared, state, WAIT_SLICE)?;
        }
    }

    fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        self.settle(delivery_tag, Settlement::Ack)
    }

    fn nack(&mut self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        self.settle(delivery_tag, Settlement::Nack { requeue })
    }

    fn publish_reply(
        &mut self,
        reply_to: &str,
        correlation_id: Option<&str>,
        body: &[u8],
    ) -> BrokerResult<()> {
        self.ensure_open("basic.publish")?;
        let properties = MessageProperties {
            correlation_id: correlation_id.map(str::to_string),
            reply_to: None,
            content_type: Some("application/json".to_string()),
        };
        let mut state = self.broker.lock()?;
        state.published.push(PublishedMessage {
            exchange: String::new(),
            routing_key: reply_to.to_string(),
            body: body.to_vec(),
            properties: properties.clone(),
        });
        route(
            &mut state,
            "",
            reply_to,
            StoredMessage {
                body: body.to_vec(),
                properties,
            },
        );
        drop(state);
        self.broker.shared.changed.notify_all();
        Ok(())
    }

    fn interrupt_handle(&self) -> Arc<dyn SessionInterrupt> {
        Arc::new(MemoryInterrupt {
            broker: self.broker.clone(),
            interrupted: Arc::clone(&self.interrupted),
        })
    }

    fn close(&mut self) -> BrokerResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.interrupted.store(true, Ordering::Release);

        let mut state = self.broker.lock()?;
        // Unacknowledged deliveries go back to the head of their queue in order
        let mut pending: Vec<(u64, (String, StoredMessage))> = self.unacked.drain().collect();
        pending.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, (queue, message)) in pending {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.push_front(message);
            }
        }
        state.open_sessions = state.open_sessions.saturating_sub(1);
        drop(state);
        self.broker.shared.changed.notify_all();
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct MemoryInterrupt {
    broker: MemoryBroker,
    interrupted: Arc<AtomicBool>,
}

impl SessionInterrupt for MemoryInterrupt {
    fn interrupt(&self) -> BrokerResult<()> {
        self.interrupted.store(true, Ordering::Release);
        self.broker.shared.changed.notify_all();
        Ok(())
    }
}
