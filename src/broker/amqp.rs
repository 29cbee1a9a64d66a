//! AMQP 0-9-1 session backed by lapin
//!
//! lapin is fully async; the session drives each broker call to completion
//! through the [`AsyncBridge`] so the consumer loop keeps its blocking shape.

use crate::broker::error::redact_url;
use crate::broker::{
    AsyncBridge, BrokerError, BrokerResult, BrokerSession, Connector, Delivery, SessionInterrupt,
    Topology,
};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

const REPLY_CONTENT_TYPE: &str = "application/json";
const CLOSE_REPLY_CODE: u16 = 200;

/// Opens one lapin connection and channel per call
pub struct AmqpConnector {
    url: String,
    heartbeat_secs: u16,
    connection_name: String,
    bridge: AsyncBridge,
}

impl AmqpConnector {
    pub fn new(
        url: impl Into<String>,
        heartbeat_secs: u16,
        connection_name: impl Into<String>,
        bridge: AsyncBridge,
    ) -> Self {
        Self {
            url: url.into(),
            heartbeat_secs,
            connection_name: connection_name.into(),
            bridge,
        }
    }

    fn connection_uri(&self) -> String {
        with_heartbeat(&self.url, self.heartbeat_secs)
    }
}

impl Connector for AmqpConnector {
    fn connect(&self) -> BrokerResult<Box<dyn BrokerSession>> {
        let properties =
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into());
        let connection = self
            .bridge
            .block_on(Connection::connect(&self.connection_uri(), properties))
            .map_err(|e| BrokerError::ConnectionFailed {
                url: redact_url(&self.url),
                message: e.to_string(),
            })?;
        log::info!("Connected to broker at {}", redact_url(&self.url));

        let channel = self
            .bridge
            .block_on(connection.create_channel())
            .map_err(|e| BrokerError::channel("channel.open", e))?;

        Ok(Box::new(AmqpSession {
            bridge: self.bridge.clone(),
            connection,
            channel,
            consumer: None,
            stop: Arc::new(StopSignal::default()),
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        redact_url(&self.url)
    }
}

/// Append the heartbeat query parameter unless the URL already carries one
fn with_heartbeat(url: &str, heartbeat_secs: u16) -> String {
    if heartbeat_secs == 0 || url.contains("heartbeat=") {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}heartbeat={heartbeat_secs}")
}

#[derive(Default)]
struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
    consumer_tag: Mutex<Option<String>>,
}

struct AmqpSession {
    bridge: AsyncBridge,
    connection: Connection,
    channel: Channel,
    consumer: Option<lapin::Consumer>,
    stop: Arc<StopSignal>,
    closed: bool,
}

impl BrokerSession for AmqpSession {
    fn declare(&mut self, topology: &Topology, prefetch: u16) -> BrokerResult<()> {
        let channel = &self.channel;
        self.bridge.block_on(async {
            let durable_queue = QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            };
            match topology {
                Topology::Bound {
                    exchange,
                    queue,
                    routing_key,
                } => {
                    channel
                        .exchange_declare(
                            exchange,
                            ExchangeKind::Topic,
                            ExchangeDeclareOptions {
                                durable: true,
                                ..ExchangeDeclareOptions::default()
                            },
                            FieldTable::default(),
                        )
                        .await
                        .map_err(|e| BrokerError::channel("exchange.declare", e))?;
                    channel
                        .queue_declare(queue, durable_queue, FieldTable::default())
                        .await
                        .map_err(|e| BrokerError::channel("queue.declare", e))?;
                    channel
                        .queue_bind(
                            queue,
                            exchange,
                            routing_key,
                            QueueBindOptions::default(),
                            FieldTable::default(),
                        )
                        .await
                        .map_err(|e| BrokerError::channel("queue.bind", e))?;
                }
                Topology::Direct { queue } => {
                    channel
                        .queue_declare(queue, durable_queue, FieldTable::default())
                        .await
                        .map_err(|e| BrokerError::channel("queue.declare", e))?;
                }
            }
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| BrokerError::channel("basic.qos", e))
        })
    }

    fn consume(&mut self, queue: &str, consumer_tag: &str) -> BrokerResult<()> {
        let consumer = self
            .bridge
            .block_on(self.channel.basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            ))
            .map_err(|e| BrokerError::channel("basic.consume", e))?;
        if let Ok(mut tag) = self.stop.consumer_tag.lock() {
            *tag = Some(consumer_tag.to_string());
        }
        self.consumer = Some(consumer);
        Ok(())
    }

    fn next_delivery(&mut self) -> BrokerResult<Option<Delivery>> {
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| BrokerError::NotConsuming {
                operation: "next_delivery".to_string(),
            })?;
        let stop = &self.stop;
        self.bridge.block_on(async {
            // Registered before the flag check so a concurrent interrupt is never lost
            let interrupted = stop.notify.notified();
            if stop.requested.load(Ordering::Acquire) {
                return Ok(None);
            }
            tokio::select! {
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => Ok(Some(Delivery {
                        body: delivery.data,
                        delivery_tag: delivery.delivery_tag,
                        correlation_id: delivery
                            .properties
                            .correlation_id()
                            .as_ref()
                            .map(|id| id.as_str().to_string()),
                        reply_to: delivery
                            .properties
                            .reply_to()
                            .as_ref()
                            .map(|queue| queue.as_str().to_string()),
                    })),
                    Some(Err(e)) => Err(BrokerError::channel("basic.deliver", e)),
                    None => Ok(None),
                },
                _ = interrupted => Ok(None),
            }
        })
    }

    fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        self.bridge
            .block_on(
                self.channel
                    .basic_ack(delivery_tag, BasicAckOptions::default()),
            )
            .map_err(|e| BrokerError::channel("basic.ack", e))
    }

    fn nack(&mut self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        self.bridge
            .block_on(self.channel.basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                },
            ))
            .map_err(|e| BrokerError::channel("basic.nack", e))
    }

    fn publish_reply(
        &mut self,
        reply_to: &str,
        correlation_id: Option<&str>,
        body: &[u8],
    ) -> BrokerResult<()> {
        let mut properties = BasicProperties::default().with_content_type(REPLY_CONTENT_TYPE.into());
        if let Some(correlation_id) = correlation_id {
            properties = properties.with_correlation_id(correlation_id.into());
        }
        let channel = &self.channel;
        self.bridge.block_on(async {
            channel
                .basic_publish("", reply_to, BasicPublishOptions::default(), body, properties)
                .await
                .map_err(|e| BrokerError::channel("basic.publish", e))?
                .await
                .map_err(|e| BrokerError::channel("basic.publish", e))?;
            Ok(())
        })
    }

    fn interrupt_handle(&self) -> Arc<dyn SessionInterrupt> {
        Arc::new(AmqpInterrupt {
            bridge: self.bridge.clone(),
            channel: self.channel.clone(),
            stop: Arc::clone(&self.stop),
        })
    }

    fn close(&mut self) -> BrokerResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stop.requested.store(true, Ordering::Release);

        let consumer_tag = self.stop.consumer_tag.lock().ok().and_then(|mut tag| tag.take());
        if let Some(tag) = consumer_tag {
            if let Err(e) = self
                .bridge
                .block_on(self.channel.basic_cancel(&tag, BasicCancelOptions::default()))
            {
                log::debug!("basic.cancel for {} during close failed: {}", tag, e);
            }
        }
        self.consumer = None;

        if self.channel.status().connected() {
            self.bridge
                .block_on(self.channel.close(CLOSE_REPLY_CODE, "consumer closed"))
                .map_err(|e| BrokerError::channel("channel.close", e))?;
        }
        if self.connection.status().connected() {
            self.bridge
                .block_on(self.connection.close(CLOSE_REPLY_CODE, "consumer closed"))
                .map_err(|e| BrokerError::channel("connection.close", e))?;
            log::info!("Broker connection closed");
        }
        Ok(())
    }
}

/// Cancels the consumer registration from a thread other than the session owner
struct AmqpInterrupt {
    bridge: AsyncBridge,
    channel: Channel,
    stop: Arc<StopSignal>,
}

impl SessionInterrupt for AmqpInterrupt {
    fn interrupt(&self) -> BrokerResult<()> {
        self.stop.requested.store(true, Ordering::Release);
        self.stop.notify.notify_waiters();

        let consumer_tag = self.stop.consumer_tag.lock().ok().and_then(|mut tag| tag.take());
        match consumer_tag {
            Some(tag) if self.channel.status().connected() => self
                .bridge
                .block_on(self.channel.basic_cancel(&tag, BasicCancelOptions::default()))
                .map_err(|e| BrokerError::channel("basic.cancel", e)),
            _ => Ok(()),
        }
    }
}
