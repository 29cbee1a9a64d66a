//! Ingestion consumer

use crate::broker::{
    AsyncBridge, BrokerResult, BrokerSession, Connector, Delivery, Disposition, Topology,
};
use crate::consumer::lifecycle::ConsumerFactory;
use crate::consumer::{Consumer, ConsumerControl, ConsumerCore};
use crate::handlers::EventHandler;
use crate::messages::envelope::{decode_with, DecodedEnvelope, IndexTypes};
use std::sync::Arc;

const LOG_PREVIEW_BYTES: usize = 100;

/// What to do with deliveries that are not successfully handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionPolicy {
    /// Well-formed JSON that is not a processable envelope
    pub unsupported: Disposition,
    /// Envelopes the handler failed on
    pub failure: Disposition,
}

impl Default for IngestionPolicy {
    fn default() -> Self {
        Self {
            unsupported: Disposition::Ack,
            failure: Disposition::Reject,
        }
    }
}

pub struct EventConsumer {
    core: ConsumerCore,
    handler: Arc<dyn EventHandler>,
    bridge: AsyncBridge,
    index_types: IndexTypes,
    policy: IngestionPolicy,
}

impl EventConsumer {
    pub fn new(
        connector: Arc<dyn Connector>,
        topology: Topology,
        handler: Arc<dyn EventHandler>,
        bridge: AsyncBridge,
    ) -> Self {
        Self {
            core: ConsumerCore::new("event-consumer", connector, topology),
            handler,
            bridge,
            index_types: IndexTypes::default(),
            policy: IngestionPolicy::default(),
        }
    }

    pub fn with_index_types(mut self, index_types: IndexTypes) -> Self {
        self.index_types = index_types;
        self
    }

    pub fn with_policy(mut self, policy: IngestionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Consumer for EventConsumer {
    fn name(&self) -> &'static str {
        self.core.name
    }

    fn connect(&mut self) -> BrokerResult<()> {
        self.core.connect()
    }

    fn start_consuming(&mut self) -> BrokerResult<()> {
        let handler = &self.handler;
        let bridge = &self.bridge;
        let index_types = &self.index_types;
        let policy = self.policy;
        self.core.run(|session, delivery| {
            process_delivery(handler, bridge, index_types, policy, session, delivery)
        })
    }

    fn control(&self) -> ConsumerControl {
        self.core.control.clone()
    }
}

fn process_delivery(
    handler: &Arc<dyn EventHandler>,
    bridge: &AsyncBridge,
    index_types: &IndexTypes,
    policy: IngestionPolicy,
    session: &mut dyn BrokerSession,
    delivery: Delivery,
) -> BrokerResult<()> {
    let tag = delivery.delivery_tag;
    log::debug!("Received delivery {}: {}", tag, delivery.preview(LOG_PREVIEW_BYTES));

    let disposition = match decode_with(&delivery.body, index_types) {
        Err(e) => {
            log::error!("Delivery {} is not decodable: {}", tag, e);
            Disposition::Reject
        }
        Ok(DecodedEnvelope::Skipped(reason)) => {
            log::warn!("Skipping delivery {}: {}", tag, reason);
            policy.unsupported
        }
        Ok(DecodedEnvelope::Accepted(envelope)) => {
            let handler = Arc::clone(handler);
            match bridge.run(async move { handler.handle(envelope).await }) {
                Ok(Ok(())) => Disposition::Ack,
                Ok(Err(e)) => {
                    log::error!("Handler failed for delivery {}: {}", tag, e);
                    policy.failure
                }
                Err(e) => {
                    log::error!("Handler did not complete for delivery {}: {}", tag, e);
                    policy.failure
                }
            }
        }
    };

    disposition.apply(session, tag)?;
    log::debug!("Delivery {} settled: {}", tag, disposition);
    Ok(())
}

/// Builds [`EventConsumer`]s for the lifecycle manager
pub struct EventConsumerFactory {
    connector: Arc<dyn Connector>,
    topology: Topology,
    index_types: IndexTypes,
    policy: IngestionPolicy,
}

impl EventConsumerFactory {
    pub fn new(connector: Arc<dyn Connector>, topology: Topology) -> Self {
        Self {
            connector,
            topology,
            index_types: IndexTypes::default(),
            policy: IngestionPolicy::default(),
        }
    }

    pub fn with_index_types(mut self, index_types: IndexTypes) -> Self {
        self.index_types = index_types;
        self
    }

    pub fn with_policy(mut self, policy: IngestionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl ConsumerFactory for EventConsumerFactory {
    type Handler = dyn EventHandler;
    type Consumer = EventConsumer;

    fn kind(&self) -> &'static str {
        "ingestion"
    }

    fn build(&self, handler: Arc<dyn EventHandler>, bridge: AsyncBridge) -> EventConsumer {
        EventConsumer::new(Arc::clone(&self.connector), self.topology.clone(), handler, bridge)
            .with_index_types(self.index_types.clone())
            .with_policy(self.policy)
    }
}
