//! Request/reply consumer

use crate::broker::{
    AsyncBridge, BrokerResult, BrokerSession, Connector, Delivery, Disposition, Topology,
};
use crate::consumer::lifecycle::ConsumerFactory;
use crate::consumer::{Consumer, ConsumerControl, ConsumerCore};
use crate::handlers::RpcHandler;
use crate::messages::dashboard::{encode_value, error_body};
use crate::messages::envelope::parse_json;
use std::sync::Arc;

const INVALID_JSON: &str = "Invalid JSON format";
const LOG_PREVIEW_BYTES: usize = 200;

pub struct RpcConsumer {
    core: ConsumerCore,
    handler: Arc<dyn RpcHandler>,
    bridge: AsyncBridge,
}

impl RpcConsumer {
    pub fn new(
        connector: Arc<dyn Connector>,
        queue: impl Into<String>,
        handler: Arc<dyn RpcHandler>,
        bridge: AsyncBridge,
    ) -> Self {
        Self {
            core: ConsumerCore::new("rpc-consumer", connector, Topology::direct(queue)),
            handler,
            bridge,
        }
    }
}

impl Consumer for RpcConsumer {
    fn name(&self) -> &'static str {
        self.core.name
    }

    fn connect(&mut self) -> BrokerResult<()> {
        self.core.connect()
    }

    fn start_consuming(&mut self) -> BrokerResult<()> {
        let handler = &self.handler;
        let bridge = &self.bridge;
        self.core
            .run(|session, delivery| process_request(handler, bridge, session, delivery))
    }

    fn control(&self) -> ConsumerControl {
        self.core.control.clone()
    }
}

/// Reply body and terminal action for one request
fn respond(
    handler: &Arc<dyn RpcHandler>,
    bridge: &AsyncBridge,
    delivery: &Delivery,
) -> (Vec<u8>, Disposition) {
    let request = match parse_json(&delivery.body) {
        Ok(request) => request,
        Err(e) => {
            log::error!("RPC request {} is not decodable: {}", delivery.delivery_tag, e);
            return (error_body(INVALID_JSON), Disposition::Reject);
        }
    };

    let handler = Arc::clone(handler);
    match bridge.run(async move { handler.handle(request).await }) {
        Ok(Ok(value)) => (encode_value(&value), Disposition::Ack),
        Ok(Err(e)) => {
            log::error!("RPC handler failed for request {}: {}", delivery.delivery_tag, e);
            (error_body(&e.to_string()), Disposition::Reject)
        }
        Err(e) => {
            log::error!(
                "RPC handler did not complete for request {}: {}",
                delivery.delivery_tag,
                e
            );
            (error_body(&e.to_string()), Disposition::Reject)
        }
    }
}

fn process_request(
    handler: &Arc<dyn RpcHandler>,
    bridge: &AsyncBridge,
    session: &mut dyn BrokerSession,
    delivery: Delivery,
) -> BrokerResult<()> {
    let tag = delivery.delivery_tag;
    let correlation_id = delivery.correlation_id.as_deref();
    log::info!(
        "Received RPC request {} (correlation_id: {})",
        tag,
        correlation_id.unwrap_or("-")
    );
    log::debug!("Request body: {}", delivery.preview(LOG_PREVIEW_BYTES));

    let (body, disposition) = respond(handler, bridge, &delivery);

    match delivery.reply_to.as_deref() {
        Some(reply_to) => {
            if let Err(e) = session.publish_reply(reply_to, correlation_id, &body) {
                // Settle the request even though its reply was lost
                if let Err(nack_err) = Disposition::Reject.apply(session, tag) {
                    log::debug!("Reject after failed reply for {}: {}", tag, nack_err);
                }
                return Err(e);
            }
            log::info!(
                "RPC response sent to {} (correlation_id: {})",
                reply_to,
                correlation_id.unwrap_or("-")
            );
        }
        None => log::warn!(
            "No reply_to queue on request {} (correlation_id: {}), response discarded",
            tag,
            correlation_id.unwrap_or("-")
        ),
    }

    disposition.apply(session, tag)
}

/// Builds [`RpcConsumer`]s for the lifecycle manager
pub struct RpcConsumerFactory {
    connector: Arc<dyn Connector>,
    queue: String,
}

impl RpcConsumerFactory {
    pub fn new(connector: Arc<dyn Connector>, queue: impl Into<String>) -> Self {
        Self {
            connector,
            queue: queue.into(),
        }
    }
}

impl ConsumerFactory for RpcConsumerFactory {
    type Handler = dyn RpcHandler;
    type Consumer = RpcConsumer;

    fn kind(&self) -> &'static str {
        "rpc"
    }

    fn build(&self, handler: Arc<dyn RpcHandler>, bridge: AsyncBridge) -> RpcConsumer {
        RpcConsumer::new(Arc::clone(&self.connector), self.queue.clone(), handler, bridge)
    }
}
