//! Inbound deliveries and their terminal dispositions

use crate::broker::{BrokerResult, BrokerSession};

/// One inbound broker message together with the data needed to settle it
///
/// A delivery lives for exactly one handler invocation and must be settled
/// (acked or nacked) exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Raw message payload
    pub body: Vec<u8>,
    /// Broker-assigned ordinal used to ack/nack this message
    pub delivery_tag: u64,
    /// Opaque token used by RPC callers to match replies
    pub correlation_id: Option<String>,
    /// Queue the RPC caller listens on for the reply
    pub reply_to: Option<String>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            delivery_tag,
            correlation_id: None,
            reply_to: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Lossy, length-limited rendering of the body for log lines
    pub fn preview(&self, max_bytes: usize) -> String {
        if self.body.len() > max_bytes {
            format!("{}...", String::from_utf8_lossy(&self.body[..max_bytes]))
        } else {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }
}

/// Terminal action taken on a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// basic.ack
    Ack,
    /// basic.nack without requeue; the broker dead-letters or drops it
    Reject,
    /// basic.nack with requeue
    Requeue,
}

impl Disposition {
    /// Issue this disposition for `delivery_tag` on the owning session
    pub fn apply(self, session: &mut dyn BrokerSession, delivery_tag: u64) -> BrokerResult<()> {
        match self {
            Disposition::Ack => session.ack(delivery_tag),
            Disposition::Reject => session.nack(delivery_tag, false),
            Disposition::Requeue => session.nack(delivery_tag, true),
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::Ack => write!(f, "ack"),
            Disposition::Reject => write!(f, "reject"),
            Disposition::Requeue => write!(f, "requeue"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_long_bodies() {
        let delivery = Delivery::new(1, "x".repeat(300));
        let preview = delivery.preview(100);
        assert_eq!(preview.len(), 103);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_preview_handles_invalid_utf8() {
        let delivery = Delivery::new(1, vec![0xff, 0xfe, b'a']);
        assert!(delivery.preview(100).ends_with('a'));
    }

    #[test]
    fn test_builder_sets_rpc_properties() {
        let delivery = Delivery::new(7, "{}")
            .with_correlation_id("cid1")
            .with_reply_to("Q");
        assert_eq!(delivery.correlation_id.as_deref(), Some("cid1"));
        assert_eq!(delivery.reply_to.as_deref(), Some("Q"));
        assert_eq!(delivery.delivery_tag, 7);
    }
}
