//! Queue topology declared by a consumer before it starts consuming

/// Prefetch window enforced on every consumer channel
///
/// One unacknowledged delivery at a time gives strict backpressure and fair
/// dispatch across processes sharing a queue.
pub const PREFETCH_COUNT: u16 = 1;

/// Where a consumer's queue comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// Durable queue bound to a durable topic exchange
    Bound {
        exchange: String,
        queue: String,
        routing_key: String,
    },
    /// Durable queue addressed directly by name through the default exchange
    Direct { queue: String },
}

impl Topology {
    pub fn bound(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Topology::Bound {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn direct(queue: impl Into<String>) -> Self {
        Topology::Direct {
            queue: queue.into(),
        }
    }

    /// Queue the consumer reads from
    pub fn queue(&self) -> &str {
        match self {
            Topology::Bound { queue, .. } | Topology::Direct { queue } => queue,
        }
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::Bound {
                exchange,
                queue,
                routing_key,
            } => write!(f, "{exchange} -[{routing_key}]-> {queue}"),
            Topology::Direct { queue } => write!(f, "{queue}"),
        }
    }
}

/// AMQP topic pattern match: `*` matches one word, `#` matches zero or more
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            matches_words(&pattern[1..], key) || (!key.is_empty() && matches_words(pattern, &key[1..]))
        }
        (Some(_), None) | (None, Some(_)) => false,
        (Some(&"*"), Some(_)) => matches_words(&pattern[1..], &key[1..]),
        (Some(p), Some(k)) => p == k && matches_words(&pattern[1..], &key[1..]),
    }
}
