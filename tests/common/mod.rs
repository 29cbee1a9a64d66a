//! Shared fixtures for gateway integration tests

#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use clickstream_gateway::broker::memory::{MemoryBroker, SettlementRecord};
use clickstream_gateway::broker::Topology;
use clickstream_gateway::consumer::{
    ConsumerState, EventConsumerFactory, EventConsumerManager, RpcConsumerFactory,
    RpcConsumerManager,
};
use clickstream_gateway::handlers::{
    ClickRecord, IndexError, IndexReceipt, LinkRecord, MemoryDocumentStore, SearchIndexer,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const EXCHANGE: &str = "analytics";
pub const QUEUE: &str = "click_events";
pub const ROUTING_KEY: &str = "analytics.click";
pub const RPC_QUEUE: &str = "dashboard_request";
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn event_manager(broker: &MemoryBroker) -> EventConsumerManager {
    EventConsumerManager::new(EventConsumerFactory::new(
        Arc::new(broker.connector()),
        Topology::bound(EXCHANGE, QUEUE, ROUTING_KEY),
    ))
}

pub fn rpc_manager(broker: &MemoryBroker) -> RpcConsumerManager {
    RpcConsumerManager::new(RpcConsumerFactory::new(
        Arc::new(broker.connector()),
        RPC_QUEUE,
    ))
}

/// Poll `condition` until it holds or the wait times out
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_consuming(state: impl Fn() -> Option<ConsumerState>) {
    wait_until("consumer to start consuming", || {
        state() == Some(ConsumerState::Consuming)
    })
    .await;
}

pub async fn wait_for_settlements(broker: &MemoryBroker, count: usize) -> Vec<SettlementRecord> {
    let waiter = broker.clone();
    let settled = tokio::task::spawn_blocking(move || waiter.wait_for_settlements(count, WAIT_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert!(settled, "timed out waiting for {count} settlements");
    broker.settlements().unwrap()
}

/// Search indexer that records documents instead of sending them
#[derive(Default)]
pub struct RecordingIndexer {
    pub documents: Mutex<Vec<(String, Value)>>,
    pub fail: bool,
}

impl RecordingIndexer {
    pub fn documents(&self) -> Vec<(String, Value)> {
        self.documents.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SearchIndexer for RecordingIndexer {
    async fn index(&self, index_type: &str, document: &Value) -> Result<IndexReceipt, IndexError> {
        self.documents
            .lock()
            .unwrap()
            .push((index_type.to_string(), document.clone()));
        if self.fail {
            return Err(IndexError::Status {
                index: format!("analytics_{index_type}"),
                status: 503,
                reason: "Service Unavailable".to_string(),
            });
        }
        Ok(IndexReceipt {
            index: format!("analytics_{index_type}"),
            id: Some("doc-1".to_string()),
            result: Some("created".to_string()),
        })
    }
}

/// Store holding `links` links for user 1 with `clicks_per_link` clicks each
pub fn seeded_store(links: u64, clicks_per_link: i64) -> Arc<MemoryDocumentStore> {
    let store = Arc::new(MemoryDocumentStore::new());
    let start = Utc.with_ymd_and_hms(2025, 10, 20, 9, 0, 0).unwrap();
    for i in 0..links {
        let code = format!("s{i:02}");
        store
            .insert_link(LinkRecord {
                short_code: code.clone(),
                original_url: format!("https://example.org/page/{i}"),
                user_id: 1,
                click_count: (clicks_per_link as u64) + i,
                is_active: i % 2 == 0,
            })
            .unwrap();
        for j in 0..clicks_per_link {
            let clicked_at = start + ChronoDuration::hours(j) + ChronoDuration::minutes(i as i64);
            store
                .insert_click(
                    ClickRecord::new(code.clone(), clicked_at)
                        .with_ip_address_hash(format!("visitor-{}", j % 7)),
                )
                .unwrap();
        }
    }
    store
}
