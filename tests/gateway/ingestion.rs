//! Click events flowing from the broker into the search indexer

use crate::common::{
    event_manager, wait_consuming, wait_for_settlements, RecordingIndexer, EXCHANGE, QUEUE,
    ROUTING_KEY,
};
use clickstream_gateway::broker::memory::{MemoryBroker, MessageProperties, Settlement};
use clickstream_gateway::handlers::IndexingEventHandler;
use serde_json::json;
use std::sync::Arc;

fn publish(broker: &MemoryBroker, body: &str) {
    let routed = broker
        .publish(EXCHANGE, ROUTING_KEY, body, MessageProperties::default())
        .unwrap();
    assert_eq!(routed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_click_event_is_indexed_once_and_acked() {
    let broker = MemoryBroker::new();
    let indexer = Arc::new(RecordingIndexer::default());
    let manager = event_manager(&broker);

    manager
        .start(Arc::new(IndexingEventHandler::new(indexer.clone())))
        .await;
    wait_consuming(|| manager.state()).await;

    publish(
        &broker,
        r#"{"index_type":"click_events","data":{"short_code":"abc123","is_bot":false}}"#,
    );
    let settlements = wait_for_settlements(&broker, 1).await;
    manager.stop().await;

    assert_eq!(settlements[0].settlement, Settlement::Ack);
    assert_eq!(settlements[0].queue, QUEUE);
    assert_eq!(
        indexer.documents(),
        vec![(
            "click_events".to_string(),
            json!({"short_code": "abc123", "is_bot": false})
        )]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_indexer_failure_rejects_delivery() {
    let broker = MemoryBroker::new();
    let indexer = Arc::new(RecordingIndexer {
        fail: true,
        ..RecordingIndexer::default()
    });
    let manager = event_manager(&broker);

    manager
        .start(Arc::new(IndexingEventHandler::new(indexer.clone())))
        .await;
    wait_consuming(|| manager.state()).await;

    publish(&broker, r#"{"index_type":"click_events","data":{"short_code":"x"}}"#);
    let settlements = wait_for_settlements(&broker, 1).await;
    manager.stop().await;

    assert_eq!(settlements[0].settlement, Settlement::Nack { requeue: false });
    assert_eq!(indexer.documents().len(), 1);
    assert_eq!(broker.queue_depth(QUEUE).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_and_unsupported_events_never_reach_the_indexer() {
    let broker = MemoryBroker::new();
    let indexer = Arc::new(RecordingIndexer::default());
    let manager = event_manager(&broker);

    manager
        .start(Arc::new(IndexingEventHandler::new(indexer.clone())))
        .await;
    wait_consuming(|| manager.state()).await;

    publish(&broker, "{\"index_type\": ");
    publish(&broker, r#"{"index_type":"page_views","data":{"path":"/"}}"#);
    publish(&broker, r#"{"index_type":"click_events","data":{}}"#);
    let settlements: Vec<Settlement> = wait_for_settlements(&broker, 3)
        .await
        .into_iter()
        .map(|record| record.settlement)
        .collect();
    manager.stop().await;

    assert_eq!(
        settlements,
        vec![
            Settlement::Nack { requeue: false },
            Settlement::Ack,
            Settlement::Ack
        ]
    );
    assert!(indexer.documents().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_prefetch_one_processes_deliveries_in_publish_order() {
    let broker = MemoryBroker::new();
    let indexer = Arc::new(RecordingIndexer::default());
    let manager = event_manager(&broker);

    manager
        .start(Arc::new(IndexingEventHandler::new(indexer.clone())))
        .await;
    wait_consuming(|| manager.state()).await;

    for i in 0..20 {
        publish(
            &broker,
            &format!(r#"{{"index_type":"click_events","data":{{"short_code":"c{i}"}}}}"#),
        );
    }
    wait_for_settlements(&broker, 20).await;
    manager.stop().await;

    let codes: Vec<String> = indexer
        .documents()
        .into_iter()
        .map(|(_, document)| document["short_code"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("c{i}")).collect();
    assert_eq!(codes, expected);
}
