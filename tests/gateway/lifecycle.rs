//! Both managers running side by side against one broker

use crate::common::{
    event_manager, rpc_manager, seeded_store, wait_consuming, wait_for_settlements,
    RecordingIndexer, EXCHANGE, QUEUE, ROUTING_KEY, RPC_QUEUE,
};
use clickstream_gateway::broker::memory::{MemoryBroker, MessageProperties};
use clickstream_gateway::handlers::{DashboardRpcHandler, DashboardService, IndexingEventHandler};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_and_rpc_consumers_run_concurrently() {
    let broker = MemoryBroker::new();
    let indexer = Arc::new(RecordingIndexer::default());
    let events = event_manager(&broker);
    let rpc = rpc_manager(&broker);

    events
        .start(Arc::new(IndexingEventHandler::new(indexer.clone())))
        .await;
    rpc.start(Arc::new(DashboardRpcHandler::new(Arc::new(
        DashboardService::new(seeded_store(2, 3)),
    ))))
    .await;
    wait_consuming(|| events.state()).await;
    wait_consuming(|| rpc.state()).await;
    assert_eq!(broker.open_sessions().unwrap(), 2);

    broker
        .publish(
            EXCHANGE,
            ROUTING_KEY,
            r#"{"index_type":"click_events","data":{"short_code":"s00"}}"#,
            MessageProperties::default(),
        )
        .unwrap();
    broker
        .publish_request(RPC_QUEUE, r#"{"user_id":1}"#, Some("Q"), Some("both"))
        .unwrap();

    let settlements = wait_for_settlements(&broker, 2).await;
    let mut queues: Vec<&str> = settlements.iter().map(|s| s.queue.as_str()).collect();
    queues.sort_unstable();
    assert_eq!(queues, vec![QUEUE, RPC_QUEUE]);

    events.stop().await;
    rpc.stop().await;

    assert_eq!(indexer.documents().len(), 1);
    assert_eq!(broker.replies_to("Q").unwrap()[0].json()["total_clicks"], 6);
    assert_eq!(broker.open_sessions().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_while_running_and_stop_twice_are_harmless() {
    let broker = MemoryBroker::new();
    let indexer = Arc::new(RecordingIndexer::default());
    let events = event_manager(&broker);

    events
        .start(Arc::new(IndexingEventHandler::new(indexer.clone())))
        .await;
    events
        .start(Arc::new(IndexingEventHandler::new(indexer.clone())))
        .await;
    wait_consuming(|| events.state()).await;
    assert_eq!(broker.connections_opened().unwrap(), 1);

    events.stop().await;
    events.stop().await;
    assert!(!events.is_running());
    assert_eq!(broker.open_sessions().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_messages_published_while_stopped_wait_in_the_queue() {
    let broker = MemoryBroker::new();
    let indexer = Arc::new(RecordingIndexer::default());
    let events = event_manager(&broker);

    events
        .start(Arc::new(IndexingEventHandler::new(indexer.clone())))
        .await;
    wait_consuming(|| events.state()).await;
    events.stop().await;

    broker
        .publish(
            EXCHANGE,
            ROUTING_KEY,
            r#"{"index_type":"click_events","data":{"short_code":"late"}}"#,
            MessageProperties::default(),
        )
        .unwrap();
    assert_eq!(broker.queue_depth(QUEUE).unwrap(), 1);
    assert!(indexer.documents().is_empty());

    events
        .start(Arc::new(IndexingEventHandler::new(indexer.clone())))
        .await;
    wait_for_settlements(&broker, 1).await;
    events.stop().await;

    assert_eq!(indexer.documents().len(), 1);
    assert_eq!(broker.queue_depth(QUEUE).unwrap(), 0);
}
