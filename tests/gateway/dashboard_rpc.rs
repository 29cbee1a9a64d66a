//! Dashboard requests answered over the RPC queue

use crate::common::{rpc_manager, seeded_store, wait_consuming, wait_for_settlements, RPC_QUEUE};
use clickstream_gateway::broker::memory::{MemoryBroker, PublishedMessage, Settlement};
use clickstream_gateway::handlers::{DashboardRpcHandler, DashboardService, MemoryDocumentStore};
use clickstream_gateway::messages::dashboard::decode_response;
use clickstream_gateway::messages::{DashboardResponse, MAX_RECENT_CLICKS, MAX_TOP_LINKS};
use serde_json::json;
use std::sync::Arc;

/// Serve `requests` through a managed RPC consumer and return the replies on "Q"
async fn round_trip(
    store: Arc<MemoryDocumentStore>,
    requests: &[(&[u8], Option<&str>)],
) -> (MemoryBroker, Vec<Settlement>, Vec<PublishedMessage>) {
    let broker = MemoryBroker::new();
    let manager = rpc_manager(&broker);
    manager
        .start(Arc::new(DashboardRpcHandler::new(Arc::new(
            DashboardService::new(store),
        ))))
        .await;
    wait_consuming(|| manager.state()).await;

    for (body, correlation_id) in requests {
        broker
            .publish_request(RPC_QUEUE, body.to_vec(), Some("Q"), *correlation_id)
            .unwrap();
    }
    let settlements = wait_for_settlements(&broker, requests.len())
        .await
        .into_iter()
        .map(|record| record.settlement)
        .collect();
    manager.stop().await;

    let replies = broker.replies_to("Q").unwrap();
    (broker, settlements, replies)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dashboard_for_ten_links_and_two_hundred_clicks() {
    let (_broker, settlements, replies) =
        round_trip(seeded_store(10, 20), &[(br#"{"user_id":1}"#, Some("cid1"))]).await;

    assert_eq!(settlements, vec![Settlement::Ack]);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].properties.correlation_id.as_deref(), Some("cid1"));

    let body = replies[0].json();
    assert_eq!(body["status"], "success");
    assert_eq!(body["user_id"], 1);
    assert_eq!(body["total_clicks"], 200);
    assert_eq!(body["total_links"], 10);
    assert_eq!(body["uniq_visitors"], 7);
    assert_eq!(body["top_links"].as_array().unwrap().len(), MAX_TOP_LINKS);
    assert_eq!(body["recent_clicks"].as_array().unwrap().len(), MAX_RECENT_CLICKS);

    // Highest click_count first
    assert_eq!(body["top_links"][0]["short_url"], "s09");
    assert_eq!(body["top_links"][0]["clicks"], 29);

    // 20 hourly clicks starting 09:00 span two days
    assert_eq!(
        body["stat_links"],
        json!([
            {"date": "20 Oct", "clicks": 150},
            {"date": "21 Oct", "clicks": 50}
        ])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reply_decodes_back_to_the_same_response() {
    let (_broker, _settlements, replies) =
        round_trip(seeded_store(3, 4), &[(br#"{"user_id":1}"#, Some("rt"))]).await;

    let decoded = decode_response(&replies[0].body).unwrap();
    let reencoded: serde_json::Value = serde_json::to_value(&decoded).unwrap();
    assert_eq!(reencoded, replies[0].json());
    match decoded {
        DashboardResponse::Success(stats) => {
            assert_eq!(stats.total_links, 3);
            assert_eq!(stats.total_clicks, 12);
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_json_request_gets_error_reply_and_is_rejected() {
    let (_broker, settlements, replies) =
        round_trip(seeded_store(1, 1), &[(b"<html>not json</html>", Some("bad"))]).await;

    assert_eq!(settlements, vec![Settlement::Nack { requeue: false }]);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].json(), json!({"error": "Invalid JSON format"}));
    assert_eq!(replies[0].properties.correlation_id.as_deref(), Some("bad"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_user_ids_get_error_status() {
    let (_broker, settlements, replies) = round_trip(
        seeded_store(1, 1),
        &[
            (br#"{"user_id":0}"#, Some("zero")),
            (br#"{"user_id":-3}"#, Some("negative")),
            (br#"{"user_id":"1"}"#, Some("string")),
            (br#"{}"#, Some("missing")),
        ],
    )
    .await;

    assert_eq!(settlements, vec![Settlement::Ack; 4]);
    for reply in &replies {
        let body = reply.json();
        assert_eq!(body["status"], "error", "reply {:?}", reply.properties);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request format"));
    }
    assert_eq!(replies[0].json()["user_id"], 0);
    assert_eq!(replies[1].json()["user_id"], -3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnected_store_gets_limited_status() {
    let (_broker, settlements, replies) = round_trip(
        Arc::new(MemoryDocumentStore::disconnected()),
        &[(br#"{"user_id":42}"#, Some("lim"))],
    )
    .await;

    assert_eq!(settlements, vec![Settlement::Ack]);
    let body = replies[0].json();
    assert_eq!(body["status"], "limited");
    assert_eq!(body["user_id"], 42);
    assert_eq!(body["message"], "Database not available");
    assert_eq!(body["total_clicks"], 0);
    assert_eq!(body["total_links"], 0);
    assert_eq!(body["uniq_visitors"], 0);
    assert_eq!(body["top_links"], json!([]));
    assert_eq!(body["stat_links"], json!([]));
    assert_eq!(body["recent_clicks"], json!([]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_store_gets_error_status() {
    let store = seeded_store(2, 2);
    store.set_failing(Some("connection reset"));

    let (_broker, settlements, replies) =
        round_trip(store, &[(br#"{"user_id":1}"#, Some("fail"))]).await;

    assert_eq!(settlements, vec![Settlement::Ack]);
    let body = replies[0].json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Database query failed");
    assert_eq!(body["user_id"], 1);
}
