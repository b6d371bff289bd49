/// logging-server integration tests
/// インメモリのブローカーとストアを使って REST API のエンドツーエンド動作を検証する。
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, TimeZone, Utc};
use k1s0_logging_server::adapter::handler;
use k1s0_logging_server::domain::entity::{LogEntry, LogLevel};
use k1s0_logging_server::domain::repository::LogEntryRepository;
use k1s0_logging_server::infrastructure::rabbitmq::RetryPolicy;
use k1s0_logging_server::test_support::TestHarness;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn get_json(harness: &TestHarness, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = handler::router(harness.state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn test_emit_consume_and_list() {
    let harness = TestHarness::new();
    let app = handler::router(harness.state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/logging/test")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"message":"boot","level":"info"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // テストイベントとミドルウェアの API リクエストイベントの 2 件
    harness.wait_for_queued(2).await;
    let processor = harness.processor(RetryPolicy::Unbounded);
    let report = harness.broker.drain(&processor, 10).await;
    assert_eq!(report.persisted, 2);

    let (status, json) = get_json(&harness, "/v1/logging/entries?page=1&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let boot = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["message"] == "boot")
        .unwrap();
    assert_eq!(boot["level"], "info");
    assert_eq!(boot["context"], "TEST_CONTROLLER");
    assert!(boot["id"].as_i64().is_some());
    assert!(!boot["requestId"].as_str().unwrap().is_empty());
    assert!(boot["createdAt"].as_str().is_some());
}

#[tokio::test]
async fn test_request_id_lookup_oldest_first() {
    let harness = TestHarness::new();
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    for (message, offset) in [("second", 5), ("first", 0)] {
        harness
            .repo
            .create(
                &LogEntry::new(LogLevel::Info, message)
                    .with_request_id("r1")
                    .with_timestamp(base + Duration::seconds(offset)),
            )
            .await
            .unwrap();
    }
    harness
        .repo
        .create(&LogEntry::new(LogLevel::Info, "other").with_request_id("r2"))
        .await
        .unwrap();

    let (status, json) = get_json(&harness, "/v1/logging/entries/request/r1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["requestId"], "r1");
    assert_eq!(json["total"], 2);
    assert_eq!(json["data"][0]["message"], "first");
    assert_eq!(json["data"][1]["message"], "second");
}

#[tokio::test]
async fn test_pagination_disjoint_pages() {
    let harness = TestHarness::new();
    harness.seed(15).await;

    let (_, page1) = get_json(&harness, "/v1/logging/entries?page=1&limit=10").await;
    let (_, page2) = get_json(&harness, "/v1/logging/entries?page=2&limit=10").await;
    assert_eq!(page1["pagination"]["total"], 10);
    assert_eq!(page2["pagination"]["total"], 5);
    assert_eq!(page2["pagination"]["page"], 2);

    let ids = |json: &serde_json::Value| -> Vec<i64> {
        json["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_i64().unwrap())
            .collect()
    };
    let (ids1, ids2) = (ids(&page1), ids(&page2));
    assert!(ids1.iter().all(|id| !ids2.contains(id)));
    // 新しい順
    assert!(ids1.windows(2).all(|w| w[0] > w[1]));
    assert!(ids1.last().unwrap() > ids2.first().unwrap());
}

#[tokio::test]
async fn test_user_lookup_newest_first() {
    let harness = TestHarness::new();
    for message in ["older", "newer"] {
        harness
            .repo
            .create(&LogEntry::new(LogLevel::Warn, message).with_user_id(9))
            .await
            .unwrap();
    }

    let (status, json) = get_json(&harness, "/v1/logging/entries/user/9").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["data"][0]["message"], "newer");
    assert_eq!(json["data"][1]["message"], "older");
}

#[tokio::test]
async fn test_date_range_inclusive_end_day() {
    let harness = TestHarness::new();
    let inside = Utc.with_ymd_and_hms(2024, 1, 31, 23, 30, 0).unwrap();
    let outside = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 1).unwrap();
    for (message, ts) in [("inside", inside), ("outside", outside)] {
        harness
            .repo
            .create(&LogEntry::new(LogLevel::Info, message).with_timestamp(ts))
            .await
            .unwrap();
    }

    let (status, json) = get_json(
        &harness,
        "/v1/logging/entries/date-range?startDate=2024-01-01&endDate=2024-01-31",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["data"][0]["message"], "inside");
}

#[tokio::test]
async fn test_get_unknown_entry_returns_envelope() {
    let harness = TestHarness::new();
    let (status, json) = get_json(&harness, "/v1/logging/entries/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "SYS_LOGGING_NOT_FOUND");
}

#[tokio::test]
async fn test_openapi_document_lists_paths() {
    let harness = TestHarness::new();
    let (status, json) = get_json(&harness, "/api-docs/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    let paths = json["paths"].as_object().unwrap();
    assert!(paths.contains_key("/v1/logging/test"));
    assert!(paths.contains_key("/v1/logging/entries/date-range"));
    assert!(paths.contains_key("/v1/logging/entries/{id}"));
}
