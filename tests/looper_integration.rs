//! Integration tests for the pagination loop

mod common;

use std::time::Duration;

use domo_api_core::api::{
    ApiError, ExecutionContext, HttpRequest, LoopStage, Looper, OffsetLocation, ResponseEnvelope, records_at,
};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::init_logging;

fn query_usize(req: &Request, key: &str) -> usize {
    req.url
        .query_pairs()
        .find(|(name, _)| name == key)
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0)
}

/// Serves `total` users, honoring offset and limit from the query string
async fn mount_users(server: &MockServer, total: usize) {
    Mock::given(method("GET"))
        .and(path("/api/identity/v1/users"))
        .respond_with(move |req: &Request| {
            let offset = query_usize(req, "offset");
            let limit = query_usize(req, "limit");
            let users: Vec<Value> = (offset..total.min(offset + limit)).map(|id| json!({"id": id})).collect();
            ResponseTemplate::new(200).set_body_json(json!({"users": users}))
        })
        .mount(server)
        .await;
}

fn users_request(server: &MockServer) -> HttpRequest {
    HttpRequest::get(format!("{}/api/identity/v1/users", server.uri()))
}

fn ids(envelope: &ResponseEnvelope) -> Vec<u64> {
    envelope.payload.as_records().iter().filter_map(|user| user["id"].as_u64()).collect()
}

#[tokio::test]
async fn test_accumulates_until_short_then_empty_page() {
    init_logging();
    let server = MockServer::start().await;
    mount_users(&server, 250).await;

    let envelope = Looper::new(users_request(&server), records_at("/users"))
        .limit(100)
        .run(None, &ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(ids(&envelope), (0..250).collect::<Vec<_>>());
    assert!(envelope.success);
    // 100, 100, 50, then the empty page ends the loop
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
    assert_eq!(envelope.additional_info["records"], json!(250));
}

#[tokio::test]
async fn test_maximum_clamps_page_sizes() {
    init_logging();
    let server = MockServer::start().await;
    mount_users(&server, 1000).await;

    let envelope = Looper::new(users_request(&server), records_at("/users"))
        .limit(100)
        .maximum(120)
        .run(None, &ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(envelope.payload.as_records().len(), 120);
    let requests = server.received_requests().await.unwrap();
    let limits: Vec<usize> = requests.iter().map(|req| query_usize(req, "limit")).collect();
    assert_eq!(limits, vec![100, 20]);
}

#[tokio::test]
async fn test_maximum_of_250_takes_three_pages() {
    init_logging();
    let server = MockServer::start().await;
    mount_users(&server, 1000).await;

    let envelope = Looper::new(users_request(&server), records_at("/users"))
        .limit(100)
        .maximum(250)
        .run(None, &ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(ids(&envelope), (0..250).collect::<Vec<_>>());
    let requests = server.received_requests().await.unwrap();
    let pages: Vec<(usize, usize)> =
        requests.iter().map(|req| (query_usize(req, "offset"), query_usize(req, "limit"))).collect();
    assert_eq!(pages, vec![(0, 100), (100, 100), (200, 50)]);
    assert_eq!(envelope.additional_info["pages"], json!(3));
}

#[tokio::test]
async fn test_maximum_below_page_size_clamps_first_page() {
    init_logging();
    let server = MockServer::start().await;
    mount_users(&server, 1000).await;

    let envelope = Looper::new(users_request(&server), records_at("/users"))
        .limit(500)
        .maximum(30)
        .run(None, &ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(envelope.payload.as_records().len(), 30);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(query_usize(&requests[0], "limit"), 30);
}

#[tokio::test]
async fn test_loop_until_end_ignores_maximum() {
    init_logging();
    let server = MockServer::start().await;
    mount_users(&server, 75).await;

    let envelope = Looper::new(users_request(&server), records_at("/users"))
        .limit(50)
        .maximum(10)
        .loop_until_end(true)
        .wait(Duration::from_millis(1))
        .run(None, &ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(envelope.payload.as_records().len(), 75);
}

#[tokio::test]
async fn test_extraction_failure_on_second_page() {
    init_logging();
    let server = MockServer::start().await;
    mount_users(&server, 250).await;

    let mut page = 0;
    let arr_fn = move |envelope: &ResponseEnvelope| {
        page += 1;
        if page == 2 {
            anyhow::bail!("unexpected page shape");
        }
        records_at("/users")(envelope)
    };

    let err = Looper::new(users_request(&server), arr_fn)
        .limit(100)
        .run(None, &ExecutionContext::new())
        .await
        .unwrap_err();

    match &err {
        ApiError::LoopStage { stage, source, .. } => {
            assert_eq!(*stage, LoopStage::ArrFn);
            assert_eq!(source.to_string(), "unexpected page shape");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("processing arr_fn"));
}

#[tokio::test]
async fn test_failed_page_returned_as_is() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "forbidden"})))
        .expect(1)
        .mount(&server)
        .await;

    let envelope = Looper::new(users_request(&server), records_at("/users"))
        .run(None, &ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(envelope.status, 403);
    assert!(!envelope.success);
    assert_eq!(envelope.payload.as_json().unwrap()["message"], json!("forbidden"));
}

#[tokio::test]
async fn test_offsets_in_body() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/search/v1/query"))
        .respond_with(|req: &Request| {
            let body: Value = serde_json::from_slice(&req.body).unwrap_or_default();
            let offset = body["offset"].as_u64().unwrap_or(0);
            let count = body["count"].as_u64().unwrap_or(0);
            let results: Vec<Value> = (offset..40.min(offset + count)).map(|id| json!({"id": id})).collect();
            ResponseTemplate::new(200).set_body_json(json!({"searchObjects": results}))
        })
        .mount(&server)
        .await;

    let request = HttpRequest::post(format!("{}/api/search/v1/query", server.uri()))
        .json(json!({"entities": ["DATASET"], "query": "*"}));
    let envelope = Looper::new(request, records_at("/searchObjects"))
        .offset_location(OffsetLocation::Body)
        .offset_keys(domo_api_core::api::OffsetKeys::new("offset", "count"))
        .limit(15)
        .run(None, &ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(envelope.payload.as_records().len(), 40);
    let first: Value = serde_json::from_slice(&server.received_requests().await.unwrap()[0].body).unwrap();
    assert_eq!(first, json!({"entities": ["DATASET"], "query": "*", "offset": 0, "count": 15}));
}

#[tokio::test]
async fn test_dry_run_stops_after_first_page() {
    init_logging();
    let server = MockServer::start().await;

    let envelope = Looper::new(users_request(&server), |_envelope: &ResponseEnvelope| Ok(vec![json!(1)]))
        .run(None, &ExecutionContext::new().with_dry_run(true))
        .await
        .unwrap();

    assert_eq!(envelope.additional_info["dry_run"], json!(true));
    assert!(server.received_requests().await.unwrap().is_empty());
}
