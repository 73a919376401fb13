//! RPC surface driven through the axum router

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use std::sync::Arc;
use tower::ServiceExt;

use tskv_gateway::ingestion::IngestionMetrics;
use tskv_gateway::metrics::RpcMetrics;
use tskv_gateway::rpc::{build_router, AppState, HistoryService, Reply};
use tskv_gateway::storage::{InMemoryStore, StoredRow};
use tskv_gateway::types::{ms_to_datetime, Value};

const BASE: i64 = 1_700_000_000_000;

fn app() -> Router {
    let store = Arc::new(InMemoryStore::new());
    store.seed(
        "ts_kv_sensor",
        (0..30).flat_map(|i| {
            let ts = ms_to_datetime(BASE + i * 1_000);
            let mut rows = vec![StoredRow::from_value(
                ts,
                "sensor-1",
                "temp",
                &Value::Number(i as f64),
            )];
            if i % 10 == 0 {
                rows.push(StoredRow::from_value(
                    ts,
                    "sensor-1",
                    "mode",
                    &Value::String(format!("m{}", i)),
                ));
            }
            rows
        }),
    );

    let state = AppState::new(HistoryService::new(store), RpcMetrics::new().unwrap())
        .with_ingestion(Arc::new(IngestionMetrics::new()));
    build_router(Arc::new(state), &[])
}

async fn call(app: Router, method: &str, body: Json) -> (Reply, Json) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/rpc/{}", method))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let reply: Reply = serde_json::from_slice(&bytes).unwrap();
    let data = reply.data_json().unwrap();
    (reply, data)
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_attributes_history() {
    let (reply, data) = call(
        app(),
        "GetDeviceAttributesHistory",
        json!({
            "device_id": "sensor-1",
            "attribute": ["temp", "mode"],
            "start_time": BASE,
            "end_time": BASE + 10_000,
        }),
    )
    .await;
    assert!(reply.is_success());
    assert_eq!(data["systime"].as_array().unwrap().len(), 11);
    assert_eq!(data["temp"][0], 0.0);
    assert_eq!(data["mode"][0], "m0");
    assert_eq!(data["mode"][1], Json::Null);
    assert_eq!(data["mode"][10], "m10");
}

#[tokio::test]
async fn test_device_history() {
    let (reply, data) = call(
        app(),
        "GetDeviceHistory",
        json!({
            "device_id": "sensor-1",
            "key": "temp",
            "start_time": BASE,
            "end_time": BASE + 60_000,
            "limit": 3,
        }),
    )
    .await;
    assert!(reply.is_success());
    assert_eq!(data["total"], 30);
    assert_eq!(
        data["data"],
        json!([
            {"ts": BASE + 29_000, "key": "temp", "number_v": 29.0},
            {"ts": BASE + 28_000, "key": "temp", "number_v": 28.0},
            {"ts": BASE + 27_000, "key": "temp", "number_v": 27.0},
        ])
    );
}

#[tokio::test]
async fn test_paged_history_backward() {
    let (reply, data) = call(
        app(),
        "GetDeviceHistoryWithPageAndPage",
        json!({
            "device_id": "sensor-1",
            "key": "temp",
            "start_time": BASE,
            "end_time": BASE + 60_000,
            "page_records": 2,
            "first_data_time": BASE + 10_000,
        }),
    )
    .await;
    assert!(reply.is_success());
    let ts: Vec<i64> = data
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["ts"].as_i64().unwrap())
        .collect();
    assert_eq!(ts, vec![BASE + 8_000, BASE + 9_000]);
}

#[tokio::test]
async fn test_raw_series() {
    let (reply, data) = call(
        app(),
        "GetDeviceKVDataWithNoAggregate",
        json!({
            "device_id": "sensor-1",
            "key": "mode",
            "start_time": BASE,
            "end_time": BASE + 60_000,
        }),
    )
    .await;
    assert!(reply.is_success());
    assert_eq!(
        data,
        json!([
            {"x": BASE, "y": "m0"},
            {"x": BASE + 10_000, "y": "m10"},
            {"x": BASE + 20_000, "y": "m20"},
        ])
    );
}

#[tokio::test]
async fn test_aggregate() {
    let (reply, data) = call(
        app(),
        "GetDeviceKVDataWithAggregate",
        json!({
            "device_id": "sensor-1",
            "key": "temp",
            "start_time": BASE,
            "end_time": BASE + 29_999,
            "aggregate_func": "sum",
            "aggregate_window": 10_000,
        }),
    )
    .await;
    assert!(reply.is_success());
    assert_eq!(
        data,
        json!([
            {"x": BASE, "x2": BASE + 10_000, "y": 45.0},
            {"x": BASE + 10_000, "x2": BASE + 20_000, "y": 145.0},
            {"x": BASE + 20_000, "x2": BASE + 30_000, "y": 245.0},
        ])
    );
}

#[tokio::test]
async fn test_failures_are_status_zero_with_http_ok() {
    let (reply, data) = call(
        app(),
        "GetDeviceKVDataWithAggregate",
        json!({
            "device_id": "sensor-1",
            "key": "temp",
            "start_time": BASE,
            "end_time": BASE + 1_000,
            "aggregate_func": "avg",
            "aggregate_window": 0,
        }),
    )
    .await;
    assert_eq!(reply.status, 0);
    assert_eq!(data, json!({}));

    let (reply, _) = call(
        app(),
        "GetDeviceKVDataWithNoAggregate",
        json!({"device_id": "sensor-1", "key": "temp", "start_time": 10, "end_time": 1}),
    )
    .await;
    assert_eq!(reply.status, 0);

    let (reply, _) = call(app(), "GetDeviceHistory", json!({"device_id": 5})).await;
    assert_eq!(reply.status, 0);
    assert!(reply.message.starts_with("Malformed request"));
}

#[tokio::test]
async fn test_metrics_exposition() {
    let app = app();
    let (reply, _) = call(
        app.clone(),
        "GetDeviceHistory",
        json!({"device_id": "sensor-1", "key": "temp", "start_time": BASE, "end_time": BASE + 1}),
    )
    .await;
    assert!(reply.is_success());

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tskv_rpc_requests_total{method=\"GetDeviceHistory\",status=\"success\"} 1"));
    assert!(text.contains("tskv_samples_received_total"));
}
