//! End-to-end ingestion: bus payloads through the worker pool into the store

use std::sync::Arc;
use std::time::Duration;

use tskv_gateway::ingestion::{IngestionConfig, IngestionPipeline};
use tskv_gateway::storage::{
    InMemoryStore, PartitionTags, BOOL_DEFAULT, NUMBER_DEFAULT, STRING_DEFAULT,
};
use tskv_gateway::types::Value;

fn config(batch_size: usize, workers: usize, queue: usize) -> IngestionConfig {
    IngestionConfig::builder()
        .batch_size(batch_size)
        .batch_wait_time(Duration::from_secs(60))
        .flush_interval(Duration::from_secs(60))
        .channel_buffer_size(queue)
        .write_workers(workers)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_payloads_land_in_device_partitions() {
    let store = Arc::new(InMemoryStore::new());
    let mut pipeline = IngestionPipeline::new(config(3, 2, 1_000), store.clone()).unwrap();
    pipeline.start().unwrap();
    let intake = pipeline.intake().unwrap();

    for i in 0..5 {
        let payload = format!(
            r#"{{"device_id":"sensor-{}","values":{{"temp":{},"on":true,"mode":"eco"}}}}"#,
            i, i
        );
        assert_eq!(intake.handle_payload(payload.as_bytes()).accepted, 3);
    }
    let outcome = intake.handle_payload(br#"{"device_id":"pump","values":{"rpm":1200}}"#);
    assert_eq!(outcome.accepted, 1);
    drop(intake);

    let stats = pipeline.shutdown().await.unwrap();
    assert_eq!(stats.samples_received, 16);
    assert_eq!(stats.rows_inserted, 16);
    assert_eq!(stats.samples_dropped, 0);

    let rows = store.rows();
    assert_eq!(rows.len(), 16);
    assert_eq!(store.partition_count(), 2);
    assert_eq!(
        store.partition_tags("ts_kv_pump"),
        Some(PartitionTags::for_device("pump"))
    );
    assert!(rows
        .iter()
        .filter(|r| r.row.device_id.starts_with("sensor-"))
        .all(|r| r.partition == "ts_kv_sensor"));
}

#[tokio::test]
async fn test_unused_columns_hold_sentinels() {
    let store = Arc::new(InMemoryStore::new());
    let mut pipeline = IngestionPipeline::new(config(10, 1, 100), store.clone()).unwrap();
    pipeline.start().unwrap();
    let intake = pipeline.intake().unwrap();
    intake.handle_payload(br#"{"device_id":"unit42","values":{"mode":"eco","level":0.5,"on":false}}"#);
    drop(intake);
    pipeline.shutdown().await.unwrap();

    for table_row in store.rows() {
        let row = &table_row.row;
        match row.decode().unwrap() {
            Some(Value::String(s)) => {
                assert_eq!(s, "eco");
                assert_eq!(row.number_v, NUMBER_DEFAULT);
                assert_eq!(row.bool_v, BOOL_DEFAULT);
            },
            Some(Value::Number(n)) => {
                assert_eq!(n, 0.5);
                assert_eq!(row.string_v, STRING_DEFAULT);
                assert_eq!(row.bool_v, BOOL_DEFAULT);
            },
            Some(Value::Bool(b)) => {
                assert!(!b);
                assert_eq!(row.bool_v, 0);
                assert_eq!(row.string_v, STRING_DEFAULT);
            },
            None => panic!("row without value: {:?}", row),
        }
    }
}

#[tokio::test]
async fn test_full_queue_drops_and_keeps_accepted() {
    let store = Arc::new(InMemoryStore::new());
    let mut pipeline = IngestionPipeline::new(config(100, 1, 2), store.clone()).unwrap();
    let intake = pipeline.intake().unwrap();

    // workers are not running yet, so the queue fills up
    let outcome =
        intake.handle_payload(br#"{"device_id":"d-1","values":{"a":1,"b":2,"c":3,"d":4,"e":5}}"#);
    assert_eq!(outcome.accepted, 2);
    assert_eq!(outcome.dropped, 3);

    pipeline.start().unwrap();
    drop(intake);
    let stats = pipeline.shutdown().await.unwrap();
    assert_eq!(stats.samples_dropped, 3);
    assert_eq!(stats.rows_inserted, 2);
    assert_eq!(store.rows().len(), 2);
}

#[tokio::test]
async fn test_store_outage_is_counted_not_fatal() {
    let store = Arc::new(InMemoryStore::new());
    store.set_fail_inserts(true);
    let mut pipeline = IngestionPipeline::new(config(2, 1, 100), store.clone()).unwrap();
    pipeline.start().unwrap();
    let intake = pipeline.intake().unwrap();
    intake.handle_payload(br#"{"device_id":"d-1","values":{"a":1,"b":2,"c":3}}"#);
    drop(intake);

    let stats = pipeline.shutdown().await.unwrap();
    assert_eq!(stats.rows_inserted, 0);
    assert!(stats.flush_failures >= 1);
    assert!(store.rows().is_empty());
}

#[tokio::test]
async fn test_oversize_value_does_not_sink_the_batch() {
    let store = Arc::new(InMemoryStore::new());
    let mut pipeline = IngestionPipeline::new(config(10, 1, 100), store.clone()).unwrap();
    pipeline.start().unwrap();
    let intake = pipeline.intake().unwrap();

    let payload = format!(
        r#"{{"device_id":"d-1","values":{{"s":"{}","t":1}}}}"#,
        "x".repeat(300)
    );
    let outcome = intake.handle_payload(payload.as_bytes());
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.skipped, 1);
    intake.handle_payload(br#"{"device_id":"d-2","values":{"u":2}}"#);
    drop(intake);

    let stats = pipeline.shutdown().await.unwrap();
    assert_eq!(stats.rows_inserted, 2);
    let mut keys: Vec<String> = store.rows().into_iter().map(|r| r.row.k).collect();
    keys.sort();
    assert_eq!(keys, vec!["t", "u"]);
}
