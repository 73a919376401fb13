use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tskv_gateway::query::{merge_series, HistoryMerger, SeriesPoint};
use tskv_gateway::storage::{InMemoryStore, StoredRow};
use tskv_gateway::types::{ms_to_datetime, TimeRange, Value};

/// `keys` series of `points` each, offset so only some timestamps coincide
fn create_series(keys: usize, points: usize) -> Vec<Vec<SeriesPoint>> {
    (0..keys)
        .map(|k| {
            (0..points)
                .map(|i| {
                    let ts = (i * keys + k * (i % 2)) as i64 * 100;
                    (ms_to_datetime(ts), Some(Value::Number(i as f64)))
                })
                .collect()
        })
        .collect()
}

fn bench_merge_series(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_series");

    for size in [100, 1000, 10000].iter() {
        let series = create_series(4, *size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(merge_series(&series)))
        });
    }

    group.finish();
}

fn bench_history_merger(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("history_merger");

    for size in [100, 1000].iter() {
        let store = Arc::new(InMemoryStore::new());
        let keys: Vec<String> = (0..4).map(|k| format!("k{}", k)).collect();
        for (k, key) in keys.iter().enumerate() {
            store.seed(
                "ts_kv_bench",
                (0..*size).map(|i| {
                    StoredRow::from_value(
                        ms_to_datetime((i * 4 + k) as i64),
                        "bench",
                        key.as_str(),
                        &Value::Number(i as f64),
                    )
                }),
            );
        }
        let merger = HistoryMerger::new(store);
        let range = TimeRange::new(0, (*size as i64) * 4).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    black_box(merger.merge("bench", &keys, range).await.unwrap())
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merge_series, bench_history_merger);
criterion_main!(benches);
