use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nori_pending::{PendingConfig, PendingLog};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn add_commit_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_commit");

    let payload_sizes = vec![("100B", 100), ("1KB", 1024)];

    // (pulse interval, unsynced cap)
    let policies = vec![
        ("every_record", Duration::from_millis(10), 1),
        ("pulse_10ms", Duration::from_millis(10), 10_000),
        ("pulse_1ms", Duration::from_millis(1), 10_000),
    ];

    for (size_name, size) in &payload_sizes {
        for (policy_name, pulse_interval, max_unsynced) in &policies {
            let bench_name = format!("{}_{}", policy_name, size_name);

            group.throughput(Throughput::Bytes(*size as u64));
            group.bench_function(BenchmarkId::new("add_then_commit", &bench_name), |b| {
                b.to_async(tokio::runtime::Runtime::new().unwrap())
                    .iter_custom(|iters| async move {
                        let temp_dir = TempDir::new().unwrap();
                        let config = PendingConfig {
                            path: temp_dir.path().join("tx.log"),
                            pulse_interval: *pulse_interval,
                            max_unsynced: *max_unsynced,
                            ..Default::default()
                        };
                        let log = PendingLog::open_with_config(config).await.unwrap();
                        let payload = bytes::Bytes::from(vec![b'x'; *size]);

                        let start = std::time::Instant::now();
                        for id in 0..iters as i64 {
                            black_box(
                                log.add(id, SystemTime::now(), 1, payload.clone())
                                    .await
                                    .unwrap(),
                            );
                            black_box(log.commit(id, SystemTime::now()).await.unwrap());
                        }
                        let elapsed = start.elapsed();

                        log.close().await.unwrap();
                        elapsed
                    });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, add_commit_benchmark);
criterion_main!(benches);
