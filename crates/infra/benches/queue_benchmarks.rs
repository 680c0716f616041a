use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::time::Duration;

use assetflow_core::{JobId, ObjectKey};
use assetflow_infra::jobs::{Job, RetryPolicy};
use assetflow_infra::ledger::InMemoryLedger;
use assetflow_infra::queue::{InMemoryJobQueue, JobQueue};
use assetflow_infra::storage::{InMemoryObjectStore, ObjectStore};
use assetflow_infra::workers::{Artifact, FnProcessor, WorkerOptions, WorkerPool};
use bytes::Bytes;

const VT: Duration = Duration::from_secs(30);

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn job(i: usize) -> Job {
    Job::new(
        ObjectKey::parse(format!("in/{i}.png")).unwrap(),
        serde_json::json!({"width": 128}),
    )
    .with_id(JobId::parse(format!("job-{i}")).unwrap())
}

/// Enqueue → lease → ack, one job at a time.
fn bench_lease_ack_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("queue_lease_ack");
    group.throughput(Throughput::Elements(1));

    group.bench_function("in_memory", |b| {
        let queue = InMemoryJobQueue::new();
        let mut i = 0usize;
        b.iter(|| {
            rt.block_on(async {
                queue.enqueue(job(i)).await.unwrap();
                let lease = queue.lease(VT, Duration::ZERO).await.unwrap().unwrap();
                black_box(queue.ack(&lease.handle).await.unwrap());
            });
            i += 1;
        });
    });

    group.finish();
}

/// Leasing from a queue that already holds a backlog.
fn bench_lease_with_backlog(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("queue_lease_backlog");

    for backlog in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(backlog as u64));
        group.bench_with_input(BenchmarkId::from_parameter(backlog), &backlog, |b, &backlog| {
            b.iter(|| {
                rt.block_on(async {
                    let queue = InMemoryJobQueue::new();
                    for i in 0..backlog {
                        queue.enqueue(job(i)).await.unwrap();
                    }
                    while let Some(lease) = queue.lease(VT, Duration::ZERO).await.unwrap() {
                        queue.ack(&lease.handle).await.unwrap();
                    }
                    black_box(queue.stats().await.unwrap());
                });
            });
        });
    }

    group.finish();
}

/// Full delivery path through a single worker: ledger check, copy, record, ack.
fn bench_worker_delivery(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("worker_delivery");
    group.throughput(Throughput::Elements(1));

    group.bench_function("copy_processor", |b| {
        let queue = Arc::new(InMemoryJobQueue::new());
        let store = InMemoryObjectStore::arc();
        let pool = WorkerPool::new(
            queue.clone(),
            InMemoryLedger::arc(),
            store.clone(),
            RetryPolicy::default(),
            WorkerOptions {
                lease_wait: Duration::ZERO,
                ..WorkerOptions::default()
            },
        );
        let worker = pool.worker(Arc::new(FnProcessor::new(|job: Job, input: Bytes| async move {
            let out = ObjectKey::parse(format!("out/{}", job.id)).unwrap();
            Ok::<_, assetflow_infra::jobs::ProcessError>(Artifact::new(out, input))
        })));

        let mut i = 0usize;
        b.iter(|| {
            rt.block_on(async {
                let job = job(i);
                store.put(&job.object_key, Bytes::from_static(b"pixels")).await.unwrap();
                queue.enqueue(job).await.unwrap();
                black_box(worker.run_once().await.unwrap());
            });
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_lease_ack_cycle,
    bench_lease_with_backlog,
    bench_worker_delivery
);
criterion_main!(benches);
