use async_trait::async_trait;
use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use quota_pipeline::pipeline::{Pipeline, PipelineConfig};
use quota_pipeline::server::store::{BucketType, MemoryStore};
use quota_pipeline_core::{
    BucketState, Method, QuotaStore, Request, StatusQuery, StatusResult, StoreError,
};
use std::sync::Arc;
use tokio::runtime::Builder;

/// Store that answers immediately, so the bench measures pipeline overhead.
struct InstantStore;

#[async_trait]
impl QuotaStore for InstantStore {
    async fn take(&self, _request: &Request) -> Result<BucketState, StoreError> {
        Ok(BucketState {
            conformant: Some(true),
            ..BucketState::default()
        })
    }

    async fn wait(&self, request: &Request) -> Result<BucketState, StoreError> {
        self.take(request).await
    }

    async fn put(&self, _request: &Request) -> Result<BucketState, StoreError> {
        Ok(BucketState::default())
    }

    async fn get(&self, _request: &Request) -> Result<BucketState, StoreError> {
        Ok(BucketState::default())
    }

    async fn status(&self, _query: &StatusQuery) -> Result<StatusResult, StoreError> {
        Ok(StatusResult::default())
    }
}

#[derive(Clone, Copy, Debug)]
struct PipelineBenchParams {
    requests: u64,
    batch_size: u64,
    output_buffer: usize,
}

async fn round_trip<S: QuotaStore>(store: Arc<S>, params: PipelineBenchParams) {
    let config = PipelineConfig {
        output_buffer: params.output_buffer,
        ..PipelineConfig::default()
    };
    let (handle, mut responses) = Pipeline::new(store, config).spawn();

    let submitter = tokio::spawn(async move {
        let mut id = 0;
        while id < params.requests {
            let batch = (id..(id + params.batch_size).min(params.requests))
                .map(|id| Request::new(id, Method::Take, "ip", format!("10.0.0.{}", id % 256)))
                .collect::<Vec<_>>();
            id += batch.len() as u64;
            handle.submit_batch(batch).await.unwrap();
        }
        handle.shutdown().await.unwrap();
    });

    let mut received = 0;
    while let Some(delivery) = responses.recv().await {
        black_box(delivery);
        received += 1;
    }
    submitter.await.unwrap();
    assert_eq!(received, params.requests);
}

fn pipeline_bench(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();

    let params = [
        PipelineBenchParams {
            requests: 10_000,
            batch_size: 1,
            output_buffer: 50,
        },
        PipelineBenchParams {
            requests: 10_000,
            batch_size: 100,
            output_buffer: 50,
        },
        PipelineBenchParams {
            requests: 10_000,
            batch_size: 100,
            output_buffer: 1,
        },
    ];

    let mut group = c.benchmark_group("pipeline/instant_store");
    for p in params {
        group.throughput(Throughput::Elements(p.requests));
        let id = format!("batch={}/out={}", p.batch_size, p.output_buffer);
        group.bench_function(id, |b| {
            b.to_async(&rt)
                .iter(|| round_trip(Arc::new(InstantStore), black_box(p)));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("pipeline/memory_store");
    let p = PipelineBenchParams {
        requests: 10_000,
        batch_size: 100,
        output_buffer: 50,
    };
    group.throughput(Throughput::Elements(p.requests));
    group.bench_function("take", |b| {
        b.to_async(&rt).iter(|| {
            let store = MemoryStore::new([BucketType {
                name: "ip".to_string(),
                size: 1_000,
                per_second: 100.0,
            }]);
            round_trip(Arc::new(store), black_box(p))
        });
    });
    group.finish();
}

criterion_group!(benches, pipeline_bench);
criterion_main!(benches);
