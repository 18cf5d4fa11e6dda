use async_trait::async_trait;
use cim_dispatch::{
    cache_key, Command, CommandBus, CommandEnvelope, CommandHandler, DispatchResult, EventStore,
    InMemoryEventStore, Query, QueryBus, QueryCriteria, QueryEnvelope, QueryHandler,
    RetryMiddleware, RetryPolicy, StoredEvent, TimingMiddleware, ValidationMiddleware,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, Serialize)]
enum BenchCommand {
    Touch { data: Vec<u8> },
}

impl Command for BenchCommand {
    fn kind(&self) -> &'static str {
        "Touch"
    }
}

#[derive(Debug, Clone, Serialize)]
enum BenchQuery {
    Fetch { key: u64 },
}

impl Query for BenchQuery {
    fn kind(&self) -> &'static str {
        "Fetch"
    }
}

struct TouchHandler;

#[async_trait]
impl CommandHandler<BenchCommand> for TouchHandler {
    fn handled_kind(&self) -> &'static str {
        "Touch"
    }

    async fn handle(&self, envelope: &CommandEnvelope<BenchCommand>) -> DispatchResult<Value> {
        let BenchCommand::Touch { data } = &envelope.command;
        Ok(json!({"bytes": data.len()}))
    }
}

struct FetchHandler;

#[async_trait]
impl QueryHandler<BenchQuery> for FetchHandler {
    fn handled_kind(&self) -> &'static str {
        "Fetch"
    }

    async fn handle(&self, envelope: &QueryEnvelope<BenchQuery>) -> DispatchResult<Value> {
        let BenchQuery::Fetch { key } = &envelope.query;
        Ok(json!({"key": key, "rows": ["a", "b", "c"]}))
    }
}

fn setup_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn benchmark_command_dispatch(c: &mut Criterion) {
    let rt = setup_runtime();

    let mut group = c.benchmark_group("command_dispatch");

    for middleware_count in [0usize, 3] {
        let bus = Arc::new(CommandBus::new());
        rt.block_on(async {
            bus.register(Arc::new(TouchHandler)).await;
            if middleware_count == 3 {
                bus.add_middleware(Arc::new(ValidationMiddleware)).await;
                bus.add_middleware(Arc::new(TimingMiddleware)).await;
                bus.add_middleware(Arc::new(RetryMiddleware::new(RetryPolicy::default())))
                    .await;
            }
        });

        group.bench_with_input(
            BenchmarkId::new("middleware", middleware_count),
            &middleware_count,
            |b, _| {
                b.iter(|| {
                    rt.block_on(async {
                        bus.execute(CommandEnvelope::new(BenchCommand::Touch {
                            data: vec![0u8; 256],
                        }))
                        .await
                        .unwrap()
                    })
                });
            },
        );
    }

    group.finish();
}

fn benchmark_query_dispatch(c: &mut Criterion) {
    let rt = setup_runtime();

    let bus = Arc::new(QueryBus::new());
    rt.block_on(async {
        bus.register(Arc::new(FetchHandler)).await;
        // Warm the entry the hit benchmark reuses
        bus.execute(QueryEnvelope::new(BenchQuery::Fetch { key: 1 }))
            .await
            .unwrap();
    });

    c.bench_function("query_dispatch_cache_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                bus.execute(QueryEnvelope::new(BenchQuery::Fetch { key: 1 }))
                    .await
                    .unwrap()
            })
        });
    });

    c.bench_function("query_dispatch_uncached", |b| {
        b.iter(|| {
            rt.block_on(async {
                bus.execute_with_cache(QueryEnvelope::new(BenchQuery::Fetch { key: 2 }), false)
                    .await
                    .unwrap()
            })
        });
    });
}

fn benchmark_event_store(c: &mut Criterion) {
    let rt = setup_runtime();

    let mut group = c.benchmark_group("event_store_append");

    for size in [100usize, 1_000, 10_000].iter() {
        let store = InMemoryEventStore::new();
        let version = AtomicI64::new(0);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let v = version.fetch_add(1, Ordering::Relaxed) + 1;
                rt.block_on(async {
                    store
                        .store_event(StoredEvent::new(
                            "BenchEvent",
                            "bench-agg",
                            v,
                            json!({"data": "x".repeat(size)}),
                        ))
                        .await
                        .unwrap()
                })
            });
        });
    }

    group.finish();

    // Replay over a populated aggregate
    let store = InMemoryEventStore::new();
    rt.block_on(async {
        for v in 1..=1_000 {
            store
                .store_event(StoredEvent::new("BenchEvent", "bench-agg", v, json!({"v": v})))
                .await
                .unwrap();
        }
    });

    c.bench_function("event_store_replay_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let events = store.get_events("bench-agg", 0).await.unwrap();
                black_box(events.len())
            })
        });
    });
}

fn benchmark_cache_key(c: &mut Criterion) {
    c.bench_function("cache_key_simple", |b| {
        let payload = json!({"key": 7});
        let criteria = QueryCriteria::new();
        b.iter(|| cache_key("Fetch", black_box(&payload), black_box(&criteria)));
    });

    c.bench_function("cache_key_complex", |b| {
        let payload = json!({"key": 7, "tags": ["a", "b", "c"], "nested": {"depth": 2}});
        let criteria = QueryCriteria::new()
            .with_filter("status", json!("active"))
            .with_filter("category", json!("electronics"))
            .with_limit(50)
            .with_offset(100)
            .with_order_by("created_at");
        b.iter(|| cache_key("Fetch", black_box(&payload), black_box(&criteria)));
    });
}

criterion_group!(
    benches,
    benchmark_command_dispatch,
    benchmark_query_dispatch,
    benchmark_event_store,
    benchmark_cache_key
);

criterion_main!(benches);
