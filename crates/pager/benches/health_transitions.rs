use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use pager::source::{StateFilter, WatchResponse};
use pager::{
    EngineOptions, HealthRecord, HealthStatus, MembershipSource, MemoryLock, Result, UserEvent,
    WatchEngine,
};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

struct IdleSource;

#[async_trait::async_trait]
impl MembershipSource for IdleSource {
    async fn watch_health(
        &self,
        _filter: StateFilter,
        _wait: Duration,
        since: u64,
    ) -> Result<WatchResponse<HealthRecord>> {
        Ok(WatchResponse::new(Vec::new(), since))
    }

    async fn watch_events(&self, _wait: Duration, since: u64) -> Result<WatchResponse<UserEvent>> {
        Ok(WatchResponse::new(Vec::new(), since))
    }
}

fn batch(size: usize, status: HealthStatus) -> Vec<HealthRecord> {
    (0..size)
        .map(|i| HealthRecord::new(format!("check-{i}"), status, "failing"))
        .collect()
}

fn health_batch_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_health");

    for size in [10, 100, 1000] {
        let failing = batch(size, HealthStatus::Critical);
        let passing = batch(size, HealthStatus::Passing);

        // Steady state: every record refreshes an existing immature alert
        group.bench_with_input(BenchmarkId::new("refresh", size), &failing, |b, records| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let engine = WatchEngine::new(
                Arc::new(MemoryLock::new()),
                Arc::new(IdleSource),
                EngineOptions::default().with_maturity("1h").unwrap(),
                None,
            );
            rt.block_on(engine.process_health(records));
            b.iter(|| rt.block_on(async { black_box(engine.process_health(records).await) }));
        });

        // Churn: create then clear every alert
        group.bench_with_input(
            BenchmarkId::new("create_clear", size),
            &(failing.clone(), passing),
            |b, (failing, passing)| {
                let rt = tokio::runtime::Runtime::new().unwrap();
                let engine = WatchEngine::new(
                    Arc::new(MemoryLock::new()),
                    Arc::new(IdleSource),
                    EngineOptions::default(),
                    None,
                );
                b.iter(|| {
                    rt.block_on(async {
                        engine.process_health(failing).await;
                        black_box(engine.process_health(passing).await)
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, health_batch_benchmark);
criterion_main!(benches);
