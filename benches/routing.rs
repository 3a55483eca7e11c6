//! Benchmarks for ranking latency with varying provider counts.
//!
//! Ranking sits on the miss path of every request, so it should stay well
//! under a millisecond even with dozens of providers.

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meridian::config::RoutingConfig;
use meridian::health::{HealthConfig, HealthTracker};
use meridian::provider::{Provider, ProviderError, ProviderResponse};
use meridian::registry::{ProviderCapabilities, ProviderRegistry, ProviderTier};
use meridian::request::{Message, Request, Requirements};
use meridian::routing::{BudgetPosture, Router};
use std::sync::Arc;

struct Idle(String);

#[async_trait]
impl Provider for Idle {
    fn id(&self) -> &str {
        &self.0
    }

    async fn call(&self, _request: &Request) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("benchmark provider".to_string()))
    }
}

fn create_router(provider_count: usize) -> Router {
    let mut registry = ProviderRegistry::new();
    for i in 0..provider_count {
        let capabilities = ProviderCapabilities {
            models: vec!["*".to_string()],
            input_cost_per_1k: 0.5 + (i % 7) as f64 * 0.25,
            output_cost_per_1k: 1.0 + (i % 5) as f64 * 0.5,
            tier: if i % 3 == 0 {
                ProviderTier::Cheap
            } else {
                ProviderTier::Standard
            },
        };
        registry
            .register(Arc::new(Idle(format!("provider-{}", i))), capabilities)
            .unwrap();
    }

    let registry = Arc::new(registry);
    let health = Arc::new(HealthTracker::new(
        Arc::clone(&registry),
        HealthConfig::default(),
    ));
    Router::new(registry, health, RoutingConfig::default())
}

fn request() -> Request {
    Request::new(
        "bench",
        "chat-model",
        vec![Message::user("Summarize the quarterly report in three bullet points")],
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Rank every provider; all of them serve the model.
fn bench_rank_by_provider_count(c: &mut Criterion) {
    let rt = runtime();
    let request = request();
    let mut group = c.benchmark_group("rank");

    for count in [1, 5, 10, 25, 50] {
        let router = create_router(count);
        group.bench_with_input(BenchmarkId::new("providers", count), &count, |b, _| {
            b.iter(|| {
                black_box(
                    rt.block_on(router.rank(&request, "key", BudgetPosture::WithinBudget))
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

/// Cheap-tier posture filters two thirds of providers before scoring.
fn bench_rank_cheap_tier_only(c: &mut Criterion) {
    let rt = runtime();
    let router = create_router(25);
    let request = request();

    c.bench_function("rank_cheap_tier_25_providers", |b| {
        b.iter(|| {
            black_box(
                rt.block_on(router.rank(&request, "key", BudgetPosture::CheapTierOnly))
                    .unwrap(),
            );
        });
    });
}

/// Cost ceiling excludes the pricier half of providers.
fn bench_rank_with_cost_ceiling(c: &mut Criterion) {
    let rt = runtime();
    let router = create_router(25);
    let mut request = request();
    request.requirements = Requirements {
        max_cost_usd: Some(0.025),
        ..Requirements::default()
    };

    c.bench_function("rank_cost_ceiling_25_providers", |b| {
        b.iter(|| {
            black_box(rt.block_on(router.rank(&request, "key", BudgetPosture::WithinBudget)))
        });
    });
}

criterion_group!(
    benches,
    bench_rank_by_provider_count,
    bench_rank_cheap_tier_only,
    bench_rank_with_cost_ceiling,
);
criterion_main!(benches);
