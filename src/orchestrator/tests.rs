use super::*;
use crate::cache::CacheConfig;
use crate::config::{BudgetConfig, RoutingConfig};
use crate::fingerprint::exact_key;
use crate::health::{HealthConfig, ProviderStatus};
use crate::provider::Provider;
use crate::registry::{ProviderCapabilities, ProviderTier};
use crate::request::Message;
use crate::routing::decision::BudgetPosture;
use crate::routing::Router;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone)]
enum Behavior {
    Succeed,
    Fail(ProviderError),
    Slow(Duration),
}

struct Scripted {
    id: String,
    behavior: Behavior,
    calls: AtomicUsize,
    completed: AtomicBool,
}

impl Scripted {
    fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
            completed: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for Scripted {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, _request: &Request) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail(error) => return Err(error.clone()),
            Behavior::Slow(delay) => tokio::time::sleep(*delay).await,
        }
        self.completed.store(true, Ordering::SeqCst);
        Ok(ProviderResponse {
            content: format!("from {}", self.id),
            model: "gpt".to_string(),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
        })
    }
}

struct Harness {
    registry: Arc<ProviderRegistry>,
    cache: Arc<SemanticCache>,
    ledger: Arc<UsageLedger>,
    router: Router,
    orchestrator: Arc<Orchestrator>,
}

impl Harness {
    fn new(providers: &[Arc<Scripted>], config: OrchestratorConfig) -> Self {
        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry
                .register(
                    Arc::clone(provider) as Arc<dyn Provider>,
                    ProviderCapabilities {
                        models: vec!["*".to_string()],
                        input_cost_per_1k: 1.0,
                        output_cost_per_1k: 2.0,
                        tier: ProviderTier::Standard,
                    },
                )
                .unwrap();
        }
        let registry = Arc::new(registry);
        let health = Arc::new(HealthTracker::new(
            Arc::clone(&registry),
            HealthConfig::default(),
        ));
        let cache = Arc::new(SemanticCache::new(CacheConfig::default()));
        let ledger = Arc::new(UsageLedger::new(BudgetConfig::default()));
        let router = Router::new(
            Arc::clone(&registry),
            Arc::clone(&health),
            RoutingConfig::default(),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            health,
            Arc::clone(&cache),
            Arc::clone(&ledger),
            config,
        ));
        Self {
            registry,
            cache,
            ledger,
            router,
            orchestrator,
        }
    }

    async fn run(&self, request: &Request) -> Result<Completion, ExecutionError> {
        let fingerprint = Fingerprint::exact_only(exact_key(request), &request.model);
        let decision = self
            .router
            .rank(request, &fingerprint.exact_key, BudgetPosture::WithinBudget)
            .await
            .unwrap();
        self.orchestrator
            .execute(request, &fingerprint, &decision)
            .await
    }

    fn health(&self, id: &str) -> crate::health::HealthState {
        self.registry.get(id).unwrap().health_state()
    }

    fn cached_content(&self, request: &Request) -> Option<String> {
        self.cache
            .lookup(&Fingerprint::exact_only(exact_key(request), &request.model), None)
            .map(|hit| hit.entry.response.content.clone())
    }
}

fn request() -> Request {
    Request::new("acme", "gpt", vec![Message::user("What is the capital of France?")])
}

fn unavailable() -> ProviderError {
    ProviderError::Upstream {
        status: 503,
        message: "overloaded".to_string(),
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_falls_back_to_second_candidate() {
    let providers = [
        Scripted::new("p1", Behavior::Fail(unavailable())),
        Scripted::new("p2", Behavior::Succeed),
        Scripted::new("p3", Behavior::Succeed),
    ];
    let h = Harness::new(&providers, OrchestratorConfig::default());
    let req = request();

    let completion = h.run(&req).await.unwrap();

    assert_eq!(completion.provider_id, "p2");
    assert_eq!(completion.response.content, "from p2");
    assert_eq!(completion.attempts, 2);
    assert_eq!(completion.fallbacks.len(), 1);
    assert_eq!(completion.fallbacks[0].provider_id, "p1");
    assert_eq!(completion.fallbacks[0].kind, "upstream");
    assert!((completion.cost_usd - 0.2).abs() < 1e-9);
    assert_eq!(providers[2].calls(), 0);

    let p1 = h.health("p1");
    assert_eq!((p1.total_failures, p1.total_successes), (1, 0));
    let p2 = h.health("p2");
    assert_eq!((p2.total_failures, p2.total_successes), (0, 1));

    let usage = h.ledger.recent(10);
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].provider_id, "p2");
    assert_eq!(h.cached_content(&req).as_deref(), Some("from p2"));
}

#[tokio::test]
async fn test_non_retryable_failure_stops_walk() {
    let providers = [
        Scripted::new("p1", Behavior::Fail(ProviderError::Rejected("policy".into()))),
        Scripted::new("p2", Behavior::Succeed),
    ];
    let h = Harness::new(&providers, OrchestratorConfig::default());

    let err = h.run(&request()).await.unwrap_err();

    match err {
        ExecutionError::ProviderFailure {
            provider_id,
            error,
            attempts,
        } => {
            assert_eq!(provider_id, "p1");
            assert!(matches!(error, ProviderError::Rejected(_)));
            assert_eq!(attempts.len(), 1);
        }
        other => panic!("expected ProviderFailure, got {:?}", other),
    }
    assert_eq!(providers[1].calls(), 0);
}

#[tokio::test]
async fn test_attempts_bounded_by_max_attempts() {
    let providers = [
        Scripted::new("p1", Behavior::Fail(ProviderError::Network("reset".into()))),
        Scripted::new("p2", Behavior::Fail(ProviderError::Network("reset".into()))),
        Scripted::new("p3", Behavior::Succeed),
    ];
    let config = OrchestratorConfig {
        max_attempts: 2,
        ..Default::default()
    };
    let h = Harness::new(&providers, config);

    let err = h.run(&request()).await.unwrap_err();

    let ExecutionError::Exhausted { attempts } = err else {
        panic!("expected Exhausted");
    };
    let ids: Vec<_> = attempts.iter().map(|a| a.provider_id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2"]);
    assert_eq!(providers[2].calls(), 0);
    assert!(h.ledger.recent(10).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure_and_late_success_is_kept() {
    let providers = [
        Scripted::new("p1", Behavior::Slow(Duration::from_secs(2))),
        Scripted::new("p2", Behavior::Fail(unavailable())),
    ];
    let config = OrchestratorConfig {
        attempt_timeout_ms: 1_000,
        ..Default::default()
    };
    let h = Harness::new(&providers, config);
    let req = request();

    let err = h.run(&req).await.unwrap_err();
    let kinds: Vec<_> = err.attempts().iter().map(|a| a.kind.as_str()).collect();
    assert_eq!(kinds, vec!["timeout", "upstream"]);
    assert_eq!(h.health("p1").total_failures, 1);
    assert!(h.cached_content(&req).is_none());

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    // The late answer is cached and billed, but the timeout still stands
    assert_eq!(h.cached_content(&req).as_deref(), Some("from p1"));
    assert_eq!(h.ledger.recent(10).len(), 1);
    let p1 = h.health("p1");
    assert_eq!((p1.total_failures, p1.total_successes), (1, 0));
    assert!(p1.latency_ema_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_late_completion_abandoned_after_grace() {
    let providers = [Scripted::new("p1", Behavior::Slow(Duration::from_secs(10)))];
    let config = OrchestratorConfig {
        attempt_timeout_ms: 1_000,
        late_completion_grace_ms: 2_000,
        ..Default::default()
    };
    let h = Harness::new(&providers, config);

    assert!(h.run(&request()).await.is_err());
    tokio::time::sleep(Duration::from_secs(20)).await;
    settle().await;

    assert!(!providers[0].completed.load(Ordering::SeqCst));
    assert!(h.ledger.recent(10).is_empty());
}

#[tokio::test]
async fn test_billed_failure_recorded() {
    let incomplete = ProviderError::Incomplete {
        message: "length".to_string(),
        usage: TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        },
    };
    let providers = [
        Scripted::new("p1", Behavior::Fail(incomplete)),
        Scripted::new("p2", Behavior::Succeed),
    ];
    let h = Harness::new(&providers, OrchestratorConfig::default());

    h.run(&request()).await.unwrap();

    let usage = h.ledger.recent(10);
    assert_eq!(usage.len(), 2);
    assert!(usage[0].billed_failure);
    assert_eq!(usage[0].provider_id, "p1");
    assert!(!usage[1].billed_failure);
}

#[tokio::test]
async fn test_bypass_cache_skips_store() {
    let providers = [Scripted::new("p1", Behavior::Succeed)];
    let h = Harness::new(&providers, OrchestratorConfig::default());
    let mut req = request();
    req.bypass_cache = true;

    h.run(&req).await.unwrap();

    assert!(h.cache.is_empty());
    assert_eq!(h.ledger.recent(10).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_execution_aborts_call() {
    let providers = [Scripted::new("p1", Behavior::Slow(Duration::from_secs(60)))];
    let h = Harness::new(&providers, OrchestratorConfig::default());
    let req = request();
    let fingerprint = Fingerprint::exact_only(exact_key(&req), &req.model);
    let decision = h
        .router
        .rank(&req, &fingerprint.exact_key, BudgetPosture::WithinBudget)
        .await
        .unwrap();

    let orchestrator = Arc::clone(&h.orchestrator);
    let task = tokio::spawn(async move {
        orchestrator.execute(&req, &fingerprint, &decision).await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    task.abort();
    tokio::time::sleep(Duration::from_secs(120)).await;
    settle().await;

    assert_eq!(providers[0].calls(), 1);
    assert!(!providers[0].completed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_probe_after_cooldown_closes_circuit() {
    let providers = [Scripted::new("p1", Behavior::Succeed)];
    let h = Harness::new(&providers, OrchestratorConfig::default());
    {
        let mut health = h.registry.get("p1").unwrap().health();
        health.status = ProviderStatus::CircuitOpen;
        health.open_count = 1;
        health.circuit_open_until = Some(Instant::now() + Duration::from_secs(5));
    }
    tokio::time::advance(Duration::from_secs(6)).await;

    let completion = h.run(&request()).await.unwrap();

    assert_eq!(completion.provider_id, "p1");
    let p1 = h.health("p1");
    assert_eq!(p1.status, ProviderStatus::Healthy);
    assert_eq!(p1.circuit_open_until, None);
    assert_eq!(p1.probe_claimed_at, None);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_probe_releases_slot() {
    let providers = [Scripted::new("p1", Behavior::Slow(Duration::from_secs(60)))];
    let h = Harness::new(&providers, OrchestratorConfig::default());
    {
        let mut health = h.registry.get("p1").unwrap().health();
        health.status = ProviderStatus::CircuitOpen;
        health.open_count = 1;
        health.circuit_open_until = Some(Instant::now());
    }

    let attempt = tokio::time::timeout(Duration::from_millis(10), h.run(&request())).await;
    assert!(attempt.is_err());

    assert_eq!(h.health("p1").probe_claimed_at, None);
}
