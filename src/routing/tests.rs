use super::*;
use crate::advisory::Recommendation;
use crate::health::HealthConfig;
use crate::provider::{Provider, ProviderError, ProviderResponse};
use crate::registry::ProviderCapabilities;
use crate::request::{GenerationParams, Message, Requirements, TokenUsage};
use async_trait::async_trait;

struct Noop(String);

#[async_trait]
impl Provider for Noop {
    fn id(&self) -> &str {
        &self.0
    }

    async fn call(&self, _request: &Request) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            content: String::new(),
            model: String::new(),
            usage: TokenUsage::default(),
        })
    }
}

struct Listing {
    id: &'static str,
    models: &'static [&'static str],
    input: f64,
    output: f64,
    tier: ProviderTier,
}

fn listing(id: &'static str, input: f64, output: f64) -> Listing {
    Listing {
        id,
        models: &["gpt"],
        input,
        output,
        tier: ProviderTier::Standard,
    }
}

fn build(listings: Vec<Listing>) -> (Arc<ProviderRegistry>, Arc<HealthTracker>) {
    let mut registry = ProviderRegistry::new();
    for s in listings {
        registry
            .register(
                Arc::new(Noop(s.id.to_string())),
                ProviderCapabilities {
                    models: s.models.iter().map(|m| m.to_string()).collect(),
                    input_cost_per_1k: s.input,
                    output_cost_per_1k: s.output,
                    tier: s.tier,
                },
            )
            .unwrap();
    }
    let registry = Arc::new(registry);
    let health = Arc::new(HealthTracker::new(
        Arc::clone(&registry),
        HealthConfig::default(),
    ));
    (registry, health)
}

fn router(listings: Vec<Listing>) -> (Router, Arc<ProviderRegistry>, Arc<HealthTracker>) {
    let (registry, health) = build(listings);
    let router = Router::new(
        Arc::clone(&registry),
        Arc::clone(&health),
        RoutingConfig::default(),
    );
    (router, registry, health)
}

fn request() -> Request {
    // 400 chars -> 100 input tokens
    Request::new("acme", "gpt", vec![Message::user("x".repeat(400))])
}

struct FixedAdvisor(Result<Recommendation, AdvisoryError>);

#[async_trait]
impl Advisor for FixedAdvisor {
    async fn recommend(
        &self,
        _request: &Request,
        _candidates: &[String],
    ) -> Result<Recommendation, AdvisoryError> {
        self.0.clone()
    }
}

struct SlowAdvisor;

#[async_trait]
impl Advisor for SlowAdvisor {
    async fn recommend(
        &self,
        _request: &Request,
        candidates: &[String],
    ) -> Result<Recommendation, AdvisoryError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(Recommendation {
            provider_id: candidates[0].clone(),
            confidence: 1.0,
        })
    }
}

#[tokio::test]
async fn ranks_cheaper_provider_first_when_equally_healthy() {
    let (router, _, _) = router(vec![
        listing("pricey", 10.0, 30.0),
        listing("cheap", 0.5, 1.5),
        listing("mid", 3.0, 6.0),
    ]);

    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    assert_eq!(decision.provider_ids(), vec!["cheap", "mid", "pricey"]);
    assert_eq!(decision.advisory, AdvisoryOutcome::NotConsulted);
    assert!(decision.excluded.is_empty());
}

#[tokio::test]
async fn ties_break_by_registration_order() {
    let (router, _, _) = router(vec![
        listing("b", 1.0, 1.0),
        listing("a", 1.0, 1.0),
        listing("c", 1.0, 1.0),
    ]);

    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    assert_eq!(decision.provider_ids(), vec!["b", "a", "c"]);
}

#[tokio::test]
async fn ties_break_by_lower_error_rate_before_order() {
    let (router, registry, _) = router(vec![listing("first", 1.0, 1.0), listing("second", 1.0, 1.0)]);
    // Same health score, different error rates: latency compensates exactly
    {
        let mut h = registry.get("first").unwrap().health();
        h.error_rate = 0.2;
        h.latency_ema_ms = None;
    }
    {
        let mut h = registry.get("second").unwrap().health();
        h.error_rate = 0.0;
        // 1/(1+l/10000) = 0.8  =>  l = 2500
        h.latency_ema_ms = Some(2_500.0);
    }

    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    let c = &decision.candidates;
    assert!((c[0].score - c[1].score).abs() < 1e-12);
    assert_eq!(decision.provider_ids(), vec!["second", "first"]);
}

#[tokio::test]
async fn excludes_unsupported_models() {
    let (router, _, _) = router(vec![
        Listing {
            id: "other",
            models: &["claude"],
            input: 0.1,
            output: 0.1,
            tier: ProviderTier::Standard,
        },
        Listing {
            id: "any",
            models: &["*"],
            input: 1.0,
            output: 1.0,
            tier: ProviderTier::Standard,
        },
    ]);

    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    assert_eq!(decision.provider_ids(), vec!["any"]);
    assert_eq!(decision.excluded.len(), 1);
    assert_eq!(decision.excluded[0].reason, ExclusionReason::ModelUnsupported);
}

#[tokio::test]
async fn never_selects_provider_over_max_cost() {
    // "pricey" would win on every other axis
    let (router, registry, _) = router(vec![listing("pricey", 100.0, 100.0), listing("ok", 1.0, 1.0)]);
    {
        let mut h = registry.get("ok").unwrap().health();
        h.error_rate = 0.4;
        h.latency_ema_ms = Some(9_000.0);
    }

    let req = request().with_requirements(Requirements {
        max_cost_usd: Some(0.5),
        max_latency_ms: None,
    });
    let decision = router
        .rank(&req, "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();

    assert_eq!(decision.provider_ids(), vec!["ok"]);
    assert!(matches!(
        decision.excluded[0].reason,
        ExclusionReason::CostExceedsLimit { .. }
    ));
    assert!(decision.candidates[0].estimated_cost_usd <= 0.5);
}

#[tokio::test]
async fn max_cost_uses_declared_max_tokens() {
    let (router, _, _) = router(vec![listing("p", 0.0, 10.0)]);

    // 2000 output tokens at $10 per 1k
    let req = request()
        .with_params(GenerationParams {
            max_tokens: Some(2_000),
            ..Default::default()
        })
        .with_requirements(Requirements {
            max_cost_usd: Some(0.1),
            max_latency_ms: None,
        });
    let err = router
        .rank(&req, "k", BudgetPosture::WithinBudget)
        .await
        .unwrap_err();
    let RoutingError::NoEligibleProvider { model, excluded } = err;
    assert_eq!(model, "gpt");
    assert_eq!(excluded.len(), 1);
}

#[tokio::test]
async fn excludes_known_slow_providers_for_latency_limit() {
    let (router, registry, _) = router(vec![listing("slow", 1.0, 1.0), listing("fresh", 1.0, 1.0)]);
    registry.get("slow").unwrap().health().latency_ema_ms = Some(4_000.0);

    let req = request().with_requirements(Requirements {
        max_cost_usd: None,
        max_latency_ms: Some(1_000),
    });
    let decision = router
        .rank(&req, "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    // Unknown latency is not excluded
    assert_eq!(decision.provider_ids(), vec!["fresh"]);
}

#[tokio::test(start_paused = true)]
async fn excludes_open_circuit_until_cooldown() {
    let (router, registry, health) = router(vec![listing("a", 1.0, 1.0), listing("b", 2.0, 2.0)]);
    let a = Arc::clone(registry.get("a").unwrap());
    for _ in 0..3 {
        health.record_failure(&a, &ProviderError::Timeout(1), None, false);
    }

    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    assert_eq!(decision.provider_ids(), vec!["b"]);
    assert_eq!(decision.excluded[0].reason, ExclusionReason::CircuitOpen);

    tokio::time::advance(Duration::from_secs(5)).await;
    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    // Cooled-down circuit is ranked as a probe with zero health
    assert_eq!(decision.provider_ids(), vec!["b", "a"]);
    assert!(decision.candidates[1].probe);
    assert_eq!(decision.candidates[1].breakdown.health, 0.0);
}

#[tokio::test]
async fn cheap_tier_only_posture() {
    let (router, _, _) = router(vec![
        listing("standard", 0.1, 0.1),
        Listing {
            id: "budget",
            models: &["gpt"],
            input: 1.0,
            output: 1.0,
            tier: ProviderTier::Cheap,
        },
    ]);

    let decision = router
        .rank(&request(), "k", BudgetPosture::CheapTierOnly)
        .await
        .unwrap();
    assert_eq!(decision.provider_ids(), vec!["budget"]);
    assert_eq!(decision.excluded[0].reason, ExclusionReason::OutsideBudgetTier);
    assert_eq!(decision.posture, BudgetPosture::CheapTierOnly);
}

#[tokio::test]
async fn no_eligible_provider_lists_every_exclusion() {
    let (router, _, _) = router(vec![listing("a", 1.0, 1.0), listing("b", 1.0, 1.0)]);
    let req = Request::new("acme", "unknown-model", vec![Message::user("hi")]);

    let err = router
        .rank(&req, "k", BudgetPosture::WithinBudget)
        .await
        .unwrap_err();
    let RoutingError::NoEligibleProvider { excluded, .. } = err;
    assert_eq!(excluded.len(), 2);
}

#[tokio::test]
async fn confident_advice_reorders_candidates() {
    let (registry, health) = build(vec![listing("cheap", 1.0, 1.0), listing("smart", 1.2, 1.2)]);
    let router = Router::new(registry, health, RoutingConfig::default()).with_advisor(Arc::new(
        FixedAdvisor(Ok(Recommendation {
            provider_id: "smart".to_string(),
            confidence: 0.9,
        })),
    ));

    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    assert_eq!(decision.provider_ids(), vec!["smart", "cheap"]);
    assert_eq!(decision.advisory.applied(), Some(("smart", 0.9)));
    assert_eq!(decision.candidates[0].breakdown.quality, 0.9);
}

#[tokio::test]
async fn low_confidence_advice_is_ignored() {
    let (registry, health) = build(vec![listing("cheap", 1.0, 1.0), listing("smart", 1.2, 1.2)]);
    let router = Router::new(registry, health, RoutingConfig::default()).with_advisor(Arc::new(
        FixedAdvisor(Ok(Recommendation {
            provider_id: "smart".to_string(),
            confidence: 0.3,
        })),
    ));

    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    assert_eq!(decision.provider_ids(), vec!["cheap", "smart"]);
    assert!(matches!(
        decision.advisory,
        AdvisoryOutcome::LowConfidence { .. }
    ));
}

#[tokio::test]
async fn failing_or_unknown_advice_falls_back() {
    for result in [
        Err(AdvisoryError::Unavailable("down".to_string())),
        Ok(Recommendation {
            provider_id: "ghost".to_string(),
            confidence: 1.0,
        }),
    ] {
        let (registry, health) = build(vec![listing("cheap", 1.0, 1.0), listing("smart", 1.2, 1.2)]);
        let router = Router::new(registry, health, RoutingConfig::default())
            .with_advisor(Arc::new(FixedAdvisor(result)));

        let decision = router
            .rank(&request(), "k", BudgetPosture::WithinBudget)
            .await
            .unwrap();
        assert_eq!(decision.provider_ids(), vec!["cheap", "smart"]);
        assert!(matches!(
            decision.advisory,
            AdvisoryOutcome::Unavailable { .. }
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn slow_advisor_times_out() {
    let (registry, health) = build(vec![listing("cheap", 1.0, 1.0), listing("smart", 1.2, 1.2)]);
    let router =
        Router::new(registry, health, RoutingConfig::default()).with_advisor(Arc::new(SlowAdvisor));

    let started = Instant::now();
    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(
        decision.advisory,
        AdvisoryOutcome::Unavailable {
            reason: AdvisoryError::Timeout(150).to_string()
        }
    );
}

#[tokio::test]
async fn single_candidate_skips_advisor() {
    let (registry, health) = build(vec![listing("only", 1.0, 1.0)]);
    let router = Router::new(registry, health, RoutingConfig::default())
        .with_advisor(Arc::new(SlowAdvisor));

    let decision = router
        .rank(&request(), "k", BudgetPosture::WithinBudget)
        .await
        .unwrap();
    assert_eq!(decision.advisory, AdvisoryOutcome::NotConsulted);
}

#[test]
fn estimated_output_tokens_uses_ratio() {
    let (router, _, _) = router(vec![listing("p", 1.0, 1.0)]);
    assert_eq!(router.estimated_output_tokens(&request()), 50);

    let req = request().with_params(GenerationParams {
        max_tokens: Some(7),
        ..Default::default()
    });
    assert_eq!(router.estimated_output_tokens(&req), 7);
}
