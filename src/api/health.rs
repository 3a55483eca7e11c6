//! Health check endpoint handler.

use crate::api::AppState;
use crate::cache::CacheStats;
use crate::health::ProviderStatus;
use crate::registry::ProviderView;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub providers: ProviderCounts,
    pub cache: CacheStats,
    pub in_flight: usize,
    pub details: Vec<ProviderView>,
}

/// Provider status counts.
#[derive(Debug, Default, Serialize)]
pub struct ProviderCounts {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub circuit_open: usize,
}

impl ProviderCounts {
    fn tally(views: &[ProviderView]) -> Self {
        let mut counts = Self {
            total: views.len(),
            ..Self::default()
        };
        for view in views {
            match view.health.status {
                ProviderStatus::Healthy => counts.healthy += 1,
                ProviderStatus::Degraded => counts.degraded += 1,
                ProviderStatus::CircuitOpen => counts.circuit_open += 1,
            }
        }
        counts
    }

    fn overall(&self) -> &'static str {
        match (self.healthy, self.degraded, self.total) {
            (h, _, t) if h == t && t > 0 => "healthy",
            (h, d, _) if h + d > 0 => "degraded",
            _ => "unhealthy",
        }
    }
}

/// GET /health - Aggregate and per-provider health.
pub async fn handle(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let details = state.gateway.provider_health();
    let providers = ProviderCounts::tally(&details);

    Json(HealthResponse {
        status: providers.overall().to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        providers,
        cache: state.gateway.cache_stats(),
        in_flight: state.gateway.in_flight(),
        details,
    })
}
