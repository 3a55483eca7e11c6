//! # HTTP API
//!
//! Thin axum surface over [`Gateway`](crate::gateway::Gateway).
//!
//! ## Endpoints
//!
//! - `POST /v1/generate` - Answer a request (cache, route, execute)
//! - `GET /health` - Aggregate and per-provider health
//! - `GET /v1/providers` - Registered providers with health and spend
//! - `GET /v1/usage/:tenant` - Rolling-window spend for a tenant
//!
//! ## Example
//!
//! ```no_run
//! use meridian::api::{create_router, AppState};
//! use meridian::config::GatewayConfig;
//! use meridian::gateway::GatewayBuilder;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::default();
//! let gateway = Arc::new(GatewayBuilder::new(config.clone()).build().await?);
//! let app = create_router(Arc::new(AppState::new(gateway)), &config.server);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All errors are returned in OpenAI-compatible format:
//! ```json
//! {
//!   "error": {
//!     "message": "tenant acme is over budget (spent $10.0000 of $10.0000)",
//!     "type": "insufficient_quota",
//!     "code": "budget_exceeded",
//!     "details": { "spent_usd": 10.0, "cap_usd": 10.0 }
//!   }
//! }
//! ```

mod error;
mod generate;
mod health;
mod usage;

pub use error::{ApiError, ApiErrorBody};
pub use generate::{COST_HEADER, PROVIDER_HEADER, SOURCE_HEADER};
pub use health::{HealthResponse, ProviderCounts};
pub use usage::{ProviderEntry, ProvidersResponse};

use crate::config::ServerConfig;
use crate::gateway::Gateway;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Server startup time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            start_time: Instant::now(),
        }
    }
}

/// Create the API router with all endpoints configured.
pub fn create_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/v1/generate", post(generate::handle))
        .route("/v1/providers", get(usage::providers))
        .route("/v1/usage/:tenant", get(usage::tenant))
        .route("/health", get(health::handle))
        .layer(RequestBodyLimitLayer::new(server.body_limit_bytes))
        .layer(GlobalConcurrencyLimitLayer::new(server.max_concurrent_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
