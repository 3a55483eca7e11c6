//! Provider and usage endpoint handlers.

use crate::api::AppState;
use crate::ledger::{ProviderUsage, TenantUsage};
use crate::registry::ProviderView;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// A provider with its accumulated spend.
#[derive(Debug, Serialize)]
pub struct ProviderEntry {
    #[serde(flatten)]
    pub view: ProviderView,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderEntry>,
}

/// GET /v1/providers - Registered providers in registration order.
pub async fn providers(State(state): State<Arc<AppState>>) -> Json<ProvidersResponse> {
    let usage = state.gateway.provider_usage();
    let providers = state
        .gateway
        .provider_health()
        .into_iter()
        .map(|view| {
            let usage = usage.iter().find(|u| u.provider_id == view.id).cloned();
            ProviderEntry { view, usage }
        })
        .collect();

    Json(ProvidersResponse { providers })
}

/// GET /v1/usage/:tenant - Rolling-window spend for one tenant.
pub async fn tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Json<TenantUsage> {
    Json(state.gateway.tenant_usage(&tenant))
}
