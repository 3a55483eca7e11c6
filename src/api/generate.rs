//! Generation endpoint handler.

use crate::api::{ApiError, AppState};
use crate::gateway::{GatewayResponse, ResponseSource};
use crate::request::Request;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

pub const PROVIDER_HEADER: &str = "x-meridian-provider";
pub const SOURCE_HEADER: &str = "x-meridian-source";
pub const COST_HEADER: &str = "x-meridian-cost-usd";

/// POST /v1/generate - Answer a request through the gateway.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Request>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(&e.body_text()))?;

    tracing::debug!(
        request_id = %request.id,
        tenant = %request.tenant,
        model = %request.model,
        "Generate request"
    );

    let response = state.gateway.handle(request).await?;
    let headers = response_headers(&response);
    Ok((headers, Json(response)).into_response())
}

fn response_headers(response: &GatewayResponse) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(&response.provider_id) {
        headers.insert(HeaderName::from_static(PROVIDER_HEADER), value);
    }

    let source = match response.source {
        ResponseSource::ExactCache => "exact-cache",
        ResponseSource::SemanticCache { .. } => "semantic-cache",
        ResponseSource::Upstream {
            coalesced: true, ..
        } => "coalesced",
        ResponseSource::Upstream { .. } => "upstream",
    };
    headers.insert(
        HeaderName::from_static(SOURCE_HEADER),
        HeaderValue::from_static(source),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", response.cost_usd)) {
        headers.insert(HeaderName::from_static(COST_HEADER), value);
    }

    headers
}
