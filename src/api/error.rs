//! API error envelope.
//!
//! Errors use the OpenAI shape (`{"error": {message, type, param, code}}`)
//! so existing client libraries surface them sensibly. Gateway failures add
//! a `details` object carrying the per-provider attempt list or exclusions.

use crate::gateway::GatewayError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// API error response in OpenAI format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    pub error: ApiErrorBody,
}

/// Error details.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiErrorBody {
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn new(message: impl Into<String>, r#type: &str, code: &str) -> Self {
        Self {
            error: ApiErrorBody {
                message: message.into(),
                r#type: r#type.to_string(),
                param: None,
                code: Some(code.to_string()),
                details: None,
            },
        }
    }

    fn with_details(mut self, details: impl Serialize) -> Self {
        self.error.details = serde_json::to_value(details).ok();
        self
    }

    /// Create a bad request error (400).
    pub fn bad_request(message: &str) -> Self {
        Self::new(message, "invalid_request_error", "invalid_request_error")
    }

    /// Create a budget error (429).
    pub fn budget_exceeded(message: &str) -> Self {
        Self::new(message, "insufficient_quota", "budget_exceeded")
    }

    /// Create a bad gateway error (502).
    pub fn bad_gateway(message: &str) -> Self {
        Self::new(message, "server_error", "bad_gateway")
    }

    /// Create a service unavailable error (503).
    pub fn service_unavailable(message: &str) -> Self {
        Self::new(message, "server_error", "service_unavailable")
    }

    /// Create a gateway timeout error (504).
    pub fn gateway_timeout(message: &str) -> Self {
        Self::new(message, "server_error", "gateway_timeout")
    }

    /// Create a not found error (404).
    pub fn not_found(message: &str) -> Self {
        Self::new(message, "invalid_request_error", "not_found")
    }

    /// Get the HTTP status code for this error.
    fn status_code(&self) -> StatusCode {
        match self.error.code.as_deref() {
            Some("invalid_request_error") => StatusCode::BAD_REQUEST,
            Some("not_found") => StatusCode::NOT_FOUND,
            Some("budget_exceeded") => StatusCode::TOO_MANY_REQUESTS,
            Some("bad_gateway") => StatusCode::BAD_GATEWAY,
            Some("gateway_timeout") => StatusCode::GATEWAY_TIMEOUT,
            Some("service_unavailable") => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let message = e.to_string();
        match e {
            GatewayError::InvalidRequest(_) => Self::bad_request(&message),
            GatewayError::BudgetExceeded {
                spent_usd, cap_usd, ..
            } => Self::budget_exceeded(&message).with_details(serde_json::json!({
                "spent_usd": spent_usd,
                "cap_usd": cap_usd,
            })),
            GatewayError::AllProvidersExhausted { attempts } => {
                Self::bad_gateway(&message).with_details(serde_json::json!({
                    "attempts": attempts,
                }))
            }
            GatewayError::ProviderFailure { attempts, .. } => {
                Self::bad_gateway(&message).with_details(serde_json::json!({
                    "attempts": attempts,
                }))
            }
            GatewayError::NoEligibleProvider { excluded, .. } => {
                Self::service_unavailable(&message).with_details(serde_json::json!({
                    "excluded": excluded,
                }))
            }
            GatewayError::Timeout(_) => Self::gateway_timeout(&message),
            GatewayError::Cancelled => Self::service_unavailable(&message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}
