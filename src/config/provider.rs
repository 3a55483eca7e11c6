//! Provider configuration

use crate::registry::{ProviderCapabilities, ProviderTier};
use serde::{Deserialize, Serialize};

/// One `[[providers]]` entry: an OpenAI-compatible upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub url: String,
    /// Model hints this provider serves (`"*"` for any)
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Model name sent upstream instead of the request's hint
    #[serde(default)]
    pub upstream_model: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub input_cost_per_1k: f64,
    #[serde(default)]
    pub output_cost_per_1k: f64,
    #[serde(default)]
    pub tier: ProviderTier,
}

fn default_models() -> Vec<String> {
    vec!["*".to_string()]
}

impl ProviderConfig {
    pub fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            models: self.models.clone(),
            input_cost_per_1k: self.input_cost_per_1k,
            output_cost_per_1k: self.output_cost_per_1k,
            tier: self.tier,
        }
    }

    /// API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}
