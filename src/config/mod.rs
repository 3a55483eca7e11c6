//! Configuration module for Meridian
//!
//! Provides layered configuration loading from files, environment variables, and defaults.
//!
//! # Configuration Precedence
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`MERIDIAN_*`)
//! 3. Configuration file (TOML)
//! 4. Default values (lowest priority)
//!
//! # Example
//!
//! ```rust
//! use meridian::config::GatewayConfig;
//!
//! let config = GatewayConfig::default();
//! assert_eq!(config.server.port, 8000);
//! assert_eq!(config.cache.similarity_threshold, 0.95);
//!
//! let toml = r#"
//! [cache]
//! similarity_threshold = 0.9
//!
//! [[providers]]
//! id = "primary"
//! url = "http://localhost:8080"
//! "#;
//! let config: GatewayConfig = toml::from_str(toml).unwrap();
//! assert_eq!(config.cache.similarity_threshold, 0.9);
//! assert_eq!(config.providers.len(), 1);
//! ```

pub mod budget;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod provider;
pub mod routing;
pub mod server;
pub mod store;

pub use budget::{BudgetConfig, OverBudgetAction};
pub use embedding::EmbeddingConfig;
pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use provider::ProviderConfig;
pub use routing::{RoutingConfig, RoutingWeights};
pub use server::ServerConfig;
pub use store::StoreConfig;

// Component-owned sections
pub use crate::cache::CacheConfig;
pub use crate::health::HealthConfig;
pub use crate::orchestrator::OrchestratorConfig;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Unified configuration for the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub embedding: EmbeddingConfig,
    pub health: HealthConfig,
    pub routing: RoutingConfig,
    pub budget: BudgetConfig,
    pub orchestrator: OrchestratorConfig,
    pub store: StoreConfig,
    /// Upstream providers in registration (tie-break) order
    pub providers: Vec<ProviderConfig>,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    ///
    /// If path is None, returns default configuration.
    /// If path doesn't exist, returns NotFound error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Invalid values are ignored and the previous value is kept.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("MERIDIAN_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(host) = std::env::var("MERIDIAN_HOST") {
            self.server.host = host;
        }

        if let Ok(level) = std::env::var("MERIDIAN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("MERIDIAN_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }

        if let Ok(threshold) = std::env::var("MERIDIAN_CACHE_THRESHOLD") {
            if let Ok(t) = threshold.parse() {
                self.cache.similarity_threshold = t;
            }
        }
        if let Ok(attempts) = std::env::var("MERIDIAN_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.orchestrator.max_attempts = n;
            }
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::validation("server.port", "port must be non-zero"));
        }

        self.cache
            .validate()
            .map_err(|m| ConfigError::validation("cache", m))?;
        self.health
            .validate()
            .map_err(|m| ConfigError::validation("health", m))?;
        self.routing
            .validate()
            .map_err(|m| ConfigError::validation("routing", m))?;
        self.budget
            .validate()
            .map_err(|m| ConfigError::validation("budget", m))?;
        self.orchestrator
            .validate()
            .map_err(|m| ConfigError::validation("orchestrator", m))?;

        if let Some(url) = &self.embedding.url {
            if url.trim().is_empty() {
                return Err(ConfigError::validation(
                    "embedding.url",
                    "URL cannot be empty when set",
                ));
            }
        }
        if self.embedding.timeout_ms == 0 {
            return Err(ConfigError::validation(
                "embedding.timeout_ms",
                "timeout must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.id.trim().is_empty() {
                return Err(ConfigError::validation(
                    format!("providers[{}].id", i),
                    "id cannot be empty",
                ));
            }
            if provider.url.trim().is_empty() {
                return Err(ConfigError::validation(
                    format!("providers[{}].url", i),
                    "URL cannot be empty",
                ));
            }
            if provider.models.is_empty() {
                return Err(ConfigError::validation(
                    format!("providers[{}].models", i),
                    "at least one model is required",
                ));
            }
            let costs = [provider.input_cost_per_1k, provider.output_cost_per_1k];
            if costs.iter().any(|c| c.is_nan() || *c < 0.0) {
                return Err(ConfigError::validation(
                    format!("providers[{}]", i),
                    "costs must be >= 0.0",
                ));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(ConfigError::validation(
                    format!("providers[{}].id", i),
                    format!("duplicate provider id '{}'", provider.id),
                ));
            }
        }

        Ok(())
    }
}
