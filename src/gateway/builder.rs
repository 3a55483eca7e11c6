//! Gateway assembly.

use super::{BuildError, Gateway};
use crate::advisory::Advisor;
use crate::cache::SemanticCache;
use crate::config::GatewayConfig;
use crate::embedding::{Embedder, HttpEmbedder};
use crate::fingerprint::Fingerprinter;
use crate::health::HealthTracker;
use crate::ledger::UsageLedger;
use crate::orchestrator::{Orchestrator, SingleFlight};
use crate::provider::{HttpProvider, Provider};
use crate::registry::{ProviderCapabilities, ProviderRegistry};
use crate::routing::Router;
use crate::store::{FileStore, PersistentStore};
use std::sync::Arc;

/// Builds a [`Gateway`] from configuration plus injected collaborators.
///
/// Providers listed in `[[providers]]` are registered first, in file order,
/// as [`HttpProvider`]s; providers added with [`provider`](Self::provider)
/// follow. An injected embedder or store replaces the configured one.
pub struct GatewayBuilder {
    config: GatewayConfig,
    providers: Vec<(Arc<dyn Provider>, ProviderCapabilities)>,
    embedder: Option<Arc<dyn Embedder>>,
    advisor: Option<Arc<dyn Advisor>>,
    store: Option<Arc<dyn PersistentStore>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            embedder: None,
            advisor: None,
            store: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>, capabilities: ProviderCapabilities) -> Self {
        self.providers.push((provider, capabilities));
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and wire every component.
    ///
    /// # Errors
    ///
    /// Returns `BuildError` when the configuration is invalid, a provider id
    /// is registered twice, an HTTP client cannot be built, or the store
    /// directory cannot be opened.
    pub async fn build(self) -> Result<Gateway, BuildError> {
        let config = self.config;
        config.validate()?;

        let mut registry = ProviderRegistry::new();
        for provider_config in &config.providers {
            let provider = HttpProvider::new(
                provider_config.id.clone(),
                provider_config.url.clone(),
                provider_config.upstream_model.clone(),
                provider_config.api_key(),
                config.orchestrator.call_deadline(),
            )?;
            registry.register(Arc::new(provider), provider_config.capabilities())?;
        }
        for (provider, capabilities) in self.providers {
            registry.register(provider, capabilities)?;
        }
        if registry.is_empty() {
            tracing::warn!("No providers registered; every uncached request will fail");
        }
        let registry = Arc::new(registry);

        let embedder = match self.embedder {
            Some(embedder) => Some(embedder),
            None => match &config.embedding.url {
                Some(url) => Some(Arc::new(HttpEmbedder::new(
                    url.clone(),
                    config.embedding.model.clone(),
                    config.embedding.api_key(),
                    config.embedding.timeout(),
                )?) as Arc<dyn Embedder>),
                None => None,
            },
        };
        if embedder.is_none() {
            tracing::info!("No embedding service configured, caching on exact keys only");
        }
        let fingerprinter = Arc::new(Fingerprinter::new(embedder, config.embedding.timeout()));

        let store = match self.store {
            Some(store) => Some(store),
            None if config.store.enabled => {
                Some(Arc::new(FileStore::open(config.store.path.clone()).await?) as Arc<dyn PersistentStore>)
            }
            None => None,
        };

        let health = Arc::new(HealthTracker::new(
            Arc::clone(&registry),
            config.health.clone(),
        ));
        let cache = Arc::new(SemanticCache::new(config.cache.clone()));
        let ledger = Arc::new(UsageLedger::new(config.budget.clone()));

        let mut router = Router::new(
            Arc::clone(&registry),
            Arc::clone(&health),
            config.routing.clone(),
        );
        if let Some(advisor) = self.advisor {
            router = router.with_advisor(advisor);
        }

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&health),
            Arc::clone(&cache),
            Arc::clone(&ledger),
            config.orchestrator.clone(),
        ));
        let flights = SingleFlight::new(config.orchestrator.abandoned_flight_grace());

        tracing::info!(
            providers = registry.len(),
            semantic_cache = fingerprinter.has_embedder(),
            store = store.is_some(),
            "Gateway assembled"
        );

        Ok(Gateway {
            registry,
            health,
            cache,
            fingerprinter,
            router: Arc::new(router),
            orchestrator,
            ledger,
            flights,
            store,
            config,
        })
    }
}
