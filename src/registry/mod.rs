//! Provider Registry module.
//!
//! An arena of provider records built at startup. Records are never removed
//! while the gateway runs; each carries its own health lock.

mod error;
mod provider;

pub use error::*;
pub use provider::*;

use crate::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// The Provider Registry stores all configured providers.
///
/// Iteration follows registration order; lookup by id is O(1).
///
/// # Examples
///
/// ```
/// use meridian::registry::{ProviderCapabilities, ProviderRegistry, ProviderTier};
/// use meridian::provider::HttpProvider;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let mut registry = ProviderRegistry::new();
/// let provider = HttpProvider::new(
///     "openai",
///     "https://api.openai.com",
///     None,
///     None,
///     Duration::from_secs(30),
/// )
/// .unwrap();
/// let capabilities = ProviderCapabilities {
///     models: vec!["gpt-4o-mini".to_string()],
///     input_cost_per_1k: 0.00015,
///     output_cost_per_1k: 0.0006,
///     tier: ProviderTier::Cheap,
/// };
///
/// registry.register(Arc::new(provider), capabilities).unwrap();
/// assert_eq!(registry.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    records: Vec<Arc<ProviderRecord>>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own id.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateProvider` if the id is taken and
    /// `RegistryError::NoModels` if the capability list is empty.
    pub fn register(
        &mut self,
        provider: Arc<dyn Provider>,
        capabilities: ProviderCapabilities,
    ) -> Result<Arc<ProviderRecord>, RegistryError> {
        let id = provider.id().to_string();

        if self.index.contains_key(&id) {
            return Err(RegistryError::DuplicateProvider(id));
        }
        if capabilities.models.is_empty() {
            return Err(RegistryError::NoModels(id));
        }

        let order = self.records.len();
        let record = Arc::new(ProviderRecord::new(
            id.clone(),
            capabilities,
            provider,
            order,
        ));
        self.index.insert(id.clone(), order);
        self.records.push(Arc::clone(&record));

        tracing::debug!(provider_id = %id, order, "Registered provider");
        Ok(record)
    }

    /// Get a provider record by id.
    pub fn get(&self, id: &str) -> Option<&Arc<ProviderRecord>> {
        self.index.get(id).map(|&idx| &self.records[idx])
    }

    /// Get a provider record by id or fail.
    pub fn require(&self, id: &str) -> Result<&Arc<ProviderRecord>, RegistryError> {
        self.get(id)
            .ok_or_else(|| RegistryError::ProviderNotFound(id.to_string()))
    }

    /// All records in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderRecord>> {
        self.records.iter()
    }

    /// Records that support a model, in registration order.
    pub fn supporting(&self, model: &str) -> impl Iterator<Item = &Arc<ProviderRecord>> {
        let model = model.to_string();
        self.records
            .iter()
            .filter(move |r| r.capabilities.supports_model(&model))
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot views of every provider.
    pub fn views(&self) -> Vec<ProviderView> {
        let now = Instant::now();
        self.records.iter().map(|r| r.view(now)).collect()
    }
}
