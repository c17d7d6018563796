//! Embedding orchestrator (C5): provider registry, token-aware batching,
//! adaptive concurrency, and the ICL context cache.

pub mod adaptive;
pub mod batcher;
pub mod icl;
pub mod provider;
pub mod providers;

use std::collections::HashMap;
use std::sync::Arc;

use crate::embedding::provider::EmbeddingProvider;
use crate::error::{Result, SearchError};

/// Holds every configured provider by name, so the indexing coordinator
/// and MCP/HTTP query handlers can resolve `provider?: string` /
/// `model?: string` arguments to a concrete [`EmbeddingProvider`].
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn EmbeddingProvider>, make_default: bool) {
        let name = name.into();
        if make_default || self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn EmbeddingProvider>> {
        let name = name
            .map(str::to_string)
            .or_else(|| self.default_provider.clone())
            .ok_or_else(|| SearchError::configuration("no embedding provider configured"))?;
        self.providers
            .get(&name)
            .cloned()
            .ok_or_else(|| SearchError::configuration(format!("unknown embedding provider '{name}'")))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::{DistanceMetric, ProviderCapabilities};
    use async_trait::async_trait;

    struct Stub;

    #[async_trait]
    impl EmbeddingProvider for Stub {
        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                name: "stub".into(),
                model: "stub-model".into(),
                dims: Some(4),
                distance_metric: DistanceMetric::Cosine,
                max_batch_items: 10,
                max_tokens_per_request: None,
                has_tokenizer: false,
                supports_adaptive_batching: false,
            }
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }
    }

    #[test]
    fn first_registered_provider_becomes_default() {
        let mut registry = ProviderRegistry::new();
        registry.register("stub", Arc::new(Stub), false);
        assert!(registry.get(None).is_ok());
        assert!(registry.get(Some("stub")).is_ok());
        assert!(registry.get(Some("missing")).is_err());
    }

    #[test]
    fn empty_registry_has_no_default() {
        let registry = ProviderRegistry::new();
        assert!(registry.get(None).is_err());
        assert!(registry.is_empty());
    }
}
