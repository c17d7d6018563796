//! The provider seam (C5). Grounded on the teacher's `StaticModel` usage
//! in `core/src/vector_store.rs` — there, `model2vec_rs::model::StaticModel`
//! is the one embedding backend baked directly into `CodebaseIndex`. Here
//! that relationship is inverted behind a trait so additional providers
//! (remote HTTP APIs) can be registered without touching storage or the
//! indexing coordinator.

use async_trait::async_trait;

use crate::error::Result;

/// Distance metric a provider's vectors are meant to be compared under.
/// Only `Cosine` is exercised by the storage engine today, but the
/// capability set carries the others so a provider can declare itself
/// honestly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    Dot,
}

/// The capability set a provider advertises (spec §4.4). `dims` may be
/// `None` until the first successful call, after which it must remain
/// stable for the provider's lifetime — callers that discover a dimension
/// change should treat it as a configuration error, not silently
/// re-partition.
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    pub name: String,
    pub model: String,
    pub dims: Option<usize>,
    pub distance_metric: DistanceMetric,
    pub max_batch_items: usize,
    pub max_tokens_per_request: Option<usize>,
    pub has_tokenizer: bool,
    /// Whether this provider benefits from rolling-window adaptive batch
    /// sizing (spec §4.4 "optional per provider").
    pub supports_adaptive_batching: bool,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn capabilities(&self) -> ProviderCapabilities;

    /// Best-effort token estimate for one text, used by the token-aware
    /// batcher's pre-flight pass. Providers without a real tokenizer fall
    /// back to a chars/4 heuristic (`default_estimate_tokens`).
    fn estimate_tokens(&self, text: &str) -> usize {
        default_estimate_tokens(text)
    }

    /// Embed a batch of texts in one call, preserving input order. The
    /// returned vector's length may be shorter than `texts` only when the
    /// batcher itself has already dropped texts upstream — a provider
    /// implementation should otherwise return exactly one vector per
    /// input text or an error.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Rough token estimate used when a provider has no real tokenizer:
/// about 4 characters per token, the conventional English-text ratio.
pub fn default_estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_estimate_is_proportional_to_length() {
        assert_eq!(default_estimate_tokens("abcd"), 1);
        assert_eq!(default_estimate_tokens(&"a".repeat(400)), 100);
    }
}
