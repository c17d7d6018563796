//! Token-aware batching, token-limit error recovery, and per-provider
//! concurrency (spec §4.4). New module: the teacher's `StaticModel` usage
//! embeds one document at a time (`encode_single`), so there's no batching
//! precedent to generalize from directly — this follows §9's "tasks +
//! channels" design note using the teacher's existing `tokio` dependency.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::embedding::provider::EmbeddingProvider;
use crate::error::{EmbeddingErrorKind, Result, SearchError};

/// Default pause between batches to reduce rate-limit risk (spec §4.4
/// step 3). Provider-configurable; this is the fallback.
const DEFAULT_INTER_BATCH_SLEEP: Duration = Duration::from_millis(50);

/// Default number of in-flight batches permitted per provider (spec §4.4
/// "Concurrency").
pub const DEFAULT_PROVIDER_CONCURRENCY: usize = 3;

pub struct Batcher {
    provider: Arc<dyn EmbeddingProvider>,
    semaphore: Arc<Semaphore>,
    inter_batch_sleep: Duration,
}

/// One text submitted for embedding, tagged with an opaque id (typically
/// a chunk id) the caller uses to re-associate results.
#[derive(Debug, Clone)]
pub struct EmbedRequest {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct EmbedResult {
    pub id: i64,
    pub vector: Vec<f32>,
}

impl Batcher {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            semaphore: Arc::new(Semaphore::new(DEFAULT_PROVIDER_CONCURRENCY)),
            inter_batch_sleep: DEFAULT_INTER_BATCH_SLEEP,
        }
    }

    pub fn with_concurrency(mut self, permits: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    pub fn with_inter_batch_sleep(mut self, sleep: Duration) -> Self {
        self.inter_batch_sleep = sleep;
        self
    }

    /// Turn `requests` into embeddings, preserving the relative order of
    /// the ids that survive. Texts whose token estimate exceeds the
    /// provider's limit are dropped (logged, not erred); the result list
    /// may be shorter than `requests`.
    pub async fn embed(&self, requests: Vec<EmbedRequest>) -> Result<Vec<EmbedResult>> {
        let caps = self.provider.capabilities();
        let (kept, dropped): (Vec<EmbedRequest>, Vec<EmbedRequest>) = match caps.max_tokens_per_request {
            Some(limit) => requests.into_iter().partition(|r| self.provider.estimate_tokens(&r.text) <= limit),
            None => (requests, Vec::new()),
        };
        for d in &dropped {
            warn!(id = d.id, "text exceeds provider token limit, dropping from embedding batch");
        }
        if kept.is_empty() {
            return Ok(Vec::new());
        }

        let batches = pack_batches(&kept, &caps, |t| self.provider.estimate_tokens(t));

        let mut out = Vec::with_capacity(kept.len());
        for (i, batch) in batches.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.inter_batch_sleep).await;
            }
            let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| {
                SearchError::embedding(EmbeddingErrorKind::Transport("semaphore closed".into()))
            })?;
            let results = self.embed_batch_with_recovery(&batch).await?;
            drop(permit);
            out.extend(results);
        }
        Ok(out)
    }

    /// Calls the provider once; on a token-limit rejection despite
    /// pre-flight estimation (estimator drift), splits the batch into
    /// `ceil(total_tokens / limit)` sub-batches and retries, or sub-chunks
    /// a lone offending text and returns a representative embedding for
    /// its first sub-chunk (spec §4.4 "Token-limit error recovery").
    fn embed_batch_with_recovery<'a>(
        &'a self,
        batch: &'a [EmbedRequest],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EmbedResult>>> + Send + 'a>> {
        Box::pin(async move {
            let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
            match self.provider.embed_batch(&texts).await {
                Ok(vectors) => Ok(zip_results(batch, vectors)),
                Err(SearchError::Embedding { kind: EmbeddingErrorKind::TokenLimit { tokens, limit } }) => {
                    if batch.len() == 1 {
                        let sub = sub_chunk_by_tokens(&batch[0].text, limit, |t| self.provider.estimate_tokens(t));
                        let Some(first) = sub.into_iter().next() else {
                            return Ok(Vec::new());
                        };
                        let vectors = self.provider.embed_batch(&[first]).await?;
                        return Ok(vectors
                            .into_iter()
                            .next()
                            .map(|v| vec![EmbedResult { id: batch[0].id, vector: v }])
                            .unwrap_or_default());
                    }
                    let n_sub = tokens.div_ceil(limit.max(1)).max(2);
                    let chunk_size = batch.len().div_ceil(n_sub).max(1);
                    let mut out = Vec::with_capacity(batch.len());
                    for sub in batch.chunks(chunk_size) {
                        out.extend(self.embed_batch_with_recovery(sub).await?);
                    }
                    Ok(out)
                }
                Err(e) => Err(e),
            }
        })
    }
}

fn zip_results(batch: &[EmbedRequest], vectors: Vec<Vec<f32>>) -> Vec<EmbedResult> {
    batch
        .iter()
        .zip(vectors)
        .map(|(r, v)| EmbedResult { id: r.id, vector: v })
        .collect()
}

/// Greedily packs requests into batches: starts a new batch when adding
/// the next text would exceed either the token limit or the item limit
/// (spec §4.4 step 2).
fn pack_batches(
    requests: &[EmbedRequest],
    caps: &crate::embedding::provider::ProviderCapabilities,
    estimate: impl Fn(&str) -> usize,
) -> Vec<Vec<EmbedRequest>> {
    let mut batches: Vec<Vec<EmbedRequest>> = Vec::new();
    let mut current: Vec<EmbedRequest> = Vec::new();
    let mut current_tokens = 0usize;

    for req in requests {
        let tokens = estimate(&req.text);
        let would_exceed_items = current.len() + 1 > caps.max_batch_items;
        let would_exceed_tokens = caps
            .max_tokens_per_request
            .is_some_and(|limit| current_tokens + tokens > limit);

        if !current.is_empty() && (would_exceed_items || would_exceed_tokens) {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push(req.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Splits `text` into sub-chunks whose estimated token count stays under
/// `limit`, by line, preserving order.
fn sub_chunk_by_tokens(text: &str, limit: usize, estimate: impl Fn(&str) -> usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        let candidate = if current.is_empty() {
            line.to_string()
        } else {
            format!("{current}\n{line}")
        };
        if !current.is_empty() && estimate(&candidate) > limit {
            out.push(std::mem::take(&mut current));
        }
        if current.is_empty() {
            current = line.to_string();
        } else {
            current.push('\n');
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    if out.is_empty() {
        out.push(text.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::{DistanceMetric, ProviderCapabilities};

    fn caps(max_items: usize, max_tokens: Option<usize>) -> ProviderCapabilities {
        ProviderCapabilities {
            name: "test".into(),
            model: "test-model".into(),
            dims: Some(4),
            distance_metric: DistanceMetric::Cosine,
            max_batch_items: max_items,
            max_tokens_per_request: max_tokens,
            has_tokenizer: true,
            supports_adaptive_batching: false,
        }
    }

    #[test]
    fn pack_batches_respects_item_limit() {
        let reqs: Vec<EmbedRequest> = (0..5)
            .map(|i| EmbedRequest { id: i, text: "x".into() })
            .collect();
        let batches = pack_batches(&reqs, &caps(2, None), |t| t.len());
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[test]
    fn pack_batches_respects_token_limit() {
        let reqs = vec![
            EmbedRequest { id: 1, text: "a".repeat(10) },
            EmbedRequest { id: 2, text: "b".repeat(10) },
            EmbedRequest { id: 3, text: "c".repeat(10) },
        ];
        let batches = pack_batches(&reqs, &caps(100, Some(15)), |t| t.len());
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn sub_chunk_splits_oversized_single_text() {
        let text = (0..20).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let parts = sub_chunk_by_tokens(&text, 20, |t| t.len());
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.len() <= 20 || p.lines().count() == 1));
    }
}
