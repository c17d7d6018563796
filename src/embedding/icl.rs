//! In-context-learning example cache for providers that accept ICL hints
//! (spec §4.4 "ICL context cache"). New module; advisory only — the
//! embedding result never depends on a cache hit.

use std::collections::HashMap;

use xxhash_rust::xxh3::xxh3_64;

/// One language's pool of few-shot examples, scored against a target by
/// whitespace-tokenized Jaccard similarity.
#[derive(Debug, Clone)]
pub struct IclExample {
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct IclCacheEntry {
    pub instruction: String,
    pub selected_examples: Vec<String>,
    pub target_snippet: String,
    pub similarity_score: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IclKey {
    language: String,
    target_prefix_hash: u64,
}

/// Reuse threshold: a cached entry's stored similarity must exceed this
/// against the *new* target for the cache to be considered a hit.
const DEFAULT_REUSE_THRESHOLD: f64 = 0.8;
const TARGET_PREFIX_CHARS: usize = 200;

pub struct IclCache {
    entries: HashMap<IclKey, IclCacheEntry>,
    capacity: usize,
    reuse_threshold: f64,
}

impl IclCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            reuse_threshold: DEFAULT_REUSE_THRESHOLD,
        }
    }

    fn key(language: &str, target: &str) -> IclKey {
        let prefix: String = target.chars().take(TARGET_PREFIX_CHARS).collect();
        IclKey {
            language: language.to_string(),
            target_prefix_hash: xxh3_64(prefix.as_bytes()),
        }
    }

    /// Look up a cached entry for `(language, target)`. Returns `Some`
    /// only when a stored entry exists *and* its similarity against this
    /// target still clears the reuse threshold.
    pub fn get(&self, language: &str, target: &str) -> Option<&IclCacheEntry> {
        let key = Self::key(language, target);
        self.entries
            .get(&key)
            .filter(|e| e.similarity_score > self.reuse_threshold)
    }

    /// Admit a fresh entry, evicting the oldest (by `timestamp`) if at
    /// capacity.
    pub fn insert(&mut self, language: &str, target: &str, entry: IclCacheEntry) {
        let key = Self::key(language, target);
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest_key) = self
                .entries
                .iter()
                .min_by(|a, b| a.1.timestamp.partial_cmp(&b.1.timestamp).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest_key);
            }
        }
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Jaccard similarity over whitespace-tokenized, lowercased content.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: std::collections::HashSet<String> = a.split_whitespace().map(|t| t.to_ascii_lowercase()).collect();
    let set_b: std::collections::HashSet<String> = b.split_whitespace().map(|t| t.to_ascii_lowercase()).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Score every example in `pool` against `target`, keep the top two.
pub fn select_examples<'a>(pool: &'a [IclExample], target: &str) -> Vec<&'a IclExample> {
    let mut scored: Vec<(&IclExample, f64)> =
        pool.iter().map(|ex| (ex, jaccard_similarity(&ex.content, target))).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(2).map(|(ex, _)| ex).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical_text_is_one() {
        assert_eq!(jaccard_similarity("fn foo bar", "fn foo bar"), 1.0);
    }

    #[test]
    fn jaccard_disjoint_text_is_zero() {
        assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn select_examples_keeps_top_two() {
        let pool = vec![
            IclExample { content: "fn add a b".into() },
            IclExample { content: "totally unrelated text".into() },
            IclExample { content: "fn add a b c".into() },
        ];
        let selected = select_examples(&pool, "fn add a b");
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().any(|e| e.content == "fn add a b"));
    }

    #[test]
    fn cache_rejects_entries_below_reuse_threshold() {
        let mut cache = IclCache::new(4);
        cache.insert(
            "rust",
            "fn target() {}",
            IclCacheEntry {
                instruction: "i".into(),
                selected_examples: vec![],
                target_snippet: "fn target() {}".into(),
                similarity_score: 0.5,
                timestamp: 1.0,
            },
        );
        assert!(cache.get("rust", "fn target() {}").is_none());
    }

    #[test]
    fn cache_evicts_oldest_at_capacity() {
        let mut cache = IclCache::new(1);
        cache.insert(
            "rust",
            "fn a() {}",
            IclCacheEntry {
                instruction: "i".into(),
                selected_examples: vec![],
                target_snippet: "fn a() {}".into(),
                similarity_score: 0.9,
                timestamp: 1.0,
            },
        );
        cache.insert(
            "rust",
            "fn b() {}",
            IclCacheEntry {
                instruction: "i".into(),
                selected_examples: vec![],
                target_snippet: "fn b() {}".into(),
                similarity_score: 0.9,
                timestamp: 2.0,
            },
        );
        assert_eq!(cache.len(), 1);
        assert!(cache.get("rust", "fn a() {}").is_none());
    }
}
