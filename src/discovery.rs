//! File-discovery cache (C7): LRU+TTL cache over directory-walk results,
//! invalidated by directory mtime. Wraps the same `ignore::WalkBuilder`
//! machinery as the teacher's `scanner.rs::scan_workspace`, generalized
//! from a fixed "repomix" override list to the CLI's `--include`/
//! `--exclude` glob flags.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use lru::LruCache;

use crate::error::{Result, SearchError};

#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub abs_path: PathBuf,
    pub rel_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    root: PathBuf,
    include: Vec<String>,
    exclude: Vec<String>,
}

struct CacheEntry {
    files: Vec<DiscoveredFile>,
    root_mtime: Option<std::time::SystemTime>,
    inserted_at: Instant,
}

const DEFAULT_TTL: Duration = Duration::from_secs(30);
const DEFAULT_CAPACITY: usize = 32;

/// Glob-driven directory walker with an LRU+TTL memo over its own output,
/// keyed by `(root, include globs, exclude globs)` and invalidated both
/// by TTL expiry and by the root directory's mtime changing.
pub struct DiscoveryCache {
    entries: LruCache<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap()),
            ttl: DEFAULT_TTL,
        }
    }
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover files under `root`, honoring `.gitignore` plus the given
    /// include/exclude globs, using a cached result when still fresh.
    pub fn discover(&mut self, root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<DiscoveredFile>> {
        let key = CacheKey {
            root: root.to_path_buf(),
            include: include.to_vec(),
            exclude: exclude.to_vec(),
        };
        let root_mtime = std::fs::metadata(root).ok().and_then(|m| m.modified().ok());

        if let Some(entry) = self.entries.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl && entry.root_mtime == root_mtime {
                return Ok(entry.files.clone());
            }
        }

        let files = walk(root, include, exclude)?;
        self.entries.put(key, CacheEntry { files: files.clone(), root_mtime, inserted_at: Instant::now() });
        Ok(files)
    }
}

fn build_overrides(root: &Path, include: &[String], exclude: &[String]) -> Result<Override> {
    let mut builder = OverrideBuilder::new(root);
    for pattern in include {
        builder
            .add(pattern)
            .map_err(|e| SearchError::validation(format!("bad include glob '{pattern}': {e}")))?;
    }
    for pattern in exclude {
        let negated = format!("!{pattern}");
        builder
            .add(&negated)
            .map_err(|e| SearchError::validation(format!("bad exclude glob '{pattern}': {e}")))?;
    }
    builder.build().map_err(|e| SearchError::validation(e.to_string()))
}

fn walk(root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<DiscoveredFile>> {
    let overrides = build_overrides(root, include, exclude)?;
    let walker = WalkBuilder::new(root).standard_filters(true).overrides(overrides).build();

    let mut out = Vec::new();
    for entry in walker {
        let Ok(dent) = entry else { continue };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let abs_path = dent.into_path();
        let rel_path = abs_path.strip_prefix(root).unwrap_or(&abs_path).to_path_buf();
        out.push(DiscoveredFile { abs_path, rel_path });
    }
    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_files_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.rs"), "fn f() {}").unwrap();

        let mut cache = DiscoveryCache::new();
        let files = cache.discover(dir.path(), &[], &[]).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn repeated_discover_hits_cache_without_rewalking() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();

        let mut cache = DiscoveryCache::new();
        let first = cache.discover(dir.path(), &[], &[]).unwrap();
        let second = cache.discover(dir.path(), &[], &[]).unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(cache.entries.len(), 1);
    }

    #[test]
    fn exclude_glob_filters_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.rs"), "fn f() {}").unwrap();
        std::fs::write(dir.path().join("skip.lock"), "v1").unwrap();

        let mut cache = DiscoveryCache::new();
        let files = cache.discover(dir.path(), &[], &["*.lock".to_string()]).unwrap();
        assert!(files.iter().all(|f| f.rel_path.extension().and_then(|e| e.to_str()) != Some("lock")));
    }
}
