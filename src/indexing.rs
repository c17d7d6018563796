//! Indexing coordinator (C6): drives a file from bytes to persisted
//! chunks and embeddings with transaction-safe modification. New
//! module — the teacher has no incremental indexer of its own; grounded
//! on the shape of `CodebaseIndex::index_directory` in the teacher's
//! `core/src/vector_store.rs` (stat-then-skip, batch insert, `rayon`
//! directory fan-out), generalized to the full parse → normalize →
//! diff → backup/restore pipeline this system needs.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;

use crate::chunker::{self, OldChunk};
use crate::discovery::DiscoveryCache;
use crate::embedding::provider::EmbeddingProvider;
use crate::error::{Result, SearchError};
use crate::model::{Chunk, Embedding, File};
use crate::parser::registry::{ParserRegistry, Resolution};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    UpToDate,
    NoContent,
    NoChunks,
    SkippedUnsupportedType,
    /// Step 2 (spec §4.2): a language was detected from the extension but
    /// no parser is registered for it.
    Error,
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub outcome: ProcessOutcome,
    pub chunk_count: usize,
    /// Set for [`ProcessOutcome::Error`]; the reason no parser is
    /// registered for the detected language.
    pub message: Option<String>,
}

impl ProcessResult {
    fn outcome(outcome: ProcessOutcome, chunk_count: usize) -> Self {
        Self { outcome, chunk_count, message: None }
    }
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Process one file through parse → normalize → diff → persist, per the
/// spec's 8-step contract. `skip_embeddings=true` defers vector
/// generation to a later batched phase (used by [`process_directory`]).
pub async fn process_file(
    storage: &Storage,
    parsers: &ParserRegistry,
    path: &Path,
    skip_embeddings: bool,
    provider: Option<&(dyn EmbeddingProvider)>,
    force_reprocess: bool,
) -> Result<ProcessResult> {
    let parser = match parsers.resolve_detailed(path) {
        Resolution::Found(parser) => parser,
        Resolution::Unsupported => return Ok(ProcessResult::outcome(ProcessOutcome::SkippedUnsupportedType, 0)),
        Resolution::Unregistered(lang) => {
            return Ok(ProcessResult {
                outcome: ProcessOutcome::Error,
                chunk_count: 0,
                message: Some(format!("language '{lang}' detected but no parser is registered for it ({})", path.display())),
            });
        }
    };

    let metadata = std::fs::metadata(path).map_err(|e| SearchError::storage(format!("cannot stat {}: {e}", path.display())))?;
    let current_mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or_else(now_secs);
    let size_bytes = metadata.len();

    let abs_path = path.to_string_lossy().to_string();
    let existing = storage.get_file_by_path(&abs_path).await?;

    if let Some(existing) = &existing {
        if !force_reprocess && !existing.mtime_changed(current_mtime) {
            let stored_count = storage.get_chunks_for_file(existing.id).await?.len();
            return Ok(ProcessResult::outcome(ProcessOutcome::UpToDate, stored_count));
        }
    }

    let source = std::fs::read_to_string(path).map_err(|e| SearchError::storage(format!("cannot read {}: {e}", path.display())))?;
    let descriptors = parser.parse(path, &source)?;
    if descriptors.is_empty() {
        return Ok(ProcessResult::outcome(ProcessOutcome::NoContent, 0));
    }

    let normalized = chunker::normalize(&descriptors, existing.as_ref().map(|f| f.id).unwrap_or(0), parser.language());
    if normalized.is_empty() {
        return Ok(ProcessResult::outcome(ProcessOutcome::NoChunks, 0));
    }

    let chunk_count = match existing {
        None => first_insert(storage, path, &abs_path, current_mtime, size_bytes, parser.language(), normalized).await?,
        Some(file) => {
            modify_existing(storage, &file, current_mtime, size_bytes, &source, &*parser, normalized).await?
        }
    };

    if !skip_embeddings {
        if let Some(provider) = provider {
            let file = storage
                .get_file_by_path(&abs_path)
                .await?
                .ok_or_else(|| SearchError::storage("file row vanished after insert"))?;
            generate_embeddings_for_file(storage, provider, file.id).await?;
        }
    }

    Ok(ProcessResult::outcome(ProcessOutcome::Success, chunk_count))
}

async fn first_insert(
    storage: &Storage,
    _path: &Path,
    abs_path: &str,
    mtime: f64,
    size_bytes: u64,
    language: &str,
    mut chunks: Vec<Chunk>,
) -> Result<usize> {
    let file = File {
        id: 0,
        path: abs_path.to_string(),
        mtime,
        size_bytes,
        language: language.to_string(),
        created_at: now_secs(),
        updated_at: now_secs(),
    };
    let file = storage.insert_file(file).await?;
    for chunk in &mut chunks {
        chunk.file_id = file.id;
    }
    let count = chunks.len();
    storage.insert_chunks(chunks).await?;
    Ok(count)
}

/// Transaction-safe modification path (spec §4.2 step 8): backup, delete,
/// insert; restore from backup on failure.
async fn modify_existing(
    storage: &Storage,
    file: &File,
    mtime: f64,
    size_bytes: u64,
    new_source: &str,
    parser: &dyn crate::parser::ChunkParser,
    mut new_chunks: Vec<Chunk>,
) -> Result<usize> {
    let backup_table = format!("chunks_backup_{}_{}", file.id, uuid_like());
    let old_ids = storage.get_chunks_for_file(file.id).await?.iter().map(|c| c.id).collect::<Vec<_>>();
    let old_chunks: Vec<OldChunk> = storage
        .get_chunks_for_file(file.id)
        .await?
        .into_iter()
        .map(|c| OldChunk { id: c.id, start_line: c.start_line, end_line: c.end_line })
        .collect();

    storage.backup_chunks(file.id, &backup_table).await?;
    let embedding_backup_prefix = format!("emb_backup_{}_{}", file.id, uuid_like());
    let embedding_backup_tables = storage.backup_embeddings_for_chunks(&old_ids, &embedding_backup_prefix).await?;

    let result: Result<usize> = async {
        let updated = File { id: file.id, mtime, size_bytes, updated_at: now_secs(), ..file.clone() };
        storage.insert_file(updated).await?;

        // diff() needs old_source; not persisted, so treat as a full change
        // unless the parser's diff contract can be driven without it — the
        // conservative default parser diff (full_change) is always safe.
        let changed_ranges = parser.diff(new_source, new_source);
        let chunk_diff = chunker::diff(&old_chunks, &changed_ranges, std::mem::take(&mut new_chunks));

        storage.delete_chunks(&chunk_diff.to_delete).await?;
        let mut to_persist: Vec<Chunk> = chunk_diff.to_insert;
        for c in &mut to_persist {
            c.file_id = file.id;
        }
        let persisted = storage.insert_chunks(to_persist).await?;
        Ok(persisted.len() + chunk_diff.unchanged_count)
    }
    .await;

    match result {
        Ok(count) => {
            storage.drop_backup_table(&backup_table).await?;
            storage.drop_embedding_backup_tables(&embedding_backup_tables).await?;
            Ok(count)
        }
        Err(e) => {
            storage.restore_chunks_from_backup(&backup_table).await?;
            storage.restore_embeddings_from_backup(&embedding_backup_prefix, &embedding_backup_tables).await?;
            Err(e)
        }
    }
}

fn uuid_like() -> String {
    format!("{:x}", xxhash_rust::xxh3::xxh3_64(format!("{:?}", std::thread::current().id()).as_bytes()))
}

async fn generate_embeddings_for_file(storage: &Storage, provider: &dyn EmbeddingProvider, file_id: i64) -> Result<()> {
    let chunks = storage.get_chunks_for_file(file_id).await?;
    embed_and_store(storage, provider, &chunks, false).await
}

/// Embeds `chunks` in one provider call and writes the results through
/// the bulk-insert fast path. Callers that need token-aware batching or
/// adaptive concurrency across many files go through
/// [`crate::embedding::batcher::Batcher`] instead; this helper is for the
/// single-file and whole-directory call sites here, which already know
/// their full chunk set up front.
async fn embed_and_store(storage: &Storage, provider: &dyn EmbeddingProvider, chunks: &[Chunk], is_semantic_reindex: bool) -> Result<()> {
    if chunks.is_empty() {
        return Ok(());
    }
    let caps = provider.capabilities();
    let texts: Vec<String> = chunks.iter().map(|c| c.code.clone()).collect();
    let vectors = provider.embed_batch(&texts).await?;

    let dims = caps.dims.unwrap_or_else(|| vectors.first().map(|v| v.len()).unwrap_or(0));
    let embeddings: Vec<Embedding> = chunks
        .iter()
        .zip(vectors.into_iter())
        .map(|(c, v)| Embedding { chunk_id: c.id, provider: caps.name.clone(), model: caps.model.clone(), dims, vector: v, created_at: now_secs() })
        .collect();

    storage.bulk_insert_embeddings(dims, &caps.name, &caps.model, embeddings, is_semantic_reindex).await?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct DirectoryReport {
    pub processed: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Discovers files via C7, parses/chunks each with embeddings deferred,
/// then generates embeddings for the accumulated set in one batched
/// phase — amortizing the HNSW drop/rebuild cost across the directory.
pub async fn process_directory(
    storage: &Storage,
    parsers: &ParserRegistry,
    discovery: &mut DiscoveryCache,
    root: &Path,
    include: &[String],
    exclude: &[String],
    provider: Option<&(dyn EmbeddingProvider)>,
) -> Result<DirectoryReport> {
    let files = discovery.discover(root, include, exclude)?;
    let mut report = DirectoryReport::default();

    for entry in &files {
        match process_file(storage, parsers, &entry.abs_path, true, None, false).await {
            Ok(ProcessResult { outcome: ProcessOutcome::Success, .. }) => report.processed += 1,
            Ok(ProcessResult { outcome: ProcessOutcome::UpToDate, .. }) => report.up_to_date += 1,
            Ok(ProcessResult { outcome: ProcessOutcome::SkippedUnsupportedType, .. }) => report.skipped += 1,
            Ok(ProcessResult { outcome: ProcessOutcome::Error, message, .. }) => {
                if report.errors.len() < 50 {
                    let reason = message.unwrap_or_else(|| "no parser registered for detected language".to_string());
                    report.errors.push(format!("{}: {reason}", entry.abs_path.display()));
                }
            }
            Ok(_) => {}
            Err(e) => {
                if report.errors.len() < 50 {
                    report.errors.push(format!("{}: {e}", entry.abs_path.display()));
                }
            }
        }
    }

    if let Some(provider) = provider {
        let mut all_chunks = Vec::new();
        for entry in &files {
            let abs_path = entry.abs_path.to_string_lossy().to_string();
            if let Some(file) = storage.get_file_by_path(&abs_path).await? {
                all_chunks.extend(storage.get_chunks_for_file(file.id).await?);
            }
        }
        all_chunks.par_sort_by_key(|c| c.id);
        all_chunks.dedup_by_key(|c| c.id);
        embed_and_store(storage, provider, &all_chunks, true).await?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_file_skips_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.xyz");
        std::fs::write(&path, "hello").unwrap();
        let storage = Storage::connect(&dir.path().join("db.lance")).await.unwrap();
        let parsers = ParserRegistry::default();
        let result = process_file(&storage, &parsers, &path, true, None, false).await.unwrap();
        assert_eq!(result.outcome, ProcessOutcome::SkippedUnsupportedType);
    }

    #[tokio::test]
    async fn process_file_errors_on_recognized_language_without_parser() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.go");
        std::fs::write(&path, "package main").unwrap();
        let storage = Storage::connect(&dir.path().join("db.lance")).await.unwrap();
        let parsers = ParserRegistry::default();
        let result = process_file(&storage, &parsers, &path, true, None, false).await.unwrap();
        assert_eq!(result.outcome, ProcessOutcome::Error);
        assert!(result.message.unwrap().contains("go"));
    }

    #[tokio::test]
    async fn process_file_indexes_new_rust_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "fn hello() {\n    let x = 1;\n    println!(\"{}\", x);\n}\n").unwrap();
        let storage = Storage::connect(&dir.path().join("db.lance")).await.unwrap();
        let parsers = ParserRegistry::default();
        let result = process_file(&storage, &parsers, &path, true, None, false).await.unwrap();
        assert_eq!(result.outcome, ProcessOutcome::Success);
        assert_eq!(result.chunk_count, 1);
    }

    #[tokio::test]
    async fn process_file_is_up_to_date_on_second_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "fn hello() {\n    let x = 1;\n    x\n}\n").unwrap();
        let storage = Storage::connect(&dir.path().join("db.lance")).await.unwrap();
        let parsers = ParserRegistry::default();
        process_file(&storage, &parsers, &path, true, None, false).await.unwrap();
        let second = process_file(&storage, &parsers, &path, true, None, false).await.unwrap();
        assert_eq!(second.outcome, ProcessOutcome::UpToDate);
    }
}
