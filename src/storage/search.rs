//! Regex and semantic search (spec §4.3) plus the `get_stats` aggregation.

use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use regex::Regex;

use crate::error::{Result, SearchError};
use crate::storage::{SearchHit, Storage, StorageStats, CHUNKS_TABLE, FILES_TABLE};

/// Rejects path filters escaping the project root: no `..`, no `~`, no
/// absolute paths. Spec §4.3 "Regex search" safe-subset rule.
pub fn validate_path_filter(filter: &str) -> Result<()> {
    if filter.contains("..") || filter.starts_with('~') || filter.starts_with('/') {
        return Err(SearchError::validation(
            "path filter must be relative and may not contain '..' or '~'",
        ));
    }
    Ok(())
}

impl Storage {
    /// Regex search over chunk code, ordered by `(file_path, start_line)`
    /// ASC. `path_filter`, if given, is matched as a substring against the
    /// file's path after the safe-subset check.
    pub async fn regex_search(
        &self,
        pattern: &str,
        limit: usize,
        path_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if let Some(f) = path_filter {
            validate_path_filter(f)?;
        }
        let re = Regex::new(pattern).map_err(|e| SearchError::validation(format!("invalid regex: {e}")))?;

        let Ok(chunks_table) = self.connection().open_table(CHUNKS_TABLE).execute().await else {
            return Ok(vec![]);
        };
        let files_by_id = self.all_files_by_id().await?;

        let mut stream = chunks_table.query().execute().await.map_err(SearchError::from)?;
        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            for chunk in crate::storage::chunks::decode_chunks(&batch) {
                let Some(file) = files_by_id.get(&chunk.file_id) else { continue };
                if let Some(f) = path_filter {
                    if !file.path.contains(f) {
                        continue;
                    }
                }
                if re.is_match(&chunk.code) {
                    hits.push(SearchHit {
                        chunk_id: chunk.id,
                        symbol: chunk.symbol,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        code: chunk.code,
                        chunk_type: format!("{:?}", chunk.chunk_type).to_lowercase(),
                        file_path: file.path.clone(),
                        language: chunk.language,
                        similarity: None,
                    });
                }
            }
        }

        hits.sort_by(|a, b| a.file_path.cmp(&b.file_path).then(a.start_line.cmp(&b.start_line)));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Semantic search over the `embeddings_<dims>` table for `provider`/
    /// `model`, ranked by cosine similarity DESC, optional threshold
    /// filter, tie-broken by chunk id ASC.
    pub async fn semantic_search(
        &self,
        query_vector: &[f32],
        provider: &str,
        model: &str,
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let table_name = crate::model::Embedding::table_name(query_vector.len());
        let Ok(table) = self.connection().open_table(&table_name).execute().await else {
            return Ok(vec![]);
        };

        let k = (limit.max(1) * 4).min(1000);
        let mut stream = table
            .vector_search(query_vector.to_vec())
            .map_err(SearchError::from)?
            .column(super::bulk::EMBEDDING_COLUMN)
            .limit(k)
            .only_if(format!("provider = \"{provider}\" AND model = \"{model}\""))
            .execute()
            .await
            .map_err(SearchError::from)?;

        let mut scored: Vec<(i64, f32)> = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            let chunk_ids = batch.column_by_name("chunk_id").and_then(|c| c.as_any().downcast_ref::<arrow_array::Int64Array>());
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<arrow_array::Float32Array>());
            let (Some(ids), Some(dists)) = (chunk_ids, distances) else { continue };
            for i in 0..batch.num_rows() {
                if !ids.is_valid(i) {
                    continue;
                }
                // lancedb reports cosine *distance*; similarity = 1 - distance.
                let similarity = 1.0 - dists.value(i);
                if let Some(t) = threshold {
                    if similarity < t {
                        continue;
                    }
                }
                scored.push((ids.value(i), similarity));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        let chunks_by_id = self.chunks_by_ids(scored.iter().map(|(id, _)| *id).collect()).await?;
        let files_by_id = self.all_files_by_id().await?;

        let mut hits = Vec::with_capacity(scored.len());
        for (chunk_id, similarity) in scored {
            let Some(chunk) = chunks_by_id.get(&chunk_id) else { continue };
            let Some(file) = files_by_id.get(&chunk.file_id) else { continue };
            hits.push(SearchHit {
                chunk_id: chunk.id,
                symbol: chunk.symbol.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                code: chunk.code.clone(),
                chunk_type: format!("{:?}", chunk.chunk_type).to_lowercase(),
                file_path: file.path.clone(),
                language: chunk.language.clone(),
                similarity: Some(similarity),
            });
        }
        Ok(hits)
    }

    async fn all_files_by_id(&self) -> Result<std::collections::HashMap<i64, crate::model::File>> {
        let Ok(table) = self.connection().open_table(FILES_TABLE).execute().await else {
            return Ok(Default::default());
        };
        let mut stream = table.query().execute().await.map_err(SearchError::from)?;
        let mut out = std::collections::HashMap::new();
        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            for file in crate::storage::files::decode_files(&batch) {
                out.insert(file.id, file);
            }
        }
        Ok(out)
    }

    async fn chunks_by_ids(&self, ids: Vec<i64>) -> Result<std::collections::HashMap<i64, crate::model::Chunk>> {
        if ids.is_empty() {
            return Ok(Default::default());
        }
        let Ok(table) = self.connection().open_table(CHUNKS_TABLE).execute().await else {
            return Ok(Default::default());
        };
        let list = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        let mut stream = table
            .query()
            .only_if(format!("id IN ({list})"))
            .execute()
            .await
            .map_err(SearchError::from)?;
        let mut out = std::collections::HashMap::new();
        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            for chunk in crate::storage::chunks::decode_chunks(&batch) {
                out.insert(chunk.id, chunk);
            }
        }
        Ok(out)
    }
}

pub(crate) async fn collect_stats(storage: &Storage) -> Result<StorageStats> {
    let files = row_count(storage, FILES_TABLE).await?;
    let chunks = row_count(storage, CHUNKS_TABLE).await?;

    let mut embeddings = 0u64;
    for table_name in storage.embedding_table_names().await? {
        embeddings += row_count(storage, &table_name).await?;
    }
    let providers = storage.providers_in_use().await?;

    Ok(StorageStats { files, chunks, embeddings, providers })
}

async fn row_count(storage: &Storage, table_name: &str) -> Result<u64> {
    let Ok(table) = storage.connection().open_table(table_name).execute().await else {
        return Ok(0);
    };
    table.count_rows(None).await.map(|n| n as u64).map_err(SearchError::from)
}

