//! Per-dimension embedding table operations and the bulk-insert fast path
//! (spec §4.3). Each `embeddings_<N>` table is provisioned lazily on first
//! insert of a vector of that width; inserting a different width into an
//! existing row's table is rejected by [`schema::embedding_row_batch`].

use std::collections::{HashMap, HashSet};

use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::error::{Result, SearchError};
use crate::model::Embedding;
use crate::storage::{bulk, schema, Storage, BULK_INSERT_THRESHOLD};

impl Storage {
    /// Insert embeddings into the table for their dimension, choosing the
    /// bulk-insert fast path when the batch is large or the caller marks
    /// this as a semantic reindex. `embeddings` must all share `dims`.
    pub async fn bulk_insert_embeddings(
        &self,
        dims: usize,
        provider: &str,
        model: &str,
        embeddings: Vec<Embedding>,
        is_semantic_reindex: bool,
    ) -> Result<usize> {
        if embeddings.is_empty() {
            return Ok(0);
        }
        for e in &embeddings {
            e.validate()?;
            if e.dims != dims {
                return Err(SearchError::storage(format!(
                    "embedding dims {} does not match target table width {dims}",
                    e.dims
                )));
            }
        }

        let table_name = Embedding::table_name(dims);
        let table = self.open_or_create_embeddings_table(&table_name, dims).await?;

        let use_fast_path = embeddings.len() >= BULK_INSERT_THRESHOLD || is_semantic_reindex;
        if use_fast_path {
            self.bulk_insert_fast_path(&table, provider, model, embeddings).await
        } else {
            self.plain_upsert(&table, provider, model, embeddings).await
        }
    }

    async fn open_or_create_embeddings_table(&self, table_name: &str, dims: usize) -> Result<lancedb::Table> {
        match self.connection().open_table(table_name).execute().await {
            Ok(t) => Ok(t),
            Err(_) => {
                let empty = schema::batch_reader(arrow_array::RecordBatch::new_empty(schema::embeddings_schema(dims)));
                self.connection()
                    .create_table(table_name, empty)
                    .execute()
                    .await
                    .map_err(SearchError::from)
            }
        }
    }

    /// Steps 1–5 of the bulk-insert fast path: drop the HNSW index,
    /// split inserts vs updates, emit each as a single multi-row write,
    /// recreate the index. On failure, the index is re-created in a
    /// separate best-effort attempt because the data rollback alone
    /// leaves it dropped.
    async fn bulk_insert_fast_path(
        &self,
        table: &lancedb::Table,
        provider: &str,
        model: &str,
        embeddings: Vec<Embedding>,
    ) -> Result<usize> {
        bulk::drop_vector_index(table).await?;

        let result = self.write_partitioned(table, provider, model, embeddings).await;

        match &result {
            Ok(_) => {
                bulk::create_vector_index(table).await?;
            }
            Err(_) => {
                bulk::recreate_index_best_effort(table).await;
            }
        }
        result
    }

    /// Batches below the threshold: a single `INSERT OR REPLACE` without
    /// touching indexes.
    async fn plain_upsert(
        &self,
        table: &lancedb::Table,
        provider: &str,
        model: &str,
        embeddings: Vec<Embedding>,
    ) -> Result<usize> {
        self.write_partitioned(table, provider, model, embeddings).await
    }

    /// Splits `embeddings` into inserts (no existing `(chunk_id, provider,
    /// model)` row) and updates (existing row replaced), emitting one
    /// multi-row write for each half.
    async fn write_partitioned(
        &self,
        table: &lancedb::Table,
        provider: &str,
        model: &str,
        embeddings: Vec<Embedding>,
    ) -> Result<usize> {
        let existing_chunk_ids = self.existing_chunk_ids(table, provider, model).await?;

        let (mut updates, mut inserts): (Vec<Embedding>, Vec<Embedding>) = (Vec::new(), Vec::new());
        for e in embeddings {
            if existing_chunk_ids.contains(&e.chunk_id) {
                updates.push(e);
            } else {
                inserts.push(e);
            }
        }

        if !updates.is_empty() {
            let ids: Vec<i64> = updates.iter().map(|e| e.chunk_id).collect();
            let list = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
            table
                .delete(&format!(
                    "chunk_id IN ({list}) AND provider = \"{provider}\" AND model = \"{model}\""
                ))
                .await
                .map_err(SearchError::from)?;
        }

        let total = updates.len() + inserts.len();
        let mut all = inserts;
        all.append(&mut updates);
        if all.is_empty() {
            return Ok(0);
        }

        let dims = all[0].dims;
        let row_ids: Vec<i64> = all.iter().map(|_| self.alloc_embedding_id()).collect();
        let batch = schema::embedding_row_batch(dims, &row_ids, &all)?;
        table
            .add(schema::batch_reader(batch))
            .execute()
            .await
            .map_err(SearchError::from)?;

        Ok(total)
    }

    async fn existing_chunk_ids(
        &self,
        table: &lancedb::Table,
        provider: &str,
        model: &str,
    ) -> Result<HashSet<i64>> {
        let mut stream = table
            .query()
            .only_if(format!("provider = \"{provider}\" AND model = \"{model}\""))
            .select(lancedb::query::Select::columns(&["chunk_id"]))
            .execute()
            .await
            .map_err(SearchError::from)?;

        let mut out = HashSet::new();
        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            if let Some(col) = batch.column_by_name("chunk_id") {
                if let Some(arr) = col.as_any().downcast_ref::<arrow_array::Int64Array>() {
                    out.extend((0..arr.len()).filter(|&i| arr.is_valid(i)).map(|i| arr.value(i)));
                }
            }
        }
        Ok(out)
    }

    pub(crate) async fn delete_embeddings_for_chunks(&self, chunk_ids: &[i64]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let list = chunk_ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        for table_name in self.embedding_table_names().await? {
            if let Ok(table) = self.connection().open_table(&table_name).execute().await {
                table
                    .delete(&format!("chunk_id IN ({list})"))
                    .await
                    .map_err(SearchError::from)?;
            }
        }
        Ok(())
    }

    /// Copy embedding rows for `chunk_ids`, from every per-dimension
    /// table, into `{backup_prefix}_<N>` tables. Part of the
    /// transaction-safe modification path (spec §4.2 step 8b).
    pub async fn backup_embeddings_for_chunks(&self, chunk_ids: &[i64], backup_prefix: &str) -> Result<Vec<String>> {
        if chunk_ids.is_empty() {
            return Ok(vec![]);
        }
        let list = chunk_ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        let mut backup_tables = Vec::new();

        for table_name in self.embedding_table_names().await? {
            let Ok(table) = self.connection().open_table(&table_name).execute().await else {
                continue;
            };
            let mut stream = table
                .query()
                .only_if(format!("chunk_id IN ({list})"))
                .execute()
                .await
                .map_err(SearchError::from)?;
            let mut batches = Vec::new();
            while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
                if batch.num_rows() > 0 {
                    batches.push(batch);
                }
            }
            if batches.is_empty() {
                continue;
            }
            let backup_name = format!("{backup_prefix}_{table_name}");
            let schema = batches[0].schema();
            self.connection()
                .create_table(&backup_name, schema::batch_reader_multi(batches, schema))
                .execute()
                .await
                .map_err(SearchError::from)?;
            backup_tables.push(backup_name);
        }
        Ok(backup_tables)
    }

    /// Restore embedding rows from backup tables created by
    /// [`Self::backup_embeddings_for_chunks`] and drop them. `backup_prefix`
    /// must be the same value passed to that call, so the original
    /// `embeddings_<N>` table name can be recovered from each backup name.
    pub async fn restore_embeddings_from_backup(&self, backup_prefix: &str, backup_tables: &[String]) -> Result<()> {
        let strip = format!("{backup_prefix}_");
        for backup_name in backup_tables {
            let Ok(backup) = self.connection().open_table(backup_name).execute().await else {
                continue;
            };
            let mut stream = backup.query().execute().await.map_err(SearchError::from)?;
            let mut batches = Vec::new();
            while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
                batches.push(batch);
            }
            drop(backup);

            if let Some(original_name) = backup_name.strip_prefix(&strip) {
                if let Ok(table) = self.connection().open_table(original_name).execute().await {
                    for batch in batches {
                        table
                            .add(schema::batch_reader(batch))
                            .execute()
                            .await
                            .map_err(SearchError::from)?;
                    }
                }
            }

            let _ = self.connection().drop_table(backup_name).await;
        }
        Ok(())
    }

    /// Drop backup tables created by [`Self::backup_embeddings_for_chunks`]
    /// without restoring their rows — the success path of the
    /// transaction-safe modification, once the new embeddings are
    /// already committed.
    pub async fn drop_embedding_backup_tables(&self, backup_tables: &[String]) -> Result<()> {
        for backup_name in backup_tables {
            let _ = self.connection().drop_table(backup_name).await;
        }
        Ok(())
    }

    pub(crate) async fn embedding_table_names(&self) -> Result<Vec<String>> {
        let names = self
            .connection()
            .table_names()
            .execute()
            .await
            .map_err(SearchError::from)?;
        Ok(names.into_iter().filter(|n| n.starts_with("embeddings_")).collect())
    }

    /// Provider/model pairs currently present across all embedding tables,
    /// used by `get_stats`.
    pub(crate) async fn providers_in_use(&self) -> Result<Vec<String>> {
        let mut seen: HashMap<String, ()> = HashMap::new();
        for table_name in self.embedding_table_names().await? {
            let Ok(table) = self.connection().open_table(&table_name).execute().await else {
                continue;
            };
            let mut stream = table
                .query()
                .select(lancedb::query::Select::columns(&["provider", "model"]))
                .execute()
                .await
                .map_err(SearchError::from)?;
            while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
                let providers = batch.column_by_name("provider").and_then(|c| c.as_any().downcast_ref::<arrow_array::StringArray>().cloned());
                let models = batch.column_by_name("model").and_then(|c| c.as_any().downcast_ref::<arrow_array::StringArray>().cloned());
                if let (Some(p), Some(m)) = (providers, models) {
                    for i in 0..batch.num_rows() {
                        if p.is_valid(i) && m.is_valid(i) {
                            seen.insert(format!("{}/{}", p.value(i), m.value(i)), ());
                        }
                    }
                }
            }
        }
        let mut out: Vec<String> = seen.into_keys().collect();
        out.sort();
        Ok(out)
    }
}
