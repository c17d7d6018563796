//! File row operations: upsert-by-path insert, lookup, and the cascading
//! `delete_file_completely` contract from spec §4.3.

use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::error::{Result, SearchError};
use crate::model::File;
use crate::storage::{schema, Storage, CHUNKS_TABLE, FILES_TABLE};

impl Storage {
    /// Upsert a file by path: if a row for `file.path` exists, its id is
    /// reused and the old row is replaced; otherwise a fresh id is
    /// allocated. Chunks are not touched here — that's the indexing
    /// coordinator's job, since whether a modification also means
    /// "reparse and re-chunk" is a C6-level decision.
    pub async fn insert_file(&self, mut file: File) -> Result<File> {
        file.validate()?;

        let existing = self.get_file_by_path(&file.path).await?;
        file.id = match &existing {
            Some(old) => old.id,
            None => self.alloc_file_id(),
        };

        let table = self.open_or_create_files_table(&file).await?;
        if existing.is_some() {
            table
                .delete(&format!("path = \"{}\"", escape(&file.path)))
                .await
                .map_err(SearchError::from)?;
        }

        let batch = schema::file_row_batch(std::slice::from_ref(&file))?;
        table
            .add(schema::batch_reader(batch))
            .execute()
            .await
            .map_err(SearchError::from)?;

        Ok(file)
    }

    pub async fn get_file_by_path(&self, path: &str) -> Result<Option<File>> {
        let Ok(table) = self.connection().open_table(FILES_TABLE).execute().await else {
            return Ok(None);
        };
        let mut stream = table
            .query()
            .only_if(format!("path = \"{}\"", escape(path)))
            .limit(1)
            .execute()
            .await
            .map_err(SearchError::from)?;

        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            if let Some(file) = decode_first_file(&batch) {
                return Ok(Some(file));
            }
        }
        Ok(None)
    }

    pub async fn get_file_by_id(&self, file_id: i64) -> Result<Option<File>> {
        let Ok(table) = self.connection().open_table(FILES_TABLE).execute().await else {
            return Ok(None);
        };
        let mut stream = table
            .query()
            .only_if(format!("id = {file_id}"))
            .limit(1)
            .execute()
            .await
            .map_err(SearchError::from)?;
        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            if let Some(file) = decode_first_file(&batch) {
                return Ok(Some(file));
            }
        }
        Ok(None)
    }

    /// Remove embeddings (every per-dimension table) → chunks → file row,
    /// in that order, as one logical unit (spec §4.3 `delete_file_completely`).
    pub async fn delete_file_completely(&self, file_id: i64) -> Result<()> {
        let chunk_ids = self.chunk_ids_for_file(file_id).await?;
        if !chunk_ids.is_empty() {
            self.delete_embeddings_for_chunks(&chunk_ids).await?;
        }
        self.delete_chunks(&chunk_ids).await?;

        if let Ok(table) = self.connection().open_table(FILES_TABLE).execute().await {
            table
                .delete(&format!("id = {file_id}"))
                .await
                .map_err(SearchError::from)?;
        }
        Ok(())
    }

    async fn open_or_create_files_table(&self, seed: &File) -> Result<lancedb::Table> {
        match self.connection().open_table(FILES_TABLE).execute().await {
            Ok(t) => Ok(t),
            Err(_) => {
                let batch = schema::file_row_batch(std::slice::from_ref(seed))?;
                let reader = schema::batch_reader(arrow_array::RecordBatch::new_empty(batch.schema()));
                self.connection()
                    .create_table(FILES_TABLE, reader)
                    .execute()
                    .await
                    .map_err(SearchError::from)
            }
        }
    }

    pub(crate) async fn chunk_ids_for_file(&self, file_id: i64) -> Result<Vec<i64>> {
        let Ok(table) = self.connection().open_table(CHUNKS_TABLE).execute().await else {
            return Ok(vec![]);
        };
        let mut stream = table
            .query()
            .only_if(format!("file_id = {file_id}"))
            .select(lancedb::query::Select::columns(&["id"]))
            .execute()
            .await
            .map_err(SearchError::from)?;
        let mut ids = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            if let Some(col) = batch.column_by_name("id") {
                if let Some(arr) = col.as_any().downcast_ref::<arrow_array::Int64Array>() {
                    ids.extend((0..arr.len()).filter(|&i| arr.is_valid(i)).map(|i| arr.value(i)));
                }
            }
        }
        Ok(ids)
    }
}

fn decode_first_file(batch: &arrow_array::RecordBatch) -> Option<File> {
    decode_files(batch).into_iter().next()
}

pub(crate) fn decode_files(batch: &arrow_array::RecordBatch) -> Vec<File> {
    use arrow_array::{Float64Array, Int64Array, StringArray};

    let get_i64 = |name: &str| -> Option<&Int64Array> {
        batch.column_by_name(name)?.as_any().downcast_ref::<Int64Array>()
    };
    let get_f64 = |name: &str| -> Option<&Float64Array> {
        batch.column_by_name(name)?.as_any().downcast_ref::<Float64Array>()
    };
    let get_str = |name: &str| -> Option<&StringArray> {
        batch.column_by_name(name)?.as_any().downcast_ref::<StringArray>()
    };

    let (ids, paths, mtimes, sizes, langs, created, updated) = (
        get_i64("id"),
        get_str("path"),
        get_f64("mtime"),
        get_i64("size_bytes"),
        get_str("language"),
        get_f64("created_at"),
        get_f64("updated_at"),
    );

    let (Some(ids), Some(paths), Some(mtimes), Some(sizes), Some(langs), Some(created), Some(updated)) =
        (ids, paths, mtimes, sizes, langs, created, updated)
    else {
        return vec![];
    };

    (0..batch.num_rows())
        .filter(|&i| ids.is_valid(i))
        .map(|i| File {
            id: ids.value(i),
            path: paths.value(i).to_string(),
            mtime: mtimes.value(i),
            size_bytes: sizes.value(i) as u64,
            language: langs.value(i).to_string(),
            created_at: created.value(i),
            updated_at: updated.value(i),
        })
        .collect()
}

pub(crate) fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
