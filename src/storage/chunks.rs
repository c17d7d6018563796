//! Chunk row operations used by the indexing coordinator's insert and
//! transaction-safe modification paths (spec §4.2).

use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::error::{Result, SearchError};
use crate::model::Chunk;
use crate::storage::{schema, Storage, CHUNKS_TABLE};

impl Storage {
    /// Insert a batch of chunks in one call, assigning ids. Returns the
    /// chunks with ids filled in, in the same order.
    pub async fn insert_chunks(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        if chunks.is_empty() {
            return Ok(chunks);
        }
        for c in &chunks {
            c.validate()?;
        }
        for c in &mut chunks {
            c.id = self.alloc_chunk_id();
        }

        let table = match self.connection().open_table(CHUNKS_TABLE).execute().await {
            Ok(t) => t,
            Err(_) => {
                let batch = schema::chunk_row_batch(&chunks)?;
                let empty = schema::batch_reader(arrow_array::RecordBatch::new_empty(batch.schema()));
                self.connection()
                    .create_table(CHUNKS_TABLE, empty)
                    .execute()
                    .await
                    .map_err(SearchError::from)?
            }
        };

        let batch = schema::chunk_row_batch(&chunks)?;
        table
            .add(schema::batch_reader(batch))
            .execute()
            .await
            .map_err(SearchError::from)?;

        Ok(chunks)
    }

    pub async fn get_chunks_for_file(&self, file_id: i64) -> Result<Vec<Chunk>> {
        let Ok(table) = self.connection().open_table(CHUNKS_TABLE).execute().await else {
            return Ok(vec![]);
        };
        let mut stream = table
            .query()
            .only_if(format!("file_id = {file_id}"))
            .execute()
            .await
            .map_err(SearchError::from)?;

        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            out.extend(decode_chunks(&batch));
        }
        Ok(out)
    }

    pub async fn delete_chunks(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let Ok(table) = self.connection().open_table(CHUNKS_TABLE).execute().await else {
            return Ok(());
        };
        let list = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        table
            .delete(&format!("id IN ({list})"))
            .await
            .map_err(SearchError::from)
    }

    /// Copy chunk rows for `file_id` into a uniquely named backup table,
    /// used by the modification path before chunks are deleted.
    pub async fn backup_chunks(&self, file_id: i64, backup_table: &str) -> Result<()> {
        let chunks = self.get_chunks_for_file(file_id).await?;
        if chunks.is_empty() {
            return Ok(());
        }
        let batch = schema::chunk_row_batch(&chunks)?;
        self.connection()
            .create_table(backup_table, schema::batch_reader(batch))
            .execute()
            .await
            .map_err(SearchError::from)?;
        Ok(())
    }

    /// Restore chunks from a backup table created by [`Self::backup_chunks`]
    /// and drop the backup, used on rollback.
    pub async fn restore_chunks_from_backup(&self, backup_table: &str) -> Result<()> {
        let Ok(backup) = self.connection().open_table(backup_table).execute().await else {
            return Ok(());
        };
        let mut stream = backup.query().execute().await.map_err(SearchError::from)?;
        let mut chunks = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
            chunks.extend(decode_chunks(&batch));
        }
        drop(backup);

        if !chunks.is_empty() {
            let table = match self.connection().open_table(CHUNKS_TABLE).execute().await {
                Ok(t) => t,
                Err(_) => {
                    let batch = schema::chunk_row_batch(&chunks)?;
                    let empty = schema::batch_reader(arrow_array::RecordBatch::new_empty(batch.schema()));
                    self.connection()
                        .create_table(CHUNKS_TABLE, empty)
                        .execute()
                        .await
                        .map_err(SearchError::from)?
                }
            };
            let batch = schema::chunk_row_batch(&chunks)?;
            table
                .add(schema::batch_reader(batch))
                .execute()
                .await
                .map_err(SearchError::from)?;
        }

        self.drop_backup_table(backup_table).await
    }

    pub async fn drop_backup_table(&self, backup_table: &str) -> Result<()> {
        self.connection()
            .drop_table(backup_table)
            .await
            .map_err(SearchError::from)
    }
}

pub(crate) fn decode_chunks(batch: &arrow_array::RecordBatch) -> Vec<Chunk> {
    use arrow_array::{Int64Array, StringArray};
    use crate::model::ChunkType;

    let get_i64 = |name: &str| -> Option<&Int64Array> {
        batch.column_by_name(name)?.as_any().downcast_ref::<Int64Array>()
    };
    let get_str = |name: &str| -> Option<&StringArray> {
        batch.column_by_name(name)?.as_any().downcast_ref::<StringArray>()
    };

    let (ids, file_ids, symbols, kinds, langs, starts, ends, start_bytes, end_bytes, code, parents) = (
        get_i64("id"),
        get_i64("file_id"),
        get_str("symbol"),
        get_str("chunk_type"),
        get_str("language"),
        get_i64("start_line"),
        get_i64("end_line"),
        get_i64("start_byte"),
        get_i64("end_byte"),
        get_str("code"),
        get_str("parent_header"),
    );

    let (Some(ids), Some(file_ids), Some(symbols), Some(kinds), Some(langs), Some(starts), Some(ends), Some(code)) =
        (ids, file_ids, symbols, kinds, langs, starts, ends, code)
    else {
        return vec![];
    };

    (0..batch.num_rows())
        .filter(|&i| ids.is_valid(i))
        .map(|i| Chunk {
            id: ids.value(i),
            file_id: file_ids.value(i),
            symbol: symbols.value(i).to_string(),
            chunk_type: parse_chunk_type(kinds.value(i)),
            language: langs.value(i).to_string(),
            start_line: starts.value(i) as u32,
            end_line: ends.value(i) as u32,
            start_byte: start_bytes.and_then(|a| a.is_valid(i).then(|| a.value(i) as usize)),
            end_byte: end_bytes.and_then(|a| a.is_valid(i).then(|| a.value(i) as usize)),
            code: code.value(i).to_string(),
            parent_header: parents.and_then(|a| a.is_valid(i).then(|| a.value(i).to_string())),
        })
        .collect()
}

fn parse_chunk_type(s: &str) -> crate::model::ChunkType {
    use crate::model::ChunkType::*;
    match s {
        "function" => Function,
        "method" => Method,
        "class" => Class,
        "constructor" => Constructor,
        "struct" => Struct,
        "enum" => Enum,
        "trait" => Trait,
        "module" => Module,
        "header1" => Header1,
        "header2" => Header2,
        "header3" => Header3,
        "header4" => Header4,
        "header5" => Header5,
        "header6" => Header6,
        _ => Paragraph,
    }
}
