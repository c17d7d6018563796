//! Arrow schema construction and row→`RecordBatch` conversion, grounded on
//! `rows_to_record_batch_reader` in the teacher's `core/src/vector_store.rs`
//! — same `arrow_array`/`arrow_schema` building blocks, generalized from a
//! single fixed "code_files" table to the `files` / `chunks` /
//! `embeddings_<N>` triple described in the data model.

use std::sync::Arc;

use arrow_array::{
    ArrayRef, Float32Array, Float64Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};

use crate::error::{Result, SearchError};
use crate::model::{Chunk, Embedding, File};

pub fn files_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("path", DataType::Utf8, false),
        Field::new("mtime", DataType::Float64, false),
        Field::new("size_bytes", DataType::Int64, false),
        Field::new("language", DataType::Utf8, false),
        Field::new("created_at", DataType::Float64, false),
        Field::new("updated_at", DataType::Float64, false),
    ]))
}

pub fn chunks_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("file_id", DataType::Int64, false),
        Field::new("symbol", DataType::Utf8, false),
        Field::new("chunk_type", DataType::Utf8, false),
        Field::new("language", DataType::Utf8, false),
        Field::new("start_line", DataType::Int64, false),
        Field::new("end_line", DataType::Int64, false),
        Field::new("start_byte", DataType::Int64, true),
        Field::new("end_byte", DataType::Int64, true),
        Field::new("code", DataType::Utf8, false),
        Field::new("parent_header", DataType::Utf8, true),
    ]))
}

/// Schema for an `embeddings_<N>` table. `dims` fixes the width of the
/// embedding column for the table's lifetime — the storage-engine
/// constraint the data model calls out explicitly.
pub fn embeddings_schema(dims: usize) -> Arc<Schema> {
    let item_field = Arc::new(Field::new("item", DataType::Float32, false));
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("chunk_id", DataType::Int64, false),
        Field::new("provider", DataType::Utf8, false),
        Field::new("model", DataType::Utf8, false),
        Field::new(
            "embedding",
            DataType::FixedSizeList(item_field, dims as i32),
            false,
        ),
        Field::new("dims", DataType::Int64, false),
        Field::new("created_at", DataType::Float64, false),
    ]))
}

pub fn file_row_batch(files: &[File]) -> Result<RecordBatch> {
    let schema = files_schema();
    let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(files.iter().map(|f| f.id)));
    let paths: ArrayRef = Arc::new(StringArray::from_iter_values(files.iter().map(|f| f.path.as_str())));
    let mtimes: ArrayRef = Arc::new(Float64Array::from_iter_values(files.iter().map(|f| f.mtime)));
    let sizes: ArrayRef = Arc::new(Int64Array::from_iter_values(
        files.iter().map(|f| f.size_bytes as i64),
    ));
    let langs: ArrayRef = Arc::new(StringArray::from_iter_values(files.iter().map(|f| f.language.as_str())));
    let created: ArrayRef = Arc::new(Float64Array::from_iter_values(files.iter().map(|f| f.created_at)));
    let updated: ArrayRef = Arc::new(Float64Array::from_iter_values(files.iter().map(|f| f.updated_at)));
    RecordBatch::try_new(schema, vec![ids, paths, mtimes, sizes, langs, created, updated])
        .map_err(SearchError::from)
}

pub fn chunk_row_batch(chunks: &[Chunk]) -> Result<RecordBatch> {
    let schema = chunks_schema();
    let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| c.id)));
    let file_ids: ArrayRef = Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| c.file_id)));
    let symbols: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.symbol.as_str())));
    let kinds: ArrayRef = Arc::new(StringArray::from_iter_values(
        chunks.iter().map(|c| format!("{:?}", c.chunk_type).to_lowercase()),
    ));
    let langs: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.language.as_str())));
    let starts: ArrayRef = Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| c.start_line as i64)));
    let ends: ArrayRef = Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| c.end_line as i64)));
    let start_bytes: ArrayRef = Arc::new(Int64Array::from_iter(
        chunks.iter().map(|c| c.start_byte.map(|v| v as i64)),
    ));
    let end_bytes: ArrayRef = Arc::new(Int64Array::from_iter(
        chunks.iter().map(|c| c.end_byte.map(|v| v as i64)),
    ));
    let code: ArrayRef = Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.code.as_str())));
    let parents: ArrayRef = Arc::new(StringArray::from_iter(
        chunks.iter().map(|c| c.parent_header.as_deref()),
    ));
    RecordBatch::try_new(
        schema,
        vec![ids, file_ids, symbols, kinds, langs, starts, ends, start_bytes, end_bytes, code, parents],
    )
    .map_err(SearchError::from)
}

pub fn embedding_row_batch(dims: usize, ids: &[i64], embeddings: &[Embedding]) -> Result<RecordBatch> {
    use arrow_array::FixedSizeListArray;

    if ids.len() != embeddings.len() {
        return Err(SearchError::storage("embedding id/row count mismatch"));
    }
    let schema = embeddings_schema(dims);

    let mut flat: Vec<f32> = Vec::with_capacity(embeddings.len() * dims);
    for e in embeddings {
        if e.vector.len() != dims {
            return Err(SearchError::storage(format!(
                "embedding vector length {} does not match table dims {dims}",
                e.vector.len()
            )));
        }
        flat.extend_from_slice(&e.vector);
    }

    let row_ids: ArrayRef = Arc::new(Int64Array::from_iter_values(ids.iter().copied()));
    let chunk_ids: ArrayRef = Arc::new(Int64Array::from_iter_values(embeddings.iter().map(|e| e.chunk_id)));
    let providers: ArrayRef = Arc::new(StringArray::from_iter_values(embeddings.iter().map(|e| e.provider.as_str())));
    let models: ArrayRef = Arc::new(StringArray::from_iter_values(embeddings.iter().map(|e| e.model.as_str())));
    let values: ArrayRef = Arc::new(Float32Array::from(flat));
    let item_field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_arr: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(item_field, dims as i32, values, None).map_err(SearchError::from)?,
    );
    let dims_arr: ArrayRef = Arc::new(Int64Array::from_iter_values(
        std::iter::repeat_n(dims as i64, embeddings.len()),
    ));
    let created: ArrayRef = Arc::new(Float64Array::from_iter_values(embeddings.iter().map(|e| e.created_at)));

    RecordBatch::try_new(
        schema,
        vec![row_ids, chunk_ids, providers, models, vector_arr, dims_arr, created],
    )
    .map_err(SearchError::from)
}

pub fn batch_reader(batch: RecordBatch) -> Box<dyn arrow_array::RecordBatchReader + Send> {
    let schema = batch.schema();
    Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema))
}

pub fn batch_reader_multi(
    batches: Vec<RecordBatch>,
    schema: Arc<Schema>,
) -> Box<dyn arrow_array::RecordBatchReader + Send> {
    let rows: Vec<Result<RecordBatch, arrow_schema::ArrowError>> = batches.into_iter().map(Ok).collect();
    Box::new(RecordBatchIterator::new(rows.into_iter(), schema))
}
