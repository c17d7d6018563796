//! HNSW index lifecycle helpers backing the bulk-insert fast path
//! (spec §4.3). `lancedb`'s vector index is created and dropped through
//! the same `Table::create_index`/`Table::drop_index` calls the teacher's
//! `core/src/vector_store.rs` would use if it built an index at all (that
//! module relies on a brute-force `vector_search` over an unindexed
//! table); the drop/rebuild choreography here is new, built for the
//! multi-dimension partitioned design.

use lancedb::index::vector::IvfHnswPqIndexBuilder;
use lancedb::index::Index;
use lancedb::DistanceType;

use crate::error::{Result, SearchError};

pub const EMBEDDING_COLUMN: &str = "embedding";

/// Create the cosine-metric HNSW index on a freshly populated
/// `embeddings_<N>` table. Safe to call on a table that's too small to
/// benefit from an index; `lancedb` degrades to brute force internally.
pub async fn create_vector_index(table: &lancedb::Table) -> Result<()> {
    let index = Index::IvfHnswPq(
        IvfHnswPqIndexBuilder::default().distance_type(DistanceType::Cosine),
    );
    table
        .create_index(&[EMBEDDING_COLUMN], index)
        .execute()
        .await
        .map_err(SearchError::from)?;
    Ok(())
}

/// Drop the vector index ahead of a large insert batch. Returns `Ok(())`
/// even if no index existed yet (first bulk insert into a brand-new
/// table).
pub async fn drop_vector_index(table: &lancedb::Table) -> Result<()> {
    match table.list_indices().await {
        Ok(indices) => {
            for idx in indices {
                if idx.columns.iter().any(|c| c == EMBEDDING_COLUMN) {
                    let _ = table.drop_index(&idx.name).await;
                }
            }
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

/// Best-effort index recreation used on the rollback path: the data
/// rollback alone leaves the index dropped, so this runs as a separate,
/// independent attempt after the transactional failure is handled.
pub async fn recreate_index_best_effort(table: &lancedb::Table) {
    if let Err(e) = create_vector_index(table).await {
        tracing::warn!(error = %e, "failed to recreate vector index after rollback");
    }
}
