//! Storage engine (C4): files, chunks, and per-dimension embedding tables
//! layered on one `lancedb` connection.
//!
//! Grounded on `CodebaseIndex` in the teacher's `core/src/vector_store.rs`
//! — same `lancedb::connect` + `arrow_array`/`arrow_schema` plumbing,
//! generalized from a single `code_files` table to the three-entity model
//! with cascading deletes and dimension-partitioned embedding tables.

pub mod bulk;
pub mod chunks;
pub mod embeddings;
pub mod files;
pub mod schema;
pub mod search;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{Result, SearchError};

pub(crate) const FILES_TABLE: &str = "files";
pub(crate) const CHUNKS_TABLE: &str = "chunks";
pub(crate) const BULK_INSERT_THRESHOLD: usize = 50;

/// One line of semantic or regex search output, shaped for the MCP/HTTP
/// surfaces (spec §6's result object).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub chunk_id: i64,
    pub symbol: String,
    pub start_line: u32,
    pub end_line: u32,
    pub code: String,
    pub chunk_type: String,
    pub file_path: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// Aggregate counts reported by `get_stats` (spec §6) and the HTTP `/stats`
/// route.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StorageStats {
    pub files: u64,
    pub chunks: u64,
    pub embeddings: u64,
    pub providers: Vec<String>,
}

/// Owns the single `lancedb::Connection` used by every write in the
/// process (spec §5: "all writes to the database go through one logical
/// worker"). Cheap to clone — internally reference-counted by `lancedb`.
pub struct Storage {
    connection: lancedb::Connection,
    db_path: PathBuf,
    next_file_id: AtomicI64,
    next_chunk_id: AtomicI64,
    next_embedding_id: AtomicI64,
    /// Re-entrant around detach/attach transitions driven by the signal
    /// coordinator (spec §5: "a re-entrant lock protects connect/
    /// disconnect/reconnect transitions").
    pub(crate) reconnect_lock: Mutex<()>,
}

impl Storage {
    /// Connect to the database at `db_path`, creating it if absent.
    ///
    /// Startup recovery (spec §4.3): if the initial connect fails in a way
    /// that looks like WAL replay hitting a missing catalog or a binder
    /// error, delete the WAL file and retry exactly once. Any other
    /// failure propagates.
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SearchError::storage(format!("failed to create db directory: {e}")))?;
        }

        let connection = match Self::try_connect(db_path).await {
            Ok(c) => c,
            Err(e) if looks_like_wal_corruption(&e) => {
                warn!(error = %e, "WAL replay failed, deleting WAL and retrying once");
                Self::remove_wal(db_path);
                Self::try_connect(db_path).await?
            }
            Err(e) => return Err(e),
        };

        let next_file_id = AtomicI64::new(max_id(&connection, FILES_TABLE).await?);
        let next_chunk_id = AtomicI64::new(max_id(&connection, CHUNKS_TABLE).await?);

        Ok(Self {
            connection,
            db_path: db_path.to_path_buf(),
            next_file_id,
            next_chunk_id,
            next_embedding_id: AtomicI64::new(1),
            reconnect_lock: Mutex::new(()),
        })
    }

    async fn try_connect(db_path: &Path) -> Result<lancedb::Connection> {
        lancedb::connect(db_path.to_string_lossy().as_ref())
            .execute()
            .await
            .map_err(SearchError::from)
    }

    fn remove_wal(db_path: &Path) {
        let wal = db_path.join("_wal.log");
        let _ = std::fs::remove_file(wal);
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn connection(&self) -> &lancedb::Connection {
        &self.connection
    }

    fn alloc_file_id(&self) -> i64 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }

    fn alloc_chunk_id(&self) -> i64 {
        self.next_chunk_id.fetch_add(1, Ordering::SeqCst)
    }

    fn alloc_embedding_id(&self) -> i64 {
        self.next_embedding_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Detach from the database: used by the signal coordinator's S_PAUSE
    /// handler before it signals `ready.flag`. `lancedb` connections are
    /// cheap handles; dropping this one and reconnecting on resume is
    /// sufficient to release any OS-level file locks.
    pub async fn disconnect(self) {
        drop(self);
    }

    /// Aggregate row counts across the files/chunks tables and every
    /// discovered `embeddings_<N>` table.
    pub async fn stats(&self) -> Result<StorageStats> {
        search::collect_stats(self).await
    }
}

async fn max_id(connection: &lancedb::Connection, table: &str) -> Result<i64> {
    let Ok(t) = connection.open_table(table).execute().await else {
        return Ok(1);
    };
    let mut stream = t
        .query()
        .select(lancedb::query::Select::columns(&["id"]))
        .execute()
        .await
        .map_err(SearchError::from)?;
    let mut max = 0i64;
    while let Some(batch) = stream.try_next().await.map_err(SearchError::from)? {
        if let Some(col) = batch.column_by_name("id") {
            if let Some(arr) = col.as_any().downcast_ref::<arrow_array::Int64Array>() {
                for i in 0..arr.len() {
                    if arr.is_valid(i) {
                        max = max.max(arr.value(i));
                    }
                }
            }
        }
    }
    Ok(max + 1)
}

fn looks_like_wal_corruption(err: &SearchError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("catalog") || msg.contains("binder") || msg.contains("wal")
}
