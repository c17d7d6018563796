//! Immutable domain records: [`File`], [`Chunk`], [`Embedding`].
//!
//! These are plain data with `validate()` helpers expressing the
//! invariants from the data model — they carry no storage or parsing
//! logic themselves (kept at the seams, per the teacher's `Symbol`/
//! `FileSymbols` structs in `inspector.rs`, which are pure data too).

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// A source file tracked by the index. Uniqueness key is `path`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct File {
    pub id: i64,
    pub path: String,
    pub mtime: f64,
    pub size_bytes: u64,
    pub language: String,
    pub created_at: f64,
    pub updated_at: f64,
}

impl File {
    pub fn validate(&self) -> Result<()> {
        if self.mtime < 0.0 {
            return Err(SearchError::validation("File.mtime must be >= 0"));
        }
        if !std::path::Path::new(&self.path).is_absolute() {
            return Err(SearchError::validation("File.path must be absolute when persisted"));
        }
        Ok(())
    }

    /// `true` when `other_mtime` differs from `self.mtime` by at least one millisecond —
    /// the threshold the indexing coordinator uses to decide `up_to_date` vs reprocess.
    pub fn mtime_changed(&self, other_mtime: f64) -> bool {
        (self.mtime - other_mtime).abs() >= 0.001
    }
}

/// Closed enum of chunk kinds, partitioned into code and documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Method,
    Class,
    Constructor,
    Struct,
    Enum,
    Trait,
    Module,
    Header1,
    Header2,
    Header3,
    Header4,
    Header5,
    Header6,
    Paragraph,
}

impl ChunkType {
    pub fn is_documentation(self) -> bool {
        matches!(
            self,
            ChunkType::Header1
                | ChunkType::Header2
                | ChunkType::Header3
                | ChunkType::Header4
                | ChunkType::Header5
                | ChunkType::Header6
                | ChunkType::Paragraph
        )
    }

    pub fn is_code(self) -> bool {
        !self.is_documentation()
    }

    /// Minimum line count kept by the chunker's size filter (spec §4.1 step 2).
    pub fn min_lines(self) -> usize {
        if self.is_documentation() {
            1
        } else {
            3
        }
    }
}

/// A semantic unit of source text, owned exclusively by one [`File`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub file_id: i64,
    pub symbol: String,
    pub chunk_type: ChunkType,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: Option<usize>,
    pub end_byte: Option<usize>,
    pub code: String,
    pub parent_header: Option<String>,
}

impl Chunk {
    pub fn validate(&self) -> Result<()> {
        if self.start_line < 1 {
            return Err(SearchError::validation("Chunk.start_line must be >= 1"));
        }
        if self.end_line < self.start_line {
            return Err(SearchError::validation("Chunk.end_line must be >= start_line"));
        }
        if self.code.trim().is_empty() {
            return Err(SearchError::validation("Chunk.code must be non-empty after cleanup"));
        }
        Ok(())
    }

    pub fn line_count(&self) -> usize {
        (self.end_line - self.start_line + 1) as usize
    }
}

/// A fixed-dimension vector produced by a provider for one chunk's text.
/// Uniqueness key is `(chunk_id, provider, model)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
    pub chunk_id: i64,
    pub provider: String,
    pub model: String,
    pub dims: usize,
    pub vector: Vec<f32>,
    pub created_at: f64,
}

impl Embedding {
    pub fn validate(&self) -> Result<()> {
        if self.dims == 0 {
            return Err(SearchError::validation("Embedding.dims must be >= 1"));
        }
        if self.vector.len() != self.dims {
            return Err(SearchError::validation("Embedding.vector length must equal dims"));
        }
        if self.vector.iter().any(|v| !v.is_finite()) {
            return Err(SearchError::validation("Embedding.vector components must all be finite"));
        }
        Ok(())
    }

    /// Table name for the per-dimension partitioning scheme (spec §3, §4.3).
    pub fn table_name(dims: usize) -> String {
        format!("embeddings_{dims}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_rejects_relative_path() {
        let f = File {
            id: 1,
            path: "rel/path.rs".into(),
            mtime: 1.0,
            size_bytes: 0,
            language: "rust".into(),
            created_at: 0.0,
            updated_at: 0.0,
        };
        assert!(f.validate().is_err());
    }

    #[test]
    fn file_mtime_changed_threshold() {
        let f = File {
            id: 1,
            path: "/a.rs".into(),
            mtime: 100.0,
            size_bytes: 0,
            language: "rust".into(),
            created_at: 0.0,
            updated_at: 0.0,
        };
        assert!(!f.mtime_changed(100.0005));
        assert!(f.mtime_changed(100.002));
    }

    #[test]
    fn chunk_rejects_empty_code() {
        let c = Chunk {
            id: 1,
            file_id: 1,
            symbol: "f".into(),
            chunk_type: ChunkType::Function,
            language: "rust".into(),
            start_line: 1,
            end_line: 3,
            start_byte: None,
            end_byte: None,
            code: "   \n  ".into(),
            parent_header: None,
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn embedding_dims_must_match_vector_len() {
        let e = Embedding {
            chunk_id: 1,
            provider: "local".into(),
            model: "m".into(),
            dims: 3,
            vector: vec![0.1, 0.2],
            created_at: 0.0,
        };
        assert!(e.validate().is_err());
    }

    #[test]
    fn embedding_table_name_is_per_dimension() {
        assert_eq!(Embedding::table_name(1536), "embeddings_1536");
    }
}
