//! Language parser interface (C2).
//!
//! Mirrors the shape of the teacher's `LanguageDriver` trait in
//! `inspector.rs` (`name`, `extensions`, `handles_path`,
//! `language_for_path`), but where that trait extracts `Symbol`s for
//! display, `ChunkParser` extracts [`ChunkDescriptor`]s for persistence.
//! A parser is specified only by contract — concrete grammars are a
//! small, swappable set registered in [`registry`].

pub mod markdown;
pub mod python_lang;
pub mod registry;
pub mod rust_lang;
pub mod typescript_lang;

use std::path::Path;

use crate::error::Result;
use crate::model::ChunkType;

/// One parser-recognized construct, pre-normalization. The chunker (C3)
/// turns these into [`crate::model::Chunk`] records.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub symbol: String,
    pub chunk_type: ChunkType,
    /// 1-indexed, inclusive.
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: usize,
    pub end_byte: usize,
    pub code: String,
    pub parent_header: Option<String>,
}

/// A byte range the parser's diff view reports as changed between two
/// parses of the same file (spec §4.1 differential contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedRange {
    pub start_byte: usize,
    pub end_byte: usize,
    pub full_change: bool,
    pub structural_change: bool,
}

pub trait ChunkParser: Send + Sync {
    /// Canonical language name (`"rust"`, `"python"`, …), matched against
    /// [`File::language`](crate::model::File::language).
    fn language(&self) -> &'static str;

    /// Lowercase, dot-free extensions this parser claims (`"rs"`, `"py"`).
    fn extensions(&self) -> &'static [&'static str];

    fn handles_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| self.extensions().contains(&e.as_str()))
    }

    /// Parse `source` into an ordered sequence of chunk descriptors.
    /// An unparseable file yields `Ok(vec![])`, never an error — per
    /// spec §4.1 "Failure modes: none are fatal".
    fn parse(&self, path: &Path, source: &str) -> Result<Vec<ChunkDescriptor>>;

    /// Best-effort diff view between two versions of the same file,
    /// used to drive the incremental chunker. The default conservative
    /// implementation reports the whole file as a `full_change`, which
    /// is always safe (no false negatives) but forfeits the incremental
    /// fast path; concrete parsers should override it when the
    /// underlying grammar exposes a cheaper diff.
    fn diff(&self, _old_source: &str, new_source: &str) -> Vec<ChangedRange> {
        vec![ChangedRange {
            start_byte: 0,
            end_byte: new_source.len(),
            full_change: true,
            structural_change: false,
        }]
    }
}

/// Marker heuristics for generated files (spec §4.1 step 5).
pub fn looks_generated(code: &str) -> bool {
    let head: String = code.chars().take(2000).collect::<String>().to_ascii_lowercase();
    const MARKERS: &[&str] = &[
        "generated by",
        "auto-generated",
        "autogenerated",
        "do not edit",
        "@generated",
        "code generated",
    ];
    MARKERS.iter().any(|m| head.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_generated_markers() {
        assert!(looks_generated("// Code generated by protoc-gen-go. DO NOT EDIT."));
        assert!(looks_generated("/* auto-generated file */\nfn f() {}"));
        assert!(!looks_generated("fn f() { /* hand written */ }"));
    }
}
