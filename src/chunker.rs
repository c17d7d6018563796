//! Normalizes [`ChunkDescriptor`]s into [`Chunk`] records and computes
//! minimal change sets between two parses of the same file (C3).
//!
//! Grounded on the cleanup helpers already present in the teacher's
//! `inspector.rs` (trailing-whitespace stripping, generated-file
//! detection), generalized here into the full clean/filter/dedup/diff
//! contract.

use std::collections::HashSet;

use xxhash_rust::xxh3::xxh3_64;

use crate::model::{Chunk, ChunkType};
use crate::parser::{looks_generated, ChangedRange, ChunkDescriptor};

const MAX_CHUNK_LINES: usize = 500;

/// Strip trailing whitespace from every line, then trim leading/trailing
/// blank lines from the block as a whole.
fn clean_code(raw: &str) -> String {
    let trimmed_lines: Vec<&str> = raw.lines().map(|l| l.trim_end()).collect();
    let start = trimmed_lines.iter().position(|l| !l.trim().is_empty());
    let end = trimmed_lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => trimmed_lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

/// Turn raw parser output for one file into normalized, deduplicated
/// [`Chunk`] records (steps 1–6 of the normalization contract). `file_id`
/// and `language` are stamped onto every surviving chunk; ids are left at
/// `0` for the caller (storage layer) to assign on insert.
pub fn normalize(descriptors: &[ChunkDescriptor], file_id: i64, language: &str) -> Vec<Chunk> {
    let mut seen: HashSet<(String, u64)> = HashSet::new();
    let mut out = Vec::new();

    for d in descriptors {
        let cleaned = clean_code(&d.code);
        if cleaned.is_empty() {
            continue;
        }

        let line_count = cleaned.lines().count();
        if line_count < d.chunk_type.min_lines() {
            continue;
        }
        if line_count > MAX_CHUNK_LINES {
            continue;
        }

        if looks_generated(&cleaned) {
            continue;
        }

        let hash = xxh3_64(cleaned.as_bytes());
        let key = (d.symbol.clone(), hash);
        if !seen.insert(key) {
            continue;
        }

        out.push(Chunk {
            id: 0,
            file_id,
            symbol: d.symbol.clone(),
            chunk_type: d.chunk_type,
            language: language.to_string(),
            start_line: d.start_line,
            end_line: d.end_line,
            start_byte: Some(d.start_byte),
            end_byte: Some(d.end_byte),
            code: cleaned,
            parent_header: d.parent_header.clone(),
        });
    }

    out
}

/// Result of diffing an existing chunk set against fresh parser output,
/// per the IncrementalChunker differential contract.
#[derive(Debug, Clone, Default)]
pub struct ChunkDiff {
    pub to_delete: Vec<i64>,
    pub to_insert: Vec<Chunk>,
    pub to_update: Vec<Chunk>,
    pub unchanged_count: usize,
}

/// A previously stored chunk, as seen by the differ — only the fields
/// needed to decide intersection with a changed range.
#[derive(Debug, Clone)]
pub struct OldChunk {
    pub id: i64,
    pub start_line: u32,
    pub end_line: u32,
}

/// Bytes-per-line ratio used to approximate a byte range as a line
/// interval when no more precise mapping is available. Over-approximates
/// on purpose: the contract requires no false negatives, not exactness.
const APPROX_BYTES_PER_LINE: usize = 40;

fn byte_range_to_lines(range: &ChangedRange) -> (u32, u32) {
    let start_line = (range.start_byte / APPROX_BYTES_PER_LINE) as u32;
    let end_line = (range.end_byte / APPROX_BYTES_PER_LINE) as u32 + 1;
    (start_line.saturating_sub(1).max(0), end_line)
}

fn intersects(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Compute the minimal `ChunkDiff` between `old_chunks` and a fresh
/// normalized chunk set, given the parser's `changed_ranges` view.
pub fn diff(
    old_chunks: &[OldChunk],
    changed_ranges: &[ChangedRange],
    new_chunks: Vec<Chunk>,
) -> ChunkDiff {
    if changed_ranges.is_empty() {
        return ChunkDiff {
            unchanged_count: old_chunks.len(),
            ..Default::default()
        };
    }

    let force_full = changed_ranges
        .iter()
        .any(|r| r.full_change || r.structural_change);

    if force_full {
        return ChunkDiff {
            to_delete: old_chunks.iter().map(|c| c.id).collect(),
            to_insert: new_chunks,
            to_update: Vec::new(),
            unchanged_count: 0,
        };
    }

    let line_ranges: Vec<(u32, u32)> = changed_ranges.iter().map(byte_range_to_lines).collect();

    let mut to_delete = Vec::new();
    let mut unchanged_count = 0;
    for old in old_chunks {
        let affected = line_ranges
            .iter()
            .any(|&(s, e)| intersects(old.start_line, old.end_line, s, e));
        if affected {
            to_delete.push(old.id);
        } else {
            unchanged_count += 1;
        }
    }

    let to_insert: Vec<Chunk> = new_chunks
        .into_iter()
        .filter(|c| {
            line_ranges
                .iter()
                .any(|&(s, e)| intersects(c.start_line, c.end_line, s, e))
        })
        .collect();

    ChunkDiff {
        to_delete,
        to_insert,
        to_update: Vec::new(),
        unchanged_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(symbol: &str, code: &str, start: u32, end: u32) -> ChunkDescriptor {
        ChunkDescriptor {
            symbol: symbol.to_string(),
            chunk_type: ChunkType::Function,
            start_line: start,
            end_line: end,
            start_byte: 0,
            end_byte: code.len(),
            code: code.to_string(),
            parent_header: None,
        }
    }

    #[test]
    fn drops_short_and_empty_chunks() {
        let short = descriptor("f", "fn f() {}", 1, 1);
        let blank = descriptor("g", "   \n  \n", 1, 3);
        let chunks = normalize(&[short, blank], 1, "rust");
        assert!(chunks.is_empty());
    }

    #[test]
    fn keeps_chunk_meeting_minimum_lines() {
        let code = "fn f() {\n    let x = 1;\n    x\n}";
        let d = descriptor("f", code, 1, 4);
        let chunks = normalize(&[d], 1, "rust");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol, "f");
    }

    #[test]
    fn drops_generated_marker_chunks() {
        let code = "// Code generated by protoc. DO NOT EDIT.\nfn f() {\n    1\n}";
        let d = descriptor("f", code, 1, 4);
        assert!(normalize(&[d], 1, "rust").is_empty());
    }

    #[test]
    fn dedups_by_symbol_and_hash_keeping_first() {
        let code = "fn f() {\n    let x = 1;\n    x\n}";
        let d1 = descriptor("f", code, 1, 4);
        let d2 = descriptor("f", code, 50, 53);
        let chunks = normalize(&[d1, d2], 1, "rust");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn empty_changed_ranges_yields_empty_diff() {
        let old = vec![OldChunk { id: 1, start_line: 1, end_line: 5 }];
        let d = diff(&old, &[], vec![]);
        assert!(d.to_delete.is_empty());
        assert!(d.to_insert.is_empty());
        assert_eq!(d.unchanged_count, 1);
    }

    #[test]
    fn full_change_deletes_all_and_inserts_all() {
        let old = vec![OldChunk { id: 1, start_line: 1, end_line: 5 }];
        let new_chunk = Chunk {
            id: 0,
            file_id: 1,
            symbol: "g".into(),
            chunk_type: ChunkType::Function,
            language: "rust".into(),
            start_line: 10,
            end_line: 14,
            start_byte: None,
            end_byte: None,
            code: "fn g() {}".into(),
            parent_header: None,
        };
        let ranges = vec![ChangedRange {
            start_byte: 0,
            end_byte: 100,
            full_change: true,
            structural_change: false,
        }];
        let d = diff(&old, &ranges, vec![new_chunk]);
        assert_eq!(d.to_delete, vec![1]);
        assert_eq!(d.to_insert.len(), 1);
        assert_eq!(d.unchanged_count, 0);
    }

    #[test]
    fn localized_change_only_affects_intersecting_chunks() {
        let old = vec![
            OldChunk { id: 1, start_line: 1, end_line: 2 },
            OldChunk { id: 2, start_line: 100, end_line: 102 },
        ];
        let ranges = vec![ChangedRange {
            start_byte: 0,
            end_byte: 20,
            full_change: false,
            structural_change: false,
        }];
        let d = diff(&old, &ranges, vec![]);
        assert_eq!(d.to_delete, vec![1]);
        assert_eq!(d.unchanged_count, 1);
    }
}
