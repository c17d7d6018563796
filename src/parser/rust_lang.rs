//! Rust chunk parser, grounded on the teacher's `RustDriver` in
//! `inspector.rs` — same query-on-`tree_sitter::Node` shape, generalized
//! to emit [`ChunkDescriptor`]s (whole-definition byte/line spans) instead
//! of display `Symbol`s.

use std::path::Path;

use tree_sitter::{Node, Parser, Query, QueryCursor, StreamingIterator};

use crate::error::{Result, SearchError};
use crate::model::ChunkType;
use crate::parser::{ChunkDescriptor, ChunkParser};

pub struct RustParser;

fn node_text<'a>(source: &'a str, node: Node) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

fn run_definitions(
    source: &str,
    root: Node,
    language: &tree_sitter::Language,
    query_src: &str,
    chunk_type: ChunkType,
) -> Result<Vec<ChunkDescriptor>> {
    let query = Query::new(language, query_src)
        .map_err(|e| SearchError::Parse(format!("bad tree-sitter query: {e}")))?;
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();

    let bytes = source.as_bytes();
    let mut matches = cursor.matches(&query, root, bytes);
    while let Some(m) = matches.next() {
        let mut name_node: Option<Node> = None;
        let mut def_node: Option<Node> = None;
        for cap in m.captures {
            match query.capture_names()[cap.index as usize] {
                "name" => name_node = Some(cap.node),
                "def" => def_node = Some(cap.node),
                _ => {}
            }
        }
        let Some(name_node) = name_node else { continue };
        let def_node = def_node.unwrap_or(name_node);
        let symbol = node_text(source, name_node).trim().to_string();
        if symbol.is_empty() {
            continue;
        }

        out.push(ChunkDescriptor {
            symbol,
            chunk_type,
            start_line: def_node.start_position().row as u32 + 1,
            end_line: def_node.end_position().row as u32 + 1,
            start_byte: def_node.start_byte(),
            end_byte: def_node.end_byte(),
            code: node_text(source, def_node).to_string(),
            parent_header: None,
        });
    }
    Ok(out)
}

impl ChunkParser for RustParser {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn parse(&self, _path: &Path, source: &str) -> Result<Vec<ChunkDescriptor>> {
        let mut parser = Parser::new();
        let language = tree_sitter_rust::language();
        parser
            .set_language(&language)
            .map_err(|e| SearchError::Parse(e.to_string()))?;
        let Some(tree) = parser.parse(source, None) else {
            return Ok(vec![]);
        };
        let root = tree.root_node();

        let mut descriptors = Vec::new();
        descriptors.extend(run_definitions(
            source,
            root,
            &language,
            "(function_item name: (identifier) @name) @def",
            ChunkType::Function,
        )?);
        descriptors.extend(run_definitions(
            source,
            root,
            &language,
            "(struct_item name: (type_identifier) @name) @def",
            ChunkType::Struct,
        )?);
        descriptors.extend(run_definitions(
            source,
            root,
            &language,
            "(enum_item name: (type_identifier) @name) @def",
            ChunkType::Enum,
        )?);
        descriptors.extend(run_definitions(
            source,
            root,
            &language,
            "(trait_item name: (type_identifier) @name) @def",
            ChunkType::Trait,
        )?);
        descriptors.extend(run_definitions(
            source,
            root,
            &language,
            r#"(
                impl_item
                body: (declaration_list (function_item name: (identifier) @name) @def)
            )"#,
            ChunkType::Method,
        )?);

        descriptors.sort_by_key(|d| d.start_byte);
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extracts_top_level_functions() {
        let src = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\nfn sub(a: i32, b: i32) -> i32 {\n    a - b\n}\n";
        let parser = RustParser;
        let chunks = parser.parse(&PathBuf::from("a.rs"), src).unwrap();
        let names: Vec<&str> = chunks.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(names, vec!["add", "sub"]);
        assert_eq!(chunks[0].chunk_type, ChunkType::Function);
    }

    #[test]
    fn extracts_impl_methods() {
        let src = "struct Foo;\n\nimpl Foo {\n    fn bar(&self) -> i32 {\n        1\n    }\n}\n";
        let parser = RustParser;
        let chunks = parser.parse(&PathBuf::from("a.rs"), src).unwrap();
        assert!(chunks.iter().any(|c| c.symbol == "bar" && c.chunk_type == ChunkType::Method));
        assert!(chunks.iter().any(|c| c.symbol == "Foo" && c.chunk_type == ChunkType::Struct));
    }

    #[test]
    fn unparseable_bytes_yield_empty_not_error() {
        let parser = RustParser;
        let chunks = parser.parse(&PathBuf::from("a.rs"), "").unwrap();
        assert!(chunks.is_empty());
    }
}
