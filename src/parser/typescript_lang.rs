//! TypeScript/JavaScript chunk parser — same extraction shape as the
//! Rust/Python parsers, targeting `tree-sitter-typescript`'s TSX-free
//! `language_typescript()` grammar.

use std::path::Path;

use tree_sitter::{Node, Parser, Query, QueryCursor, StreamingIterator};

use crate::error::{Result, SearchError};
use crate::model::ChunkType;
use crate::parser::{ChunkDescriptor, ChunkParser};

pub struct TypeScriptParser;

fn node_text<'a>(source: &'a str, node: Node) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

impl ChunkParser for TypeScriptParser {
    fn language(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "js", "jsx", "mjs"]
    }

    fn parse(&self, _path: &Path, source: &str) -> Result<Vec<ChunkDescriptor>> {
        let mut parser = Parser::new();
        let language = tree_sitter_typescript::language_typescript();
        parser
            .set_language(&language)
            .map_err(|e| SearchError::Parse(e.to_string()))?;
        let Some(tree) = parser.parse(source, None) else {
            return Ok(vec![]);
        };
        let root = tree.root_node();
        let bytes = source.as_bytes();

        let query_src = r#"
            [
              (function_declaration name: (identifier) @name) @def
              (class_declaration name: (type_identifier) @name) @def
              (method_definition name: (property_identifier) @name) @def
            ]
        "#;
        let query = Query::new(&language, query_src)
            .map_err(|e| SearchError::Parse(format!("bad tree-sitter query: {e}")))?;
        let mut cursor = QueryCursor::new();
        let mut out = Vec::new();

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
            let (Some(name_node), Some(def_node)) = (name_node, def_node) else { continue };
            let symbol = node_text(source, name_node).trim().to_string();
            if symbol.is_empty() {
                continue;
            }

            let chunk_type = match def_node.kind() {
                "class_declaration" => ChunkType::Class,
                "method_definition" => ChunkType::Method,
                _ => ChunkType::Function,
            };

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

        out.sort_by_key(|d| d.start_byte);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extracts_function_and_class_method() {
        let src = "function top() {\n  return 1;\n}\n\nclass Foo {\n  bar() {\n    return 2;\n  }\n}\n";
        let parser = TypeScriptParser;
        let chunks = parser.parse(&PathBuf::from("a.ts"), src).unwrap();
        assert!(chunks.iter().any(|c| c.symbol == "top" && c.chunk_type == ChunkType::Function));
        assert!(chunks.iter().any(|c| c.symbol == "Foo" && c.chunk_type == ChunkType::Class));
        assert!(chunks.iter().any(|c| c.symbol == "bar" && c.chunk_type == ChunkType::Method));
    }
}
