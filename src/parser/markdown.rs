//! Markdown documentation chunker. No tree-sitter grammar for Markdown is
//! carried in the dependency set (the teacher's grammar list is all
//! programming languages), so this parser walks `pulldown-cmark`'s event
//! stream directly — header events open a new documentation chunk,
//! paragraph events close and emit the preceding one.

use std::path::Path;

use pulldown_cmark::{Event, HeadingLevel, Options, Parser as MdParser, Tag, TagEnd};

use crate::error::Result;
use crate::model::ChunkType;
use crate::parser::{ChunkDescriptor, ChunkParser};

pub struct MarkdownParser;

fn heading_chunk_type(level: HeadingLevel) -> ChunkType {
    match level {
        HeadingLevel::H1 => ChunkType::Header1,
        HeadingLevel::H2 => ChunkType::Header2,
        HeadingLevel::H3 => ChunkType::Header3,
        HeadingLevel::H4 => ChunkType::Header4,
        HeadingLevel::H5 => ChunkType::Header5,
        HeadingLevel::H6 => ChunkType::Header6,
    }
}

fn line_at_byte(source: &str, byte: usize) -> u32 {
    source[..byte.min(source.len())].matches('\n').count() as u32 + 1
}

impl ChunkParser for MarkdownParser {
    fn language(&self) -> &'static str {
        "markdown"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["md", "markdown"]
    }

    fn parse(&self, _path: &Path, source: &str) -> Result<Vec<ChunkDescriptor>> {
        let mut out = Vec::new();
        let mut current_header: Option<String> = None;

        let opts = Options::empty();
        let parser = MdParser::new_ext(source, opts).into_offset_iter();

        let mut pending_start: Option<usize> = None;
        let mut pending_kind: Option<ChunkType> = None;
        let mut pending_header_text = String::new();
        let mut in_heading = false;

        for (event, range) in parser {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    in_heading = true;
                    pending_start = Some(range.start);
                    pending_kind = Some(heading_chunk_type(level));
                    pending_header_text.clear();
                }
                Event::Text(text) if in_heading => {
                    pending_header_text.push_str(&text);
                }
                Event::End(TagEnd::Heading(_)) => {
                    in_heading = false;
                    if let (Some(start), Some(kind)) = (pending_start.take(), pending_kind.take()) {
                        let end = range.end;
                        let code = source[start..end].to_string();
                        let symbol = pending_header_text.trim().to_string();
                        current_header = Some(symbol.clone());
                        if !symbol.is_empty() {
                            out.push(ChunkDescriptor {
                                symbol,
                                chunk_type: kind,
                                start_line: line_at_byte(source, start),
                                end_line: line_at_byte(source, end),
                                start_byte: start,
                                end_byte: end,
                                code,
                                parent_header: None,
                            });
                        }
                    }
                }
                Event::Start(Tag::Paragraph) => {
                    pending_start = Some(range.start);
                }
                Event::End(TagEnd::Paragraph) => {
                    if let Some(start) = pending_start.take() {
                        let end = range.end;
                        let code = source[start..end].to_string();
                        let symbol = code
                            .split_whitespace()
                            .take(8)
                            .collect::<Vec<_>>()
                            .join(" ");
                        if !symbol.is_empty() {
                            out.push(ChunkDescriptor {
                                symbol,
                                chunk_type: ChunkType::Paragraph,
                                start_line: line_at_byte(source, start),
                                end_line: line_at_byte(source, end),
                                start_byte: start,
                                end_byte: end,
                                code,
                                parent_header: current_header.clone(),
                            });
                        }
                    }
                }
                _ => {}
            }
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
    fn extracts_headers_and_paragraphs() {
        let src = "# Title\n\nSome intro text here.\n\n## Section\n\nMore body text.\n";
        let parser = MarkdownParser;
        let chunks = parser.parse(&PathBuf::from("a.md"), src).unwrap();
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Header1 && c.symbol == "Title"));
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Header2 && c.symbol == "Section"));
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Paragraph));
        let section_para = chunks
            .iter()
            .find(|c| c.chunk_type == ChunkType::Paragraph && c.code.contains("More body"))
            .unwrap();
        assert_eq!(section_para.parent_header.as_deref(), Some("Section"));
    }
}
