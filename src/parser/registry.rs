//! Maps detected languages/extensions onto concrete [`ChunkParser`]
//! implementations. Mirrors the teacher's driver table in `inspector.rs`
//! (a fixed `Vec<Box<dyn LanguageDriver>>` consulted by extension), with
//! the registered set pulled from spec §4's language list instead of the
//! teacher's broader one.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, SearchError};
use crate::parser::markdown::MarkdownParser;
use crate::parser::python_lang::PythonParser;
use crate::parser::rust_lang::RustParser;
use crate::parser::typescript_lang::TypeScriptParser;
use crate::parser::ChunkParser;

/// Extension → canonical language name for every language this system
/// *recognizes*, independent of which ones currently have a registered
/// parser. Mirrors the teacher's broader `LanguageDriver` table in
/// `inspector.rs` (Rust, TypeScript, Python, Go, Dart, Java, C#, PHP,
/// Proto, …), which always recognized more languages than any one
/// driver set needed to implement — the gap between this table and
/// [`ParserRegistry::supported_languages`] is exactly the "language
/// detected but no parser registered" case.
const KNOWN_LANGUAGES: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("mts", "typescript"),
    ("cts", "typescript"),
    ("js", "typescript"),
    ("jsx", "typescript"),
    ("mjs", "typescript"),
    ("cjs", "typescript"),
    ("md", "markdown"),
    ("markdown", "markdown"),
    ("go", "go"),
    ("dart", "dart"),
    ("java", "java"),
    ("cs", "csharp"),
    ("php", "php"),
    ("proto", "proto"),
];

/// Detects the canonical language for `path` from its extension alone,
/// against the full [`KNOWN_LANGUAGES`] table — this is spec step 1
/// ("detect language from extension"), distinct from whether a parser
/// happens to be registered for that language (step 2).
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension().and_then(|e| e.to_str())?.to_ascii_lowercase();
    KNOWN_LANGUAGES.iter().find(|(known, _)| *known == ext).map(|(_, lang)| *lang)
}

/// Outcome of resolving a path to a parser, distinguishing an
/// altogether-unrecognized extension from a recognized language that
/// simply has no parser wired up (spec §4.2 steps 1–2).
pub enum Resolution {
    /// No registered language claims this extension at all.
    Unsupported,
    /// A language was detected but no [`ChunkParser`] is registered for it.
    Unregistered(&'static str),
    Found(Arc<dyn ChunkParser>),
}

pub struct ParserRegistry {
    parsers: Vec<Arc<dyn ChunkParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            parsers: vec![
                Arc::new(RustParser),
                Arc::new(PythonParser),
                Arc::new(TypeScriptParser),
                Arc::new(MarkdownParser),
            ],
        }
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical language names this registry has a parser for, sorted.
    pub fn supported_languages(&self) -> Vec<&'static str> {
        let mut langs: Vec<&'static str> = self.parsers.iter().map(|p| p.language()).collect();
        langs.sort_unstable();
        langs
    }

    pub fn resolve(&self, path: &Path) -> Option<Arc<dyn ChunkParser>> {
        self.parsers.iter().find(|p| p.handles_path(path)).cloned()
    }

    /// Same as [`Self::resolve`] but returns the spec's `unsupported_type`
    /// error shape when nothing claims the path, instead of `None`.
    pub fn resolve_or_err(&self, path: &Path) -> Result<Arc<dyn ChunkParser>> {
        self.resolve(path).ok_or_else(|| {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("<none>");
            SearchError::Parse(format!(
                "no parser registered for extension '{ext}' ({})",
                path.display()
            ))
        })
    }

    /// Resolves `path` to a parser, distinguishing spec §4.2 step 1
    /// (extension not recognized as any language → `Unsupported`) from
    /// step 2 (language recognized, but no parser registered for it →
    /// `Unregistered`).
    pub fn resolve_detailed(&self, path: &Path) -> Resolution {
        match self.resolve(path) {
            Some(parser) => Resolution::Found(parser),
            None => match detect_language(path) {
                None => Resolution::Unsupported,
                Some(lang) => Resolution::Unregistered(lang),
            },
        }
    }

    pub fn by_language(&self, language: &str) -> Option<Arc<dyn ChunkParser>> {
        self.parsers
            .iter()
            .find(|p| p.language() == language)
            .cloned()
    }

    /// Every extension claimed by a registered parser, for the file
    /// watcher's extension filter.
    pub fn all_extensions(&self) -> Vec<String> {
        self.parsers
            .iter()
            .flat_map(|p| p.extensions().iter().map(|e| e.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn resolves_known_extensions() {
        let reg = ParserRegistry::new();
        assert!(reg.resolve(&PathBuf::from("a.rs")).is_some());
        assert!(reg.resolve(&PathBuf::from("a.py")).is_some());
        assert!(reg.resolve(&PathBuf::from("a.tsx")).is_some());
        assert!(reg.resolve(&PathBuf::from("a.md")).is_some());
    }

    #[test]
    fn unknown_extension_errors_with_resolve_or_err() {
        let reg = ParserRegistry::new();
        assert!(reg.resolve(&PathBuf::from("a.zig")).is_none());
        let err = reg.resolve_or_err(&PathBuf::from("a.zig")).unwrap_err();
        assert!(matches!(err, SearchError::Parse(_)));
    }

    #[test]
    fn resolve_detailed_distinguishes_unsupported_from_unregistered() {
        let reg = ParserRegistry::new();
        assert!(matches!(reg.resolve_detailed(&PathBuf::from("a.zig")), Resolution::Unsupported));
        assert!(matches!(reg.resolve_detailed(&PathBuf::from("a.go")), Resolution::Unregistered("go")));
        assert!(matches!(reg.resolve_detailed(&PathBuf::from("a.rs")), Resolution::Found(_)));
    }

    #[test]
    fn supported_languages_lists_all_registered() {
        let reg = ParserRegistry::new();
        let langs = reg.supported_languages();
        assert!(langs.contains(&"rust"));
        assert!(langs.contains(&"python"));
        assert!(langs.contains(&"typescript"));
        assert!(langs.contains(&"markdown"));
    }
}
