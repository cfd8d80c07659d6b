//! Extension → content handler registry.
//!
//! Each supported extension maps to a [`Handler`]: a [`ContentKind`] tag plus
//! a function turning raw file bytes into plain UTF-8 text. The indexer asks
//! the registry for a handler and never branches on extensions itself, so
//! new formats are added with [`HandlerRegistry::register`].

use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Markdown,
    Text,
    Pdf,
    Code,
}

/// Extraction failure. The indexer reports it as a file read error and
/// leaves the document's previous index state alone.
#[derive(Debug)]
pub enum ExtractError {
    InvalidUtf8,
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::InvalidUtf8 => f.write_str("content is not valid UTF-8"),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

pub type ExtractFn = fn(&[u8]) -> Result<String, ExtractError>;

#[derive(Clone, Copy)]
pub struct Handler {
    pub kind: ContentKind,
    pub extract: ExtractFn,
}

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdx"];
const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "org", "rst", "adoc", "csv", "log"];
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "kt", "c", "h", "cpp", "hpp", "cs", "rb",
    "php", "swift", "scala", "sh", "bash", "zsh", "sql", "lua", "toml", "yaml", "yml", "json",
    "html", "css", "ex", "exs", "hs", "clj",
];

pub struct HandlerRegistry {
    by_extension: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// An empty registry; every file is unsupported.
    pub fn new() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    /// Markdown, plain text, PDF and common source-code extensions.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let markdown = Handler {
            kind: ContentKind::Markdown,
            extract: extract_markdown,
        };
        let text = Handler {
            kind: ContentKind::Text,
            extract: extract_utf8,
        };
        let code = Handler {
            kind: ContentKind::Code,
            extract: extract_utf8,
        };
        for ext in MARKDOWN_EXTENSIONS {
            registry.register(ext, markdown);
        }
        for ext in TEXT_EXTENSIONS {
            registry.register(ext, text);
        }
        for ext in CODE_EXTENSIONS {
            registry.register(ext, code);
        }
        registry.register(
            "pdf",
            Handler {
                kind: ContentKind::Pdf,
                extract: extract_pdf,
            },
        );
        registry
    }

    /// Register (or replace) the handler for an extension, case-insensitively.
    pub fn register(&mut self, extension: &str, handler: Handler) {
        self.by_extension
            .insert(extension.trim_start_matches('.').to_ascii_lowercase(), handler);
    }

    pub fn handler_for(&self, path: &str) -> Option<Handler> {
        let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        self.by_extension.get(&ext).copied()
    }

    pub fn is_supported(&self, path: &str) -> bool {
        self.handler_for(path).is_some()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn extract_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::InvalidUtf8)?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
}

/// Plain text with a leading YAML front-matter block removed.
fn extract_markdown(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = extract_utf8(bytes)?;
    Ok(strip_front_matter(&text).to_string())
}

fn strip_front_matter(text: &str) -> &str {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return text;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return rest[offset..].trim_start_matches(['\r', '\n']);
        }
    }
    text
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}
